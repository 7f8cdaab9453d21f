//! Relevance ranking behind a small trait so scoring can be swapped.

use crate::search::document::{Document, DocumentQuery};
use crate::storage::normalize_query;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("query '{0}' has no terms to rank by")]
    EmptyQuery(String),

    #[error("ranking failed: {0}")]
    Failed(String),
}

pub trait Ranker: Send + Sync {
    /// Assign `relevance` to every document in place.
    fn rank(&self, documents: &mut [Document], query: &DocumentQuery) -> Result<(), RankError>;
}

/// Fraction of query terms found anywhere in the document's fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermOverlapRanker;

impl Ranker for TermOverlapRanker {
    fn rank(&self, documents: &mut [Document], query: &DocumentQuery) -> Result<(), RankError> {
        let normalized = normalize_query(&query.text);
        let terms: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        if terms.is_empty() {
            return Err(RankError::EmptyQuery(query.text.clone()));
        }

        for document in documents.iter_mut() {
            let text = document
                .fields
                .values()
                .map(|v| v.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            let hits = terms.iter().filter(|term| text.contains(*term)).count();
            document.relevance = hits as f64 / terms.len() as f64;
        }
        Ok(())
    }
}
