//! Merging source answers and shaping the final result.

use crate::search::document::{Document, Provenance, ResultConfig, SortKey};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Documents merged by OID, in first-seen order.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    documents: Vec<Document>,
    by_oid: HashMap<String, usize>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a document that already carries its OID. Returns true when it was new.
    pub fn merge(&mut self, document: Document) -> bool {
        let Some(oid) = document.oid.clone() else {
            return false;
        };

        match self.by_oid.get(&oid) {
            Some(&index) => {
                let existing = &mut self.documents[index];
                for provenance in document.provenance {
                    if !existing.provenance.contains(&provenance) {
                        existing.provenance.push(provenance);
                    }
                }
                for (name, value) in document.fields {
                    existing.fields.entry(name).or_insert(value);
                }
                false
            }
            None => {
                self.by_oid.insert(oid, self.documents.len());
                self.documents.push(document);
                true
            }
        }
    }

    pub fn merge_all(&mut self, documents: impl IntoIterator<Item = Document>) -> usize {
        let mut added = 0;
        for document in documents {
            if self.merge(document) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Record `sources` as misses on every document.
    pub fn mark_missing(&mut self, sources: &[String]) {
        for document in &mut self.documents {
            for source in sources {
                let miss = Provenance::miss(source.clone());
                if !document.provenance.contains(&miss) {
                    document.provenance.push(miss);
                }
            }
        }
    }

    pub fn take_documents(&mut self) -> Vec<Document> {
        self.by_oid.clear();
        std::mem::take(&mut self.documents)
    }
}

fn compare(a: &Document, b: &Document, key: &SortKey) -> Ordering {
    match key {
        SortKey::Relevance => a
            .relevance
            .partial_cmp(&b.relevance)
            .unwrap_or(Ordering::Equal),
        SortKey::Field(name) => match (a.field(name), b.field(name)) {
            (Some(x), Some(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

/// Sort, window and strip fields. Documents lacking the sort field go last in either direction.
pub fn apply_result_config(mut documents: Vec<Document>, config: &ResultConfig) -> Vec<Document> {
    documents.sort_by(|a, b| {
        let order = compare(a, b, &config.sort);
        let missing_field = match &config.sort {
            SortKey::Field(name) => a.field(name).is_none() || b.field(name).is_none(),
            SortKey::Relevance => false,
        };
        if config.descending && !missing_field {
            order.reverse()
        } else {
            order
        }
    });

    let limit = config.limit.unwrap_or(usize::MAX);
    documents
        .into_iter()
        .skip(config.offset)
        .take(limit)
        .map(|mut document| {
            if let Some(keep) = &config.fields {
                document.fields.retain(|name, _| keep.contains(name));
            }
            document
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::document::SourceStatus;

    fn doc(oid: &str, title: &str, source: &str) -> Document {
        Document {
            oid: Some(oid.to_string()),
            provenance: vec![Provenance::found(source)],
            ..Document::new().with_field("title", title)
        }
    }

    fn ranked(title: &str, relevance: f64) -> Document {
        Document {
            relevance,
            ..Document::new().with_field("title", title)
        }
    }

    fn titles(documents: &[Document]) -> Vec<&str> {
        documents.iter().map(|d| d.field("title").unwrap_or("-")).collect()
    }

    #[test]
    fn test_merge_unions_provenance() {
        let mut acc = ResultAccumulator::new();
        assert!(acc.merge(doc("1", "Actors", "acm")));
        assert!(!acc.merge(doc("1", "Actors", "ieee").with_field("doi", "10.1/x")));
        assert!(!acc.merge(doc("1", "Actors", "acm")));
        assert!(acc.merge(doc("2", "Agents", "ieee")));

        let documents = acc.take_documents();
        assert_eq!(documents.len(), 2);
        assert_eq!(
            documents[0].provenance,
            vec![Provenance::found("acm"), Provenance::found("ieee")]
        );
        assert_eq!(documents[0].field("doi"), Some("10.1/x"));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_documents_without_oid_are_not_merged() {
        let mut acc = ResultAccumulator::new();
        assert!(!acc.merge(Document::new().with_field("title", "x")));
        assert_eq!(acc.len(), 0);
    }

    #[test]
    fn test_mark_missing_once_per_source() {
        let mut acc = ResultAccumulator::new();
        acc.merge_all(vec![doc("1", "a", "acm"), doc("2", "b", "acm")]);
        let missing = vec!["ieee".to_string()];
        acc.mark_missing(&missing);
        acc.mark_missing(&missing);

        for document in acc.take_documents() {
            assert_eq!(document.missed_sources(), vec!["ieee"]);
            assert_eq!(document.provenance[0].status, SourceStatus::Found);
        }
    }

    #[test]
    fn test_relevance_descending_by_default() {
        let documents = vec![ranked("low", 0.1), ranked("high", 0.9), ranked("mid", 0.5)];
        let shaped = apply_result_config(documents, &ResultConfig::default());
        assert_eq!(titles(&shaped), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_field_sort_window_and_strip() {
        let documents = vec![
            ranked("Delta", 0.0).with_field("year", "1999"),
            ranked("alpha", 0.0).with_field("year", "2001"),
            Document::new().with_field("year", "1990"),
            ranked("Charlie", 0.0),
            ranked("bravo", 0.0),
        ];
        let config = ResultConfig {
            sort: SortKey::Field("title".to_string()),
            descending: false,
            offset: 1,
            limit: Some(3),
            fields: Some(vec!["title".to_string()]),
        };

        let shaped = apply_result_config(documents, &config);
        assert_eq!(titles(&shaped), vec!["bravo", "Charlie", "Delta"]);
        assert!(shaped.iter().all(|d| d.field("year").is_none()));
    }

    #[test]
    fn test_missing_sort_field_goes_last_when_descending() {
        let documents = vec![
            Document::new().with_field("id", "none"),
            ranked("a", 0.0),
            ranked("b", 0.0),
        ];
        let config = ResultConfig {
            sort: SortKey::Field("title".to_string()),
            ..ResultConfig::default()
        };
        let shaped = apply_result_config(documents, &config);
        assert_eq!(titles(&shaped), vec!["b", "a", "-"]);
    }
}
