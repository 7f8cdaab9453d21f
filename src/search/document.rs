//! Document and query payloads carried by search messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Found,
    /// The source was asked but did not answer before finalization.
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub status: SourceStatus,
}

impl Provenance {
    pub fn found(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Found,
        }
    }

    pub fn miss(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Miss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    #[serde(default)]
    pub relevance: f64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn found_in(&self, source: &str) -> bool {
        self.provenance
            .iter()
            .any(|p| p.source == source && p.status == SourceStatus::Found)
    }

    pub fn missed_sources(&self) -> Vec<&str> {
        self.provenance
            .iter()
            .filter(|p| p.status == SourceStatus::Miss)
            .map(|p| p.source.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", content = "field", rename_all = "snake_case")]
pub enum SortKey {
    Relevance,
    Field(String),
}

/// How the caller wants the merged answer shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultConfig {
    pub sort: SortKey,
    pub descending: bool,
    pub offset: usize,
    pub limit: Option<usize>,
    /// Fields to keep on each document; `None` keeps all of them.
    pub fields: Option<Vec<String>>,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            sort: SortKey::Relevance,
            descending: true,
            offset: 0,
            limit: None,
            fields: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub text: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub result_config: ResultConfig,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    /// The requester may ask for the answer before every source has replied.
    #[serde(default)]
    pub partial_results: bool,
}

impl DocumentQuery {
    pub fn new<S: Into<String>>(text: impl Into<String>, sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            text: text.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            result_config: ResultConfig::default(),
            max_duration_ms: None,
            partial_results: false,
        }
    }

    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    pub fn with_result_config(mut self, result_config: ResultConfig) -> Self {
        self.result_config = result_config;
        self
    }

    pub fn with_partial_results(mut self, partial_results: bool) -> Self {
        self.partial_results = partial_results;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQueryResult {
    pub documents: Vec<Document>,
    /// Merged document count before windowing.
    pub total: usize,
    pub missed_sources: Vec<String>,
    /// True when at least one source is missing from the answer.
    pub partial: bool,
}
