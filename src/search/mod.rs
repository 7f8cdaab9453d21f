//! Query orchestration: fan-out to source agents, merge under a deadline, cache and rank.

pub mod catalog;
pub mod coordinator;
pub mod document;
pub mod oid;
pub mod ranker;
pub mod repository;
pub mod result;

pub use catalog::start_catalog_source;
pub use coordinator::{start_coordinator, DocumentQueryHandler, SearchServices};
pub use document::{
    Document, DocumentQuery, DocumentQueryResult, Provenance, ResultConfig, SortKey, SourceStatus,
};
pub use ranker::{RankError, Ranker, TermOverlapRanker};
pub use repository::{AgentRepository, Repository};
