//! Search Coordinator - fans a query out to source agents and merges the answers
//!
//! Information Hiding:
//! - Per-request state (pending sources, accumulator, deadline) private to the handler
//! - Cache, ranker and repository reached only through their traits
//! - Deadline and source replies race through the handler's own mailbox; the first to finalize wins

use crate::actors::agent_runtime::{AgentIdentity, AgentRuntime};
use crate::actors::handler::{Handler, HandlerContext};
use crate::actors::handler_registry::HandlerRegistry;
use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{AgentName, ContentKind, Message, MessageContent, RequestId};
use crate::config::{SearchConfig, Settings};
use crate::directory::lookup_service_within;
use crate::error::AgentError;
use crate::search::document::{Document, DocumentQuery, DocumentQueryResult, Provenance};
use crate::search::oid::resolve_oid;
use crate::search::ranker::{Ranker, TermOverlapRanker};
use crate::search::repository::{AgentRepository, Repository};
use crate::search::result::{apply_result_config, ResultAccumulator};
use crate::storage::{self, CacheKey, QueryCache};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Collaborators shared by every query handler of one coordinator.
pub struct SearchServices {
    pub cache: Arc<dyn QueryCache>,
    pub ranker: Arc<dyn Ranker>,
    pub repository: Option<Arc<dyn Repository>>,
    pub settings: SearchConfig,
}

impl SearchServices {
    pub fn new(cache: Arc<dyn QueryCache>, ranker: Arc<dyn Ranker>, settings: SearchConfig) -> Self {
        Self {
            cache,
            ranker,
            repository: None,
            settings,
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Cache backend and repository agent as configured, term-overlap ranking.
    pub fn from_settings(settings: &Settings, router: &MessageRouterHandle) -> Result<Self> {
        let cache = storage::open_cache(&settings.search.cache)?;
        let mut services = Self::new(cache, Arc::new(TermOverlapRanker), settings.search.clone());
        if let Some(agent) = &settings.search.repository_agent {
            services = services.with_repository(Arc::new(AgentRepository::new(
                router.clone(),
                AgentName::new(settings.search.coordinator_name.clone()),
                AgentName::new(agent.clone()),
            )));
        }
        Ok(services)
    }

    /// `max(requested or default, minimum)`.
    pub fn deadline_for(&self, query: &DocumentQuery) -> Duration {
        let requested = query
            .max_duration_ms
            .unwrap_or(self.settings.default_deadline_ms);
        Duration::from_millis(requested.max(self.settings.min_deadline_ms))
    }
}

struct PendingQuery {
    requester: AgentName,
    query: DocumentQuery,
    /// Sources asked and not yet answered, with the agent serving each.
    pending: BTreeMap<String, AgentName>,
    /// Sources that could not be asked at all.
    unreachable: BTreeSet<String>,
    accumulator: ResultAccumulator,
    deadline: Option<JoinHandle<()>>,
    finalized: bool,
}

impl PendingQuery {
    fn new(requester: AgentName, query: DocumentQuery) -> Self {
        Self {
            requester,
            query,
            pending: BTreeMap::new(),
            unreachable: BTreeSet::new(),
            accumulator: ResultAccumulator::new(),
            deadline: None,
            finalized: false,
        }
    }

    fn missed_sources(&self) -> Vec<String> {
        let missed: BTreeSet<String> = self
            .unreachable
            .iter()
            .chain(self.pending.keys())
            .cloned()
            .collect();
        missed.into_iter().collect()
    }

    async fn progress(&self, cx: &HandlerContext, source: &str, from_cache: bool) -> Result<()> {
        cx.send(
            self.requester.clone(),
            MessageContent::DocumentQueryInfoNotify {
                source: source.to_string(),
                total: self.accumulator.len(),
                from_cache,
            },
        )
        .await?;
        Ok(())
    }

    fn stop_deadline(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
    }
}

/// Keep documents that carry a valid OID and claim no other source, stamped `Found(source)`.
pub fn admit_documents(source: &str, documents: Vec<Document>) -> Vec<Document> {
    documents
        .into_iter()
        .filter_map(|mut document| {
            if document.provenance.iter().any(|p| p.source != source) {
                tracing::debug!("Dropping document from '{}' claiming another source", source);
                return None;
            }
            let Some(oid) = resolve_oid(&document) else {
                tracing::debug!("Dropping document from '{}' without a usable OID", source);
                return None;
            };
            document.oid = Some(oid);
            document.provenance = vec![Provenance::found(source)];
            Some(document)
        })
        .collect()
}

fn unique_sources(sources: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    sources
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}

/// Per-request handler answering one `DocumentQueryAsk`.
pub struct DocumentQueryHandler {
    services: Arc<SearchServices>,
    state: Option<PendingQuery>,
}

impl DocumentQueryHandler {
    pub fn new(services: Arc<SearchServices>) -> Self {
        Self {
            services,
            state: None,
        }
    }

    async fn start(
        &mut self,
        cx: &HandlerContext,
        requester: AgentName,
        query: DocumentQuery,
    ) -> Result<bool> {
        tracing::info!(
            "Query {} from '{}': '{}' over {:?}",
            cx.request_id(),
            requester,
            query.text,
            query.sources
        );
        cx.runtime()
            .record_event(format!("query {} from {}", cx.request_id(), requester));

        let deadline = self.services.deadline_for(&query);
        let deadline_at = Instant::now() + deadline;
        cx.handler().set_send_partial_results(query.partial_results);

        let sources = unique_sources(&query.sources);
        let mut state = PendingQuery::new(requester, query);

        let mut to_ask = Vec::new();
        for source in sources {
            let key = CacheKey::new(source.clone(), &state.query.text);
            match self.services.cache.get(&key).await {
                Ok(Some(documents)) => {
                    state.accumulator.merge_all(documents);
                    state.progress(cx, &source, true).await?;
                }
                Ok(None) => to_ask.push(source),
                Err(e) => {
                    tracing::warn!("Cache lookup for '{}' failed: {:#}", source, e);
                    to_ask.push(source);
                }
            }
        }

        // The clock runs from arrival: slow lookups eat into the same deadline.
        if !to_ask.is_empty() {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            state.deadline = Some(cx.schedule(remaining, MessageContent::DeadlineNotify));
        }

        let lookup_bound = deadline_at
            .saturating_duration_since(Instant::now())
            .min(cx.runtime().ask_timeout());
        let service_names: Vec<String> = to_ask
            .iter()
            .map(|source| format!("{}{}", self.services.settings.source_service_prefix, source))
            .collect();
        let resolved = join_all(
            service_names
                .iter()
                .map(|service_name| lookup_service_within(cx.runtime(), service_name, lookup_bound)),
        )
        .await;

        for (source, lookup) in to_ask.into_iter().zip(resolved) {
            let agent = match lookup {
                Ok(records) => match records.into_iter().next() {
                    Some(record) => record.name,
                    None => {
                        tracing::warn!("No agent serves source '{}'", source);
                        state.unreachable.insert(source);
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!("Could not resolve source '{}': {}", source, e);
                    state.unreachable.insert(source);
                    continue;
                }
            };

            let single = DocumentQuery {
                sources: vec![source.clone()],
                ..state.query.clone()
            };
            match cx
                .send(agent.clone(), MessageContent::DocumentQueryAsk { query: single })
                .await
            {
                Ok(()) => {
                    tracing::debug!("Query {} forwarded to '{}' for '{}'", cx.request_id(), agent, source);
                    state.pending.insert(source, agent);
                }
                Err(e) => {
                    tracing::warn!("Could not forward to '{}': {}", agent, e);
                    state.unreachable.insert(source);
                }
            }
        }

        let done = state.pending.is_empty();
        self.state = Some(state);
        if done {
            self.finalize(cx, "nothing left to ask").await?;
        }
        Ok(true)
    }

    async fn on_stored(
        &mut self,
        cx: &HandlerContext,
        from: &AgentName,
        source: String,
        documents: Vec<Document>,
    ) -> Result<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        if state.finalized || state.pending.get(&source) != Some(from) {
            tracing::debug!(
                "Ignoring answer for '{}' from '{}' on query {}",
                source,
                from,
                cx.request_id()
            );
            return Ok(true);
        }
        state.pending.remove(&source);

        let admitted = admit_documents(&source, documents);
        tracing::info!(
            "Source '{}' answered query {} with {} documents",
            source,
            cx.request_id(),
            admitted.len()
        );

        let key = CacheKey::new(source.clone(), &state.query.text);
        if let Err(e) = self.services.cache.put(key, admitted.clone()).await {
            tracing::warn!("Caching answer of '{}' failed: {:#}", source, e);
        }

        state.accumulator.merge_all(admitted);
        state.progress(cx, &source, false).await?;

        if state.pending.is_empty() {
            self.finalize(cx, "all sources answered").await?;
        }
        Ok(true)
    }

    /// Answer the requester once, then halt.
    async fn finalize(&mut self, cx: &HandlerContext, reason: &str) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if state.finalized {
            return Ok(());
        }
        state.finalized = true;
        state.stop_deadline();

        let missed = state.missed_sources();
        state.accumulator.mark_missing(&missed);
        let mut documents = state.accumulator.take_documents();

        if let Err(e) = self.services.ranker.rank(&mut documents, &state.query) {
            tracing::warn!("Ranking query {} failed: {}", cx.request_id(), e);
            for document in &mut documents {
                document.relevance = 0.0;
            }
        }

        let total = documents.len();
        let unfiltered = self
            .services
            .repository
            .as_ref()
            .map(|repository| (repository.clone(), documents.clone()));

        let result = DocumentQueryResult {
            documents: apply_result_config(documents, &state.query.result_config),
            total,
            partial: !missed.is_empty(),
            missed_sources: missed,
        };
        tracing::info!(
            "Query {} finalized ({}): {} documents, missed {:?}",
            cx.request_id(),
            reason,
            total,
            result.missed_sources
        );

        let sent = cx
            .send(state.requester.clone(), MessageContent::DocumentQueryTell { result })
            .await;

        if let Some((repository, documents)) = unfiltered {
            tokio::spawn(async move {
                if let Err(e) = repository.notify(documents).await {
                    tracing::warn!("Repository notification failed: {:#}", e);
                }
            });
        }

        cx.halt();
        sent?;
        Ok(())
    }

    async fn cancel(&mut self, cx: &HandlerContext) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        state.finalized = true;
        state.stop_deadline();
        tracing::info!("Query {} cancelled by '{}'", cx.request_id(), state.requester);

        for agent in state.pending.values() {
            if let Err(e) = cx.send(agent.clone(), MessageContent::CancelRequestNotify).await {
                tracing::warn!("Could not forward cancel to '{}': {}", agent, e);
            }
        }
        cx.halt();
        Ok(())
    }

    fn from_requester(&self, from: &AgentName) -> bool {
        self.state.as_ref().is_some_and(|s| &s.requester == from)
    }
}

#[async_trait]
impl Handler for DocumentQueryHandler {
    fn description(&self) -> String {
        match &self.state {
            Some(state) => format!(
                "document query '{}' ({} pending)",
                state.query.text,
                state.pending.len()
            ),
            None => "document query".to_string(),
        }
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        match message.content {
            MessageContent::DocumentQueryAsk { query } if self.state.is_none() => {
                self.start(cx, message.from, query).await
            }
            MessageContent::DocumentQueryStoredTell { source, documents } => {
                self.on_stored(cx, &message.from, source, documents).await
            }
            MessageContent::DeadlineNotify if &message.from == cx.runtime().name() => {
                self.finalize(cx, "deadline").await?;
                Ok(true)
            }
            MessageContent::ShowResultsNowNotify if self.from_requester(&message.from) => {
                if cx.handler().send_partial_results() {
                    self.finalize(cx, "requester asked for results").await?;
                } else {
                    tracing::debug!(
                        "Query {} did not opt into partial results, ignoring show-now",
                        cx.request_id()
                    );
                }
                Ok(true)
            }
            MessageContent::CancelRequestNotify if self.from_requester(&message.from) => {
                self.cancel(cx).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Start the search coordinator agent and register it with the directory.
pub async fn start_coordinator(
    router: MessageRouterHandle,
    settings: &Settings,
    services: SearchServices,
) -> Result<AgentRuntime, AgentError> {
    let services = Arc::new(services);
    let mut handlers = HandlerRegistry::with_builtins();
    handlers.register(ContentKind::DocumentQueryAsk, move || {
        Box::new(DocumentQueryHandler::new(services.clone()))
    });

    let identity = AgentIdentity::new(
        settings.search.coordinator_name.clone(),
        settings.search.coordinator_service.clone(),
        RequestId::generate().to_string(),
    );
    let runtime = AgentRuntime::start(identity, handlers, router, settings).await?;
    runtime.register_with_directory().await?;
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::document::SourceStatus;
    use crate::search::oid::{derive_oid, AUTHORS, TITLE, YEAR};

    fn paper(title: &str) -> Document {
        Document::new()
            .with_field(TITLE, title)
            .with_field(AUTHORS, "Hewitt")
            .with_field(YEAR, "1973")
    }

    #[test]
    fn test_admission_filters_and_stamps() {
        let mut foreign = paper("Foreign");
        foreign.provenance = vec![Provenance::found("ieee")];
        let mut own = paper("Own");
        own.provenance = vec![Provenance::found("acm")];
        let mut bad_oid = paper("Bad");
        bad_oid.oid = Some("xyz".to_string());

        let admitted = admit_documents(
            "acm",
            vec![
                paper("Plain"),
                foreign,
                own,
                bad_oid,
                Document::new().with_field(AUTHORS, "untitled"),
            ],
        );

        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted[0].oid, derive_oid(&paper("Plain")));
        for document in &admitted {
            assert_eq!(document.provenance, vec![Provenance::found("acm")]);
            assert_eq!(document.provenance[0].status, SourceStatus::Found);
        }
    }

    #[test]
    fn test_deadline_has_a_floor() {
        let services = SearchServices::new(
            Arc::new(crate::storage::InMemoryQueryCache::new()),
            Arc::new(TermOverlapRanker),
            SearchConfig::default(),
        );
        let query = DocumentQuery::new("q", ["acm"]);

        assert_eq!(services.deadline_for(&query), Duration::from_millis(10_000));
        assert_eq!(
            services.deadline_for(&query.clone().with_max_duration_ms(10)),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            services.deadline_for(&query.with_max_duration_ms(2_500)),
            Duration::from_millis(2_500)
        );
    }

    #[test]
    fn test_duplicate_sources_are_asked_once() {
        let sources = vec!["acm".to_string(), "ieee".to_string(), "acm".to_string()];
        assert_eq!(unique_sources(&sources), vec!["acm", "ieee"]);
    }
}
