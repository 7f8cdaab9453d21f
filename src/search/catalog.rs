//! Catalog source: a wrapper agent answering queries from a fixed document list.

use crate::actors::agent_runtime::{AgentIdentity, AgentRuntime};
use crate::actors::handler::{Handler, HandlerContext};
use crate::actors::handler_registry::HandlerRegistry;
use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{ContentKind, Message, MessageContent, RequestId};
use crate::config::Settings;
use crate::error::AgentError;
use crate::search::document::Document;
use crate::storage::normalize_query;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Read a JSON array of documents.
pub async fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {:?}", path))?;
    let documents: Vec<Document> =
        serde_json::from_str(&json).with_context(|| format!("Invalid catalog {:?}", path))?;
    tracing::info!("Loaded {} documents from {:?}", documents.len(), path);
    Ok(documents)
}

/// Documents whose field values contain every term of `text`.
pub fn matching(documents: &[Document], text: &str) -> Vec<Document> {
    let normalized = normalize_query(text);
    let terms: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    documents
        .iter()
        .filter(|document| {
            let haystack = document
                .fields
                .values()
                .map(|v| v.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            terms.iter().all(|term| haystack.contains(term))
        })
        .cloned()
        .collect()
}

pub struct CatalogHandler {
    source: String,
    documents: Arc<Vec<Document>>,
}

impl CatalogHandler {
    pub fn new(source: impl Into<String>, documents: Arc<Vec<Document>>) -> Self {
        Self {
            source: source.into(),
            documents,
        }
    }
}

#[async_trait]
impl Handler for CatalogHandler {
    fn description(&self) -> String {
        format!("catalog '{}'", self.source)
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        let MessageContent::DocumentQueryAsk { query } = &message.content else {
            return Ok(false);
        };

        let documents = matching(&self.documents, &query.text);
        tracing::debug!(
            "Catalog '{}' matched {} documents for '{}'",
            self.source,
            documents.len(),
            query.text
        );
        cx.reply(
            &message,
            MessageContent::DocumentQueryStoredTell {
                source: self.source.clone(),
                documents,
            },
        )
        .await?;
        cx.halt();
        Ok(true)
    }
}

/// Start a catalog agent named after its source and register it under the source prefix.
pub async fn start_catalog_source(
    router: MessageRouterHandle,
    settings: &Settings,
    source: &str,
    documents: Vec<Document>,
) -> Result<AgentRuntime, AgentError> {
    let documents = Arc::new(documents);
    let name = source.to_string();
    let mut handlers = HandlerRegistry::with_builtins();
    handlers.register(ContentKind::DocumentQueryAsk, move || {
        Box::new(CatalogHandler::new(name.clone(), documents.clone()))
    });

    let identity = AgentIdentity::new(
        source,
        format!("{}{}", settings.search.source_service_prefix, source),
        RequestId::generate().to_string(),
    );
    let runtime = AgentRuntime::start(identity, handlers, router, settings).await?;
    runtime.register_with_directory().await?;
    Ok(runtime)
}
