//! Where finished result sets go to be kept.

use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{AgentName, Message, MessageContent, RequestId};
use crate::search::document::Document;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Hand over the merged, unfiltered documents of one query.
    async fn notify(&self, documents: Vec<Document>) -> Result<()>;
}

/// Forwards result sets to a repository agent as `StoreDocumentsNotify`.
pub struct AgentRepository {
    router: MessageRouterHandle,
    from: AgentName,
    agent: AgentName,
}

impl AgentRepository {
    pub fn new(router: MessageRouterHandle, from: AgentName, agent: AgentName) -> Self {
        Self {
            router,
            from,
            agent,
        }
    }
}

#[async_trait]
impl Repository for AgentRepository {
    async fn notify(&self, documents: Vec<Document>) -> Result<()> {
        tracing::debug!(
            "Sending {} documents to repository '{}'",
            documents.len(),
            self.agent
        );
        let message = Message::new(
            self.from.clone(),
            self.agent.clone(),
            RequestId::generate(),
            MessageContent::StoreDocumentsNotify { documents },
        );
        self.router.deliver(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_documents_reach_the_repository_agent() {
        let router = MessageRouterHandle::new(8);
        let (tx, mut rx) = mpsc::channel(4);
        router.attach(AgentName::new("repository"), tx).await.unwrap();

        let repository = AgentRepository::new(
            router,
            AgentName::new("search"),
            AgentName::new("repository"),
        );
        repository
            .notify(vec![Document::new().with_field("title", "kept")])
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.from, AgentName::new("search"));
        match message.content {
            MessageContent::StoreDocumentsNotify { documents } => assert_eq!(documents.len(), 1),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }
}
