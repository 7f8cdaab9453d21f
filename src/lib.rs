//! litmesh - agent messaging substrate for distributed literature search
//!
//! Independent agents (directory, search coordinator, source wrappers, repository)
//! exchange typed messages over an in-process router. Remote clients reach the
//! router through a gated transport that looks like a long-running HTTP response.

pub mod actors;
pub mod config;
pub mod directory;
pub mod error;
pub mod search;
pub mod storage;
pub mod transport;
pub mod utils;

pub mod cli;

pub use config::Settings;
pub use error::{AgentError, TransportError};

use actors::{AgentRuntime, MessageRouterHandle};
use search::{Document, SearchServices};
use std::net::SocketAddr;
use std::sync::Arc;
use transport::{GatedServer, Gateway};

/// Every agent of one process plus the gated server that exposes them.
pub struct Node {
    router: MessageRouterHandle,
    directory: AgentRuntime,
    coordinator: AgentRuntime,
    sources: Vec<AgentRuntime>,
    server: Arc<GatedServer>,
}

impl Node {
    /// Start router, directory, coordinator, one catalog agent per source, then the server.
    pub async fn start(settings: &Settings, catalogs: Vec<(String, Vec<Document>)>) -> anyhow::Result<Self> {
        let router = MessageRouterHandle::new(settings.agent.channel_buffer_size);
        let directory = directory::start_directory(router.clone(), settings).await?;

        let services = SearchServices::from_settings(settings, &router)?;
        let coordinator = search::start_coordinator(router.clone(), settings, services).await?;

        let mut sources = Vec::with_capacity(catalogs.len());
        for (source, documents) in catalogs {
            sources.push(search::start_catalog_source(router.clone(), settings, &source, documents).await?);
        }

        let gateway = Gateway::new(router.clone(), settings.agent.channel_buffer_size);
        let server = GatedServer::bind(settings.transport.clone(), gateway).await?;
        server.spawn();

        tracing::info!(
            "Node up on {} with {} catalog sources",
            server.local_addr(),
            sources.len()
        );
        Ok(Self {
            router,
            directory,
            coordinator,
            sources,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn router(&self) -> &MessageRouterHandle {
        &self.router
    }

    pub fn directory(&self) -> &AgentRuntime {
        &self.directory
    }

    pub fn coordinator(&self) -> &AgentRuntime {
        &self.coordinator
    }

    pub fn server(&self) -> &Arc<GatedServer> {
        &self.server
    }

    /// Stop accepting, shut every agent down and close the router.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.server.stop();
        for source in &self.sources {
            source.shutdown().await;
        }
        self.coordinator.shutdown().await;
        self.directory.shutdown().await;
        self.router.shutdown().await?;
        tracing::info!("Node shutdown complete");
        Ok(())
    }
}
