//! Gateway - bridges gated connections to the message router
//!
//! Information Hiding:
//! - Name bindings per connection kept private
//! - One forwarder task per bound name serializes router traffic onto the connection
//! - Remote clients look like ordinary agents to everyone on the router

use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{AgentName, Message};
use crate::transport::connection::{ChunkOutcome, ChunkSink, Connection, ConnectionId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver};

pub struct Gateway {
    router: MessageRouterHandle,
    bindings: Mutex<HashMap<ConnectionId, Vec<AgentName>>>,
    buffer_size: usize,
}

impl Gateway {
    pub fn new(router: MessageRouterHandle, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            router,
            bindings: Mutex::new(HashMap::new()),
            buffer_size,
        })
    }

    /// Names currently bound to `connection`.
    pub fn bound_names(&self, connection: &ConnectionId) -> Vec<AgentName> {
        self.bindings
            .lock()
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    fn owner_of(&self, name: &AgentName) -> Option<ConnectionId> {
        self.bindings
            .lock()
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(id, _)| id.clone())
    }

    /// Bind `name` to `connection` unless the router already knows it.
    async fn bind(&self, connection: &Arc<Connection>, name: &AgentName) -> bool {
        let (sender, receiver) = channel(self.buffer_size);
        match self.router.attach(name.clone(), sender).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Connection {} tried to claim agent name '{}' which is taken",
                    connection.id(),
                    name
                );
                return false;
            }
            Err(e) => {
                tracing::error!("Gateway could not attach '{}': {}", name, e);
                return false;
            }
        }

        self.bindings
            .lock()
            .entry(connection.id().clone())
            .or_default()
            .push(name.clone());
        tracing::info!("Connection {} bound as '{}'", connection.id(), name);

        tokio::spawn(forward(connection.clone(), name.clone(), receiver));
        true
    }
}

/// Push every message routed to `name` onto the connection as a JSON chunk.
async fn forward(connection: Arc<Connection>, name: AgentName, mut receiver: Receiver<Message>) {
    while let Some(message) = receiver.recv().await {
        let chunk = match message.to_json() {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("Could not encode message for '{}': {}", name, e);
                continue;
            }
        };
        if !connection.enqueue(chunk) {
            tracing::debug!(
                "Connection {} is closing, dropping traffic for '{}'",
                connection.id(),
                name
            );
            break;
        }
    }
}

#[async_trait]
impl ChunkSink for Gateway {
    async fn on_chunk(&self, connection: &Arc<Connection>, chunk: String) -> ChunkOutcome {
        let message = match Message::from_json(&chunk) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Connection {} sent an undecodable chunk: {}", connection.id(), e);
                return ChunkOutcome::Rejected;
            }
        };

        match self.owner_of(&message.from) {
            Some(owner) if &owner == connection.id() => {}
            Some(owner) => {
                tracing::warn!(
                    "Connection {} spoofed '{}' which belongs to {}",
                    connection.id(),
                    message.from,
                    owner
                );
                return ChunkOutcome::Rejected;
            }
            None => {
                if !self.bind(connection, &message.from).await {
                    return ChunkOutcome::Rejected;
                }
            }
        }

        tracing::debug!(
            "Gateway relays {:?} from '{}' to '{}'",
            message.kind(),
            message.from,
            message.to
        );
        match self.router.deliver(message).await {
            Ok(()) => ChunkOutcome::Accepted,
            Err(e) => {
                tracing::error!("Gateway could not deliver: {}", e);
                ChunkOutcome::Rejected
            }
        }
    }

    async fn on_closed(&self, connection: &Arc<Connection>) {
        let names = self
            .bindings
            .lock()
            .remove(connection.id())
            .unwrap_or_default();
        for name in names {
            tracing::info!("Detaching '{}' after connection {} closed", name, connection.id());
            let _ = self.router.detach(name).await;
        }
    }
}
