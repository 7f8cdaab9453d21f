use crate::actors::messages::{AgentName, Message};
use crate::error::AgentError;
use std::collections::HashMap;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum RoutingMessage {
    Deliver(Message),
    Attach {
        name: AgentName,
        inbox: Sender<Message>,
        response: oneshot::Sender<bool>,
    },
    Detach(AgentName),
    ListAgents(oneshot::Sender<Vec<AgentName>>),
    Shutdown,
}

/// In-process bus routing messages to agent inboxes by recipient name.
#[derive(Clone)]
pub struct MessageRouterHandle {
    sender: Sender<RoutingMessage>,
}

impl MessageRouterHandle {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = channel(buffer_size);
        tokio::spawn(router_actor(receiver));
        Self { sender }
    }

    pub async fn send_message(&self, message: RoutingMessage) -> Result<(), AgentError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| AgentError::RouterClosed)
    }

    pub async fn deliver(&self, message: Message) -> Result<(), AgentError> {
        self.send_message(RoutingMessage::Deliver(message)).await
    }

    /// Bind `name` to an inbox. Returns false when the name is already bound to a live inbox.
    pub async fn attach(&self, name: AgentName, inbox: Sender<Message>) -> Result<bool, AgentError> {
        let (response, response_rx) = oneshot::channel();
        self.send_message(RoutingMessage::Attach {
            name,
            inbox,
            response,
        })
        .await?;
        response_rx.await.map_err(|_| AgentError::RouterClosed)
    }

    pub async fn detach(&self, name: AgentName) -> Result<(), AgentError> {
        self.send_message(RoutingMessage::Detach(name)).await
    }

    pub async fn agents(&self) -> Result<Vec<AgentName>, AgentError> {
        let (response, response_rx) = oneshot::channel();
        self.send_message(RoutingMessage::ListAgents(response)).await?;
        response_rx.await.map_err(|_| AgentError::RouterClosed)
    }

    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.send_message(RoutingMessage::Shutdown).await
    }
}

async fn router_actor(mut receiver: Receiver<RoutingMessage>) {
    tracing::info!("Router actor started");

    let mut routes: HashMap<AgentName, Sender<Message>> = HashMap::new();

    while let Some(message) = receiver.recv().await {
        match message {
            RoutingMessage::Deliver(message) => {
                let Some(inbox) = routes.get(&message.to) else {
                    tracing::warn!(
                        "No route to '{}' for {:?} from '{}' (request {})",
                        message.to,
                        message.kind(),
                        message.from,
                        message.request_id
                    );
                    continue;
                };

                let to = message.to.clone();
                if inbox.send(message).await.is_err() {
                    tracing::warn!("Inbox of '{}' is closed, removing route", to);
                    routes.remove(&to);
                }
            }
            RoutingMessage::Attach {
                name,
                inbox,
                response,
            } => {
                let taken = routes.get(&name).is_some_and(|existing| !existing.is_closed());
                if taken {
                    tracing::warn!("Agent name '{}' is already attached", name);
                } else {
                    tracing::debug!("Attached '{}'", name);
                    routes.insert(name, inbox);
                }
                let _ = response.send(!taken);
            }
            RoutingMessage::Detach(name) => {
                if routes.remove(&name).is_some() {
                    tracing::debug!("Detached '{}'", name);
                }
            }
            RoutingMessage::ListAgents(response) => {
                let mut names: Vec<AgentName> = routes.keys().cloned().collect();
                names.sort();
                let _ = response.send(names);
            }
            RoutingMessage::Shutdown => {
                tracing::info!("Router received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Router actor stopped");
}
