//! Agent Registry - the directory's single-writer table of agent records
//!
//! Information Hiding:
//! - Record map owned by one reusable handler, mutated only on its loop
//! - Lookup by exact service name or by prefix
//! - Kill relay to target agents kept off the registry loop

use crate::actors::handler::{Handler, HandlerContext};
use crate::actors::messages::{AgentName, AgentRecord, ContentKind, Message, MessageContent};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

pub const REGISTRY_HANDLER: &str = "registry";

pub const REGISTRY_KINDS: &[ContentKind] = &[
    ContentKind::RegisterNotify,
    ContentKind::DeregisterNotify,
    ContentKind::AgentNameAsk,
    ContentKind::AgentNameAllAsk,
    ContentKind::KillAgentAsk,
];

/// Plain record store, kept separate from the handler so it can be tested synchronously.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    records: HashMap<AgentName, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a record. Returns true when the agent was not known before.
    pub fn register(&mut self, name: AgentName, service_name: String, shared_secret: String) -> bool {
        let record = AgentRecord {
            name: name.clone(),
            service_name,
            shared_secret,
            last_seen: Utc::now(),
        };
        self.records.insert(name, record).is_none()
    }

    pub fn deregister(&mut self, name: &AgentName) -> Option<AgentRecord> {
        self.records.remove(name)
    }

    pub fn get(&self, name: &AgentName) -> Option<&AgentRecord> {
        self.records.get(name)
    }

    pub fn by_service(&self, service_name: &str) -> Vec<AgentRecord> {
        self.matching(|record| record.service_name == service_name)
    }

    pub fn by_prefix(&self, prefix: &str) -> Vec<AgentRecord> {
        self.matching(|record| record.service_name.starts_with(prefix))
    }

    fn matching(&self, predicate: impl Fn(&AgentRecord) -> bool) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reusable handler serving every registry message of the directory agent.
pub struct RegistryHandler {
    registry: AgentRegistry,
}

impl RegistryHandler {
    pub fn new() -> Self {
        Self {
            registry: AgentRegistry::new(),
        }
    }

    async fn kill(
        &mut self,
        cx: &HandlerContext,
        message: &Message,
        name: &AgentName,
        admin_secret: &str,
    ) -> Result<bool> {
        if admin_secret != cx.runtime().identity().shared_secret {
            tracing::warn!(
                "[Directory] Kill of '{}' requested by '{}' with a bad admin secret",
                name,
                message.from
            );
            return Ok(false);
        }

        let Some(record) = self.registry.deregister(name) else {
            cx.reply(message, MessageContent::KillTell { killed: false })
                .await?;
            return Ok(true);
        };

        tracing::info!("[Directory] Killing '{}' on behalf of '{}'", name, message.from);
        let runtime = cx.runtime().clone();
        let request = message.clone();
        tokio::spawn(async move {
            let outcome = runtime
                .ask_default(
                    record.name.clone(),
                    MessageContent::KillAsk {
                        shared_secret: record.shared_secret.clone(),
                    },
                )
                .await;
            let killed = match outcome {
                Ok(reply) => matches!(reply.content, MessageContent::KillTell { killed: true }),
                Err(e) => {
                    tracing::warn!("[Directory] Kill of '{}' unanswered: {}", record.name, e);
                    false
                }
            };
            if let Err(e) = runtime
                .reply(&request, MessageContent::KillTell { killed })
                .await
            {
                tracing::error!("[Directory] Failed to relay kill outcome: {}", e);
            }
        });
        Ok(true)
    }
}

impl Default for RegistryHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for RegistryHandler {
    fn description(&self) -> String {
        format!("agent registry ({} records)", self.registry.len())
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        match &message.content {
            MessageContent::RegisterNotify {
                name,
                service_name,
                shared_secret,
            } => {
                if self
                    .registry
                    .register(name.clone(), service_name.clone(), shared_secret.clone())
                {
                    tracing::info!("[Directory] Registered '{}' as {}", name, service_name);
                    cx.runtime()
                        .record_event(format!("registered {} as {}", name, service_name));
                }
                Ok(true)
            }
            MessageContent::DeregisterNotify { name } => {
                if self.registry.deregister(name).is_some() {
                    tracing::info!("[Directory] Deregistered '{}'", name);
                    cx.runtime().record_event(format!("deregistered {}", name));
                }
                Ok(true)
            }
            MessageContent::AgentNameAsk { service_name } => {
                let records = self.registry.by_service(service_name);
                cx.reply(&message, MessageContent::AgentNameTell { records })
                    .await?;
                Ok(true)
            }
            MessageContent::AgentNameAllAsk { prefix } => {
                let records = self.registry.by_prefix(prefix);
                cx.reply(&message, MessageContent::AgentNameTell { records })
                    .await?;
                Ok(true)
            }
            MessageContent::KillAgentAsk { name, admin_secret } => {
                self.kill(cx, &message, name, admin_secret).await
            }
            _ => Ok(false),
        }
    }
}
