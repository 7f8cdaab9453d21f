use crate::search::document::{Document, DocumentQuery, DocumentQueryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(String);

impl AgentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a new logical request.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Envelope exchanged between agents. Never mutated after it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: AgentName,
    pub to: AgentName,
    pub request_id: RequestId,
    pub content: MessageContent,
}

impl Message {
    pub fn new(
        from: impl Into<AgentName>,
        to: impl Into<AgentName>,
        request_id: RequestId,
        content: MessageContent,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            request_id,
            content,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.content.kind()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(chunk: &str) -> serde_json::Result<Self> {
        serde_json::from_str(chunk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    DocumentQueryAsk {
        query: DocumentQuery,
    },
    DocumentQueryTell {
        result: DocumentQueryResult,
    },
    DocumentQueryStoredTell {
        source: String,
        documents: Vec<Document>,
    },
    DocumentQueryInfoNotify {
        source: String,
        total: usize,
        from_cache: bool,
    },
    ShowResultsNowNotify,
    CancelRequestNotify,
    DeadlineNotify,
    StoreDocumentsNotify {
        documents: Vec<Document>,
    },

    RegisterNotify {
        name: AgentName,
        service_name: String,
        shared_secret: String,
    },
    DeregisterNotify {
        name: AgentName,
    },
    AgentNameAsk {
        service_name: String,
    },
    AgentNameAllAsk {
        prefix: String,
    },
    AgentNameTell {
        records: Vec<AgentRecord>,
    },
    KillAgentAsk {
        name: AgentName,
        admin_secret: String,
    },
    KillAsk {
        shared_secret: String,
    },
    KillTell {
        killed: bool,
    },

    StatusAsk,
    StatusTell {
        status: AgentStatus,
    },
    RequestMapAsk,
    RequestMapTell {
        handlers: Vec<HandlerInfo>,
    },
    LogAsk {
        lines: usize,
    },
    LogTell {
        lines: Vec<String>,
    },

    ErrorTell {
        reason: String,
    },
}

/// Fieldless mirror of [`MessageContent`], the key of the handler dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    DocumentQueryAsk,
    DocumentQueryTell,
    DocumentQueryStoredTell,
    DocumentQueryInfoNotify,
    ShowResultsNowNotify,
    CancelRequestNotify,
    DeadlineNotify,
    StoreDocumentsNotify,
    RegisterNotify,
    DeregisterNotify,
    AgentNameAsk,
    AgentNameAllAsk,
    AgentNameTell,
    KillAgentAsk,
    KillAsk,
    KillTell,
    StatusAsk,
    StatusTell,
    RequestMapAsk,
    RequestMapTell,
    LogAsk,
    LogTell,
    ErrorTell,
}

impl MessageContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            MessageContent::DocumentQueryAsk { .. } => ContentKind::DocumentQueryAsk,
            MessageContent::DocumentQueryTell { .. } => ContentKind::DocumentQueryTell,
            MessageContent::DocumentQueryStoredTell { .. } => ContentKind::DocumentQueryStoredTell,
            MessageContent::DocumentQueryInfoNotify { .. } => ContentKind::DocumentQueryInfoNotify,
            MessageContent::ShowResultsNowNotify => ContentKind::ShowResultsNowNotify,
            MessageContent::CancelRequestNotify => ContentKind::CancelRequestNotify,
            MessageContent::DeadlineNotify => ContentKind::DeadlineNotify,
            MessageContent::StoreDocumentsNotify { .. } => ContentKind::StoreDocumentsNotify,
            MessageContent::RegisterNotify { .. } => ContentKind::RegisterNotify,
            MessageContent::DeregisterNotify { .. } => ContentKind::DeregisterNotify,
            MessageContent::AgentNameAsk { .. } => ContentKind::AgentNameAsk,
            MessageContent::AgentNameAllAsk { .. } => ContentKind::AgentNameAllAsk,
            MessageContent::AgentNameTell { .. } => ContentKind::AgentNameTell,
            MessageContent::KillAgentAsk { .. } => ContentKind::KillAgentAsk,
            MessageContent::KillAsk { .. } => ContentKind::KillAsk,
            MessageContent::KillTell { .. } => ContentKind::KillTell,
            MessageContent::StatusAsk => ContentKind::StatusAsk,
            MessageContent::StatusTell { .. } => ContentKind::StatusTell,
            MessageContent::RequestMapAsk => ContentKind::RequestMapAsk,
            MessageContent::RequestMapTell { .. } => ContentKind::RequestMapTell,
            MessageContent::LogAsk { .. } => ContentKind::LogAsk,
            MessageContent::LogTell { .. } => ContentKind::LogTell,
            MessageContent::ErrorTell { .. } => ContentKind::ErrorTell,
        }
    }

    /// Secret carried by directory-only messages, checked by the directory guard.
    pub fn presented_secret(&self) -> Option<&str> {
        match self {
            MessageContent::KillAsk { shared_secret } => Some(shared_secret),
            _ => None,
        }
    }
}

/// A directory entry. Owned by the registry handler of the directory agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: AgentName,
    pub service_name: String,
    pub shared_secret: String,
    pub last_seen: DateTime<Utc>,
}

/// Observability snapshot of one live request handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub request_id: Option<RequestId>,
    pub description: String,
    pub running: bool,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: AgentName,
    pub service_name: String,
    pub uptime_seconds: u64,
    pub live_handlers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_is_tagged_by_kind() {
        let message = Message::new(
            "client",
            "directory",
            RequestId::new("r-1"),
            MessageContent::AgentNameAsk {
                service_name: "/service/search".to_string(),
            },
        );

        let json = message.to_json().unwrap();
        assert!(json.contains("\"kind\":\"agent_name_ask\""));
        assert!(json.contains("\"request_id\":\"r-1\""));
        assert_eq!(Message::from_json(&json).unwrap(), message);
    }

    #[test]
    fn test_unit_variants_decode() {
        let json = r#"{"from":"c","to":"search","request_id":"r","content":{"kind":"show_results_now_notify"}}"#;
        let message = Message::from_json(json).unwrap();
        assert_eq!(message.kind(), ContentKind::ShowResultsNowNotify);
    }

    #[test]
    fn test_only_kill_presents_a_secret() {
        let kill = MessageContent::KillAsk {
            shared_secret: "s3cret".to_string(),
        };
        assert_eq!(kill.presented_secret(), Some("s3cret"));
        assert_eq!(MessageContent::StatusAsk.presented_secret(), None);
    }
}
