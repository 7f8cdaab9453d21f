//! Error types shared across the agent runtime and the gated transport.

use crate::actors::messages::{AgentName, RequestId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no reply from '{to}' for request {request_id} within {after_ms}ms")]
    Timeout {
        to: AgentName,
        request_id: RequestId,
        after_ms: u64,
    },

    #[error("message router is closed")]
    RouterClosed,

    #[error("agent '{0}' has stopped")]
    AgentStopped(AgentName),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed chunk: {0}")]
    Malformed(String),

    #[error("chunk of {len} bytes exceeds limit of {max} bytes")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("request header exceeds {0} lines or bytes")]
    HeaderTooLong(usize),

    #[error("connection closed by peer")]
    Closed,

    #[error("no reply within {0}ms")]
    TimedOut(u64),
}

impl TransportError {
    /// Errors after which the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Malformed(_))
    }
}
