//! Two-step authorization for messages only the directory may send.

use crate::actors::handler::{Handler, HandlerContext};
use crate::actors::messages::{AgentName, Message};
use anyhow::Result;
use async_trait::async_trait;

pub struct DirectoryGuard<'a> {
    directory: &'a AgentName,
    own_secret: &'a str,
}

impl<'a> DirectoryGuard<'a> {
    pub fn new(directory: &'a AgentName, own_secret: &'a str) -> Self {
        Self {
            directory,
            own_secret,
        }
    }

    /// Identity first, then the secret when the message carries one.
    pub fn admits(&self, message: &Message) -> bool {
        self.identity_matches(message) && self.capability_matches(message)
    }

    fn identity_matches(&self, message: &Message) -> bool {
        &message.from == self.directory
    }

    fn capability_matches(&self, message: &Message) -> bool {
        match message.content.presented_secret() {
            Some(secret) => secret == self.own_secret,
            None => true,
        }
    }
}

/// Wraps a handler so messages failing the guard count as unrecognized.
pub struct DirectoryOnly<H> {
    inner: H,
}

impl<H: Handler> DirectoryOnly<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: Handler> Handler for DirectoryOnly<H> {
    fn description(&self) -> String {
        self.inner.description()
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        let runtime = cx.runtime();
        let guard = DirectoryGuard::new(runtime.directory_name(), &runtime.identity().shared_secret);
        if !guard.admits(&message) {
            tracing::warn!(
                "'{}' refused {:?} from '{}': not authorized",
                runtime.name(),
                message.kind(),
                message.from
            );
            if !cx.handler().is_reusable() {
                cx.halt();
            }
            return Ok(false);
        }
        self.inner.work(cx, message).await
    }
}
