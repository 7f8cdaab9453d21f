//! Handlers every agent answers: status, live request map, recent log and kill.

use crate::actors::handler::{Handler, HandlerContext};
use crate::actors::handler_registry::HandlerRegistry;
use crate::actors::messages::{AgentStatus, ContentKind, Message, MessageContent};
use crate::directory::guard::DirectoryOnly;
use anyhow::Result;
use async_trait::async_trait;

pub(crate) fn register_builtins(registry: &mut HandlerRegistry) {
    registry
        .register(ContentKind::StatusAsk, || Box::new(StatusHandler))
        .register(ContentKind::RequestMapAsk, || Box::new(RequestMapHandler))
        .register(ContentKind::LogAsk, || Box::new(LogHandler))
        .register(ContentKind::KillAsk, || {
            Box::new(DirectoryOnly::new(KillHandler))
        });
}

pub struct StatusHandler;

#[async_trait]
impl Handler for StatusHandler {
    fn description(&self) -> String {
        "status".to_string()
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        if !matches!(message.content, MessageContent::StatusAsk) {
            return Ok(false);
        }
        let runtime = cx.runtime();
        let status = AgentStatus {
            name: runtime.name().clone(),
            service_name: runtime.identity().service_name.clone(),
            uptime_seconds: runtime.uptime().as_secs(),
            live_handlers: runtime.live_handlers(),
        };
        cx.reply(&message, MessageContent::StatusTell { status }).await?;
        cx.halt();
        Ok(true)
    }
}

pub struct RequestMapHandler;

#[async_trait]
impl Handler for RequestMapHandler {
    fn description(&self) -> String {
        "request map".to_string()
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        if !matches!(message.content, MessageContent::RequestMapAsk) {
            return Ok(false);
        }
        let handlers = cx.runtime().handler_infos();
        cx.reply(&message, MessageContent::RequestMapTell { handlers })
            .await?;
        cx.halt();
        Ok(true)
    }
}

pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    fn description(&self) -> String {
        "log".to_string()
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        let MessageContent::LogAsk { lines } = message.content else {
            return Ok(false);
        };
        let lines = cx.runtime().recent_events(lines);
        cx.reply(&message, MessageContent::LogTell { lines }).await?;
        cx.halt();
        Ok(true)
    }
}

/// Stops the agent. Only reachable through [`DirectoryOnly`].
pub struct KillHandler;

#[async_trait]
impl Handler for KillHandler {
    fn description(&self) -> String {
        "kill".to_string()
    }

    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool> {
        if !matches!(message.content, MessageContent::KillAsk { .. }) {
            return Ok(false);
        }
        tracing::warn!("'{}' killed by '{}'", cx.runtime().name(), message.from);
        cx.reply(&message, MessageContent::KillTell { killed: true })
            .await?;
        cx.halt();

        let runtime = cx.runtime().clone();
        tokio::spawn(async move { runtime.shutdown().await });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::actors::agent_runtime::{AgentIdentity, AgentRuntime};
    use crate::actors::handler_registry::HandlerRegistry;
    use crate::actors::message_router::MessageRouterHandle;
    use crate::actors::messages::{AgentName, Message, MessageContent, RequestId};
    use crate::config::Settings;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    async fn wrapper(router: &MessageRouterHandle) -> AgentRuntime {
        AgentRuntime::start(
            AgentIdentity::new("wrapper", "/source/acm", "wrapper-secret"),
            HandlerRegistry::with_builtins(),
            router.clone(),
            &Settings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_status_and_log() {
        let router = MessageRouterHandle::new(32);
        let wrapper = wrapper(&router).await;
        let admin = AgentRuntime::start(
            AgentIdentity::new("admin", "/service/admin", "x"),
            HandlerRegistry::new(),
            router.clone(),
            &Settings::default(),
        )
        .await
        .unwrap();

        let reply = admin
            .ask("wrapper", MessageContent::StatusAsk, Duration::from_secs(1))
            .await
            .unwrap();
        match reply.content {
            MessageContent::StatusTell { status } => {
                assert_eq!(status.name, AgentName::new("wrapper"));
                assert_eq!(status.service_name, "/source/acm");
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = admin
            .ask("wrapper", MessageContent::LogAsk { lines: 5 }, Duration::from_secs(1))
            .await
            .unwrap();
        match reply.content {
            MessageContent::LogTell { lines } => {
                assert!(lines.iter().any(|l| l.contains("started as /source/acm")))
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(!wrapper.is_stopped());
    }

    #[tokio::test]
    async fn test_kill_requires_directory_identity_and_secret() {
        let router = MessageRouterHandle::new(32);
        let wrapper = wrapper(&router).await;

        let (tx, mut rx) = mpsc::channel(8);
        router.attach(AgentName::new("intruder"), tx).await.unwrap();
        router
            .deliver(Message::new(
                "intruder",
                "wrapper",
                RequestId::generate(),
                MessageContent::KillAsk {
                    shared_secret: "wrapper-secret".to_string(),
                },
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!wrapper.is_stopped());
        assert!(rx.try_recv().is_err());

        let (tx, mut rx) = mpsc::channel(8);
        router.attach(AgentName::new("directory"), tx).await.unwrap();
        router
            .deliver(Message::new(
                "directory",
                "wrapper",
                RequestId::generate(),
                MessageContent::KillAsk {
                    shared_secret: "wrapper-secret".to_string(),
                },
            ))
            .await
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.content, MessageContent::KillTell { killed: true });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(wrapper.is_stopped());
    }
}
