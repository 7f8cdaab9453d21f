//! Agent Runtime - handler table, dispatch and send/ask primitives
//!
//! Information Hiding:
//! - Handler table and pending-ask table hidden behind dispatch
//! - Inbox loop and router attachment managed internally
//! - Event ring for `LogAsk` kept private

use crate::actors::handler::{Handler, RequestHandler};
use crate::actors::handler_registry::{HandlerRegistry, Starter};
use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{AgentName, HandlerInfo, Message, MessageContent, RequestId};
use crate::config::Settings;
use crate::error::AgentError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver};
use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout, Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct AgentIdentity {
    pub name: AgentName,
    pub service_name: String,
    pub shared_secret: String,
}

impl AgentIdentity {
    pub fn new(
        name: impl Into<AgentName>,
        service_name: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_name: service_name.into(),
            shared_secret: shared_secret.into(),
        }
    }
}

#[derive(Default)]
struct HandlerTable {
    by_request: HashMap<RequestId, Arc<RequestHandler>>,
    reusable: HashMap<&'static str, Arc<RequestHandler>>,
}

struct RuntimeInner {
    identity: AgentIdentity,
    directory: AgentName,
    router: MessageRouterHandle,
    registry: HandlerRegistry,
    table: Mutex<HandlerTable>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Message>>>,
    events: Mutex<VecDeque<String>>,
    log_capacity: usize,
    ask_timeout: Duration,
    started_at: Instant,
    stopped: AtomicBool,
    stop_signal: Notify,
}

/// Handle to a running agent. Cheap to clone.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

enum Route {
    Live(Arc<RequestHandler>),
    Started(Arc<RequestHandler>, Box<dyn Handler>),
    Unhandled,
}

impl AgentRuntime {
    /// Attach `identity.name` to the router and start the inbox loop.
    pub async fn start(
        identity: AgentIdentity,
        registry: HandlerRegistry,
        router: MessageRouterHandle,
        settings: &Settings,
    ) -> Result<Self, AgentError> {
        let (sender, receiver) = channel(settings.agent.channel_buffer_size);

        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                directory: AgentName::new(settings.directory.name.clone()),
                identity,
                router: router.clone(),
                registry,
                table: Mutex::new(HandlerTable::default()),
                pending: Mutex::new(HashMap::new()),
                events: Mutex::new(VecDeque::new()),
                log_capacity: settings.agent.log_capacity,
                ask_timeout: settings.agent.ask_timeout(),
                started_at: Instant::now(),
                stopped: AtomicBool::new(false),
                stop_signal: Notify::new(),
            }),
        };

        if !router.attach(runtime.name().clone(), sender).await? {
            return Err(AgentError::UnexpectedReply(format!(
                "agent name '{}' is already in use",
                runtime.name()
            )));
        }

        tokio::spawn(inbox_loop(runtime.clone(), receiver));
        runtime.record_event(format!("started as {}", runtime.inner.identity.service_name));
        tracing::info!(
            "Agent '{}' started ({})",
            runtime.name(),
            runtime.inner.identity.service_name
        );

        Ok(runtime)
    }

    pub fn name(&self) -> &AgentName {
        &self.inner.identity.name
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.inner.identity
    }

    pub fn directory_name(&self) -> &AgentName {
        &self.inner.directory
    }

    pub fn router(&self) -> &MessageRouterHandle {
        &self.inner.router
    }

    pub fn ask_timeout(&self) -> Duration {
        self.inner.ask_timeout
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub async fn send(
        &self,
        to: impl Into<AgentName>,
        request_id: RequestId,
        content: MessageContent,
    ) -> Result<(), AgentError> {
        let message = Message::new(self.name().clone(), to, request_id, content);
        tracing::debug!(
            "'{}' -> '{}': {:?} (request {})",
            message.from,
            message.to,
            message.kind(),
            message.request_id
        );
        self.inner.router.deliver(message).await
    }

    pub async fn reply(&self, message: &Message, content: MessageContent) -> Result<(), AgentError> {
        self.send(message.from.clone(), message.request_id.clone(), content)
            .await
    }

    /// Send under a fresh request id and wait for the first message carrying it back.
    pub async fn ask(
        &self,
        to: impl Into<AgentName>,
        content: MessageContent,
        within: Duration,
    ) -> Result<Message, AgentError> {
        let to = to.into();
        let request_id = RequestId::generate();
        let (response, response_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .insert(request_id.clone(), response);

        if let Err(e) = self.send(to.clone(), request_id.clone(), content).await {
            self.inner.pending.lock().remove(&request_id);
            return Err(e);
        }

        match timeout(within, response_rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(AgentError::AgentStopped(self.name().clone())),
            Err(_) => {
                self.inner.pending.lock().remove(&request_id);
                tracing::warn!("Ask to '{}' timed out after {:?}", to, within);
                Err(AgentError::Timeout {
                    to,
                    request_id,
                    after_ms: within.as_millis() as u64,
                })
            }
        }
    }

    /// `ask` bounded by the configured timeout.
    pub async fn ask_default(
        &self,
        to: impl Into<AgentName>,
        content: MessageContent,
    ) -> Result<Message, AgentError> {
        self.ask(to, content, self.inner.ask_timeout).await
    }

    pub async fn register_with_directory(&self) -> Result<(), AgentError> {
        let identity = &self.inner.identity;
        self.send(
            self.inner.directory.clone(),
            RequestId::generate(),
            MessageContent::RegisterNotify {
                name: identity.name.clone(),
                service_name: identity.service_name.clone(),
                shared_secret: identity.shared_secret.clone(),
            },
        )
        .await
    }

    /// Route one incoming message to a pending ask, a live handler or a newly started one.
    pub fn dispatch(&self, message: Message) {
        if self.is_stopped() {
            return;
        }

        let pending = self.inner.pending.lock().remove(&message.request_id);
        if let Some(response) = pending {
            let _ = response.send(message);
            return;
        }

        let route = self.route(&message);
        match route {
            Route::Live(handler) => {
                handler.enqueue(Some(message));
            }
            Route::Started(handler, logic) => {
                tokio::spawn(handler.run(logic));
            }
            Route::Unhandled => {
                tracing::warn!(
                    "'{}' has no handler for {:?} from '{}' (request {})",
                    self.name(),
                    message.kind(),
                    message.from,
                    message.request_id
                );
                self.record_event(format!(
                    "unhandled {:?} from {}",
                    message.kind(),
                    message.from
                ));
            }
        }
    }

    fn route(&self, message: &Message) -> Route {
        let mut table = self.inner.table.lock();

        if let Some(handler) = table.by_request.get(&message.request_id) {
            return Route::Live(handler.clone());
        }

        match self.inner.registry.starter(message.kind()) {
            Some(Starter::Reusable(name)) => {
                let name = *name;
                if let Some(handler) = table.reusable.get(name) {
                    return Route::Live(handler.clone());
                }
                let Some(factory) = self.inner.registry.reusable_factory(name) else {
                    return Route::Unhandled;
                };
                let logic = factory();
                let handler = RequestHandler::new(logic.description(), true);
                handler.init(RequestId::new(name), self.clone());
                handler.enqueue(Some(message.clone()));
                table.reusable.insert(name, handler.clone());
                self.record_event(format!("started reusable handler '{}'", name));
                Route::Started(handler, logic)
            }
            Some(Starter::PerRequest(factory)) => {
                let logic = factory();
                let handler = RequestHandler::new(logic.description(), false);
                handler.init(message.request_id.clone(), self.clone());
                handler.enqueue(Some(message.clone()));
                table
                    .by_request
                    .insert(message.request_id.clone(), handler.clone());
                Route::Started(handler, logic)
            }
            None => Route::Unhandled,
        }
    }

    /// Drop a finished handler from the table.
    pub(crate) fn forget(&self, handler: &Arc<RequestHandler>) {
        let mut table = self.inner.table.lock();
        if handler.is_reusable() {
            table.reusable.retain(|_, h| !Arc::ptr_eq(h, handler));
        } else if let Some(request_id) = handler.request_id() {
            if table
                .by_request
                .get(request_id)
                .is_some_and(|h| Arc::ptr_eq(h, handler))
            {
                table.by_request.remove(request_id);
            }
        }
    }

    pub fn live_handler(&self, request_id: &RequestId) -> Option<Arc<RequestHandler>> {
        self.inner.table.lock().by_request.get(request_id).cloned()
    }

    pub fn handler_infos(&self) -> Vec<HandlerInfo> {
        let table = self.inner.table.lock();
        let mut infos: Vec<HandlerInfo> = table
            .reusable
            .values()
            .chain(table.by_request.values())
            .map(|h| h.info())
            .collect();
        infos.sort_by(|a, b| a.description.cmp(&b.description));
        infos
    }

    pub fn live_handlers(&self) -> usize {
        let table = self.inner.table.lock();
        table.by_request.len() + table.reusable.len()
    }

    pub fn record_event(&self, event: String) {
        let mut events = self.inner.events.lock();
        if events.len() >= self.inner.log_capacity.max(1) {
            events.pop_front();
        }
        events.push_back(format!("{} {}", Utc::now().format("%H:%M:%S%.3f"), event));
    }

    /// The most recent `lines` runtime events, oldest first.
    pub fn recent_events(&self, lines: usize) -> Vec<String> {
        let events = self.inner.events.lock();
        let skip = events.len().saturating_sub(lines);
        events.iter().skip(skip).cloned().collect()
    }

    /// Deregister, halt every handler, fail pending asks and leave the router.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Agent '{}' shutting down", self.name());

        if self.name() != &self.inner.directory {
            let _ = self
                .send(
                    self.inner.directory.clone(),
                    RequestId::generate(),
                    MessageContent::DeregisterNotify {
                        name: self.name().clone(),
                    },
                )
                .await;
        }

        let handlers: Vec<Arc<RequestHandler>> = {
            let mut guard = self.inner.table.lock();
            let table = &mut *guard;
            table
                .by_request
                .drain()
                .map(|(_, h)| h)
                .chain(table.reusable.drain().map(|(_, h)| h))
                .collect()
        };
        for handler in handlers {
            handler.halt();
        }

        self.inner.pending.lock().clear();
        let _ = self.inner.router.detach(self.name().clone()).await;
        self.inner.stop_signal.notify_one();
    }
}

async fn inbox_loop(runtime: AgentRuntime, mut receiver: Receiver<Message>) {
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => runtime.dispatch(message),
                None => {
                    tracing::debug!("Inbox of '{}' closed", runtime.name());
                    break;
                }
            },
            _ = runtime.inner.stop_signal.notified() => break,
        }
    }
    tracing::info!("Agent '{}' stopped", runtime.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::handler::HandlerContext;
    use crate::actors::messages::ContentKind;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Echoes `LogAsk{lines}` back as `LogTell` and halts after `stop_after` messages.
    struct Echo {
        seen: usize,
        stop_after: usize,
    }

    #[async_trait]
    impl Handler for Echo {
        fn description(&self) -> String {
            "echo".to_string()
        }

        async fn work(&mut self, cx: &HandlerContext, message: Message) -> anyhow::Result<bool> {
            let MessageContent::LogAsk { lines } = message.content else {
                return Ok(false);
            };
            self.seen += 1;
            cx.reply(
                &message,
                MessageContent::LogTell {
                    lines: vec![format!("{}#{}", lines, self.seen)],
                },
            )
            .await?;
            if self.seen >= self.stop_after {
                cx.halt();
            }
            Ok(true)
        }
    }

    async fn agent(router: &MessageRouterHandle, name: &str, registry: HandlerRegistry) -> AgentRuntime {
        AgentRuntime::start(
            AgentIdentity::new(name, format!("/service/{}", name), "secret"),
            registry,
            router.clone(),
            &Settings::default(),
        )
        .await
        .unwrap()
    }

    async fn probe(router: &MessageRouterHandle) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(16);
        router.attach(AgentName::new("probe"), tx).await.unwrap();
        rx
    }

    fn log_ask(request: &str, lines: usize) -> Message {
        Message::new("probe", "echo", RequestId::new(request), MessageContent::LogAsk { lines })
    }

    #[tokio::test]
    async fn test_same_request_id_reaches_the_same_handler() {
        let router = MessageRouterHandle::new(32);
        let mut registry = HandlerRegistry::new();
        registry.register(ContentKind::LogAsk, || Box::new(Echo { seen: 0, stop_after: 2 }));
        let runtime = agent(&router, "echo", registry).await;
        let mut probe = probe(&router).await;

        router.deliver(log_ask("r-1", 1)).await.unwrap();
        router.deliver(log_ask("r-1", 2)).await.unwrap();
        router.deliver(log_ask("r-2", 3)).await.unwrap();

        let mut replies = Vec::new();
        for _ in 0..3 {
            let reply = probe.recv().await.unwrap();
            if let MessageContent::LogTell { lines } = reply.content {
                replies.push((reply.request_id.to_string(), lines[0].clone()));
            }
        }
        replies.sort();
        assert_eq!(
            replies,
            vec![
                ("r-1".to_string(), "1#1".to_string()),
                ("r-1".to_string(), "2#2".to_string()),
                ("r-2".to_string(), "3#1".to_string()),
            ]
        );

        // r-1 halted after two messages and was forgotten.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(runtime.live_handler(&RequestId::new("r-1")).is_none());
        assert!(runtime.live_handler(&RequestId::new("r-2")).is_some());
    }

    #[tokio::test]
    async fn test_reusable_handler_spans_requests() {
        let router = MessageRouterHandle::new(32);
        let mut registry = HandlerRegistry::new();
        registry.register_reusable("echoes", &[ContentKind::LogAsk], || {
            Box::new(Echo { seen: 0, stop_after: usize::MAX })
        });
        let runtime = agent(&router, "echo", registry).await;
        let mut probe = probe(&router).await;

        router.deliver(log_ask("r-1", 1)).await.unwrap();
        router.deliver(log_ask("r-2", 2)).await.unwrap();

        let first = probe.recv().await.unwrap();
        let second = probe.recv().await.unwrap();
        assert_eq!(first.request_id, RequestId::new("r-1"));
        assert_eq!(
            second.content,
            MessageContent::LogTell {
                lines: vec!["2#2".to_string()]
            }
        );
        assert_eq!(runtime.live_handlers(), 1);
        assert_eq!(runtime.handler_infos()[0].request_id, Some(RequestId::new("echoes")));
    }

    #[tokio::test]
    async fn test_ask_round_trip() {
        let router = MessageRouterHandle::new(32);
        let mut registry = HandlerRegistry::new();
        registry.register(ContentKind::LogAsk, || Box::new(Echo { seen: 0, stop_after: 1 }));
        let _echo = agent(&router, "echo", registry).await;
        let caller = agent(&router, "caller", HandlerRegistry::new()).await;

        let reply = caller
            .ask("echo", MessageContent::LogAsk { lines: 5 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.from, AgentName::new("echo"));
        assert_eq!(
            reply.content,
            MessageContent::LogTell {
                lines: vec!["5#1".to_string()]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_without_reply_times_out() {
        let router = MessageRouterHandle::new(32);
        let _silent = agent(&router, "silent", HandlerRegistry::new()).await;
        let caller = agent(&router, "caller", HandlerRegistry::new()).await;

        let err = caller
            .ask("silent", MessageContent::StatusAsk, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_unhandled_message_is_logged_not_fatal() {
        let router = MessageRouterHandle::new(32);
        let runtime = agent(&router, "echo", HandlerRegistry::new()).await;

        runtime.dispatch(log_ask("r-1", 1));
        assert_eq!(runtime.live_handlers(), 0);
        assert!(runtime
            .recent_events(1)
            .last()
            .is_some_and(|e| e.contains("unhandled LogAsk")));
    }

    #[tokio::test]
    async fn test_event_ring_is_bounded() {
        let router = MessageRouterHandle::new(32);
        let mut settings = Settings::default();
        settings.agent.log_capacity = 3;
        let runtime = AgentRuntime::start(
            AgentIdentity::new("ring", "/service/ring", "s"),
            HandlerRegistry::new(),
            router,
            &settings,
        )
        .await
        .unwrap();

        for i in 0..10 {
            runtime.record_event(format!("event {}", i));
        }
        let events = runtime.recent_events(10);
        assert_eq!(events.len(), 3);
        assert!(events[2].ends_with("event 9"));
    }

    #[tokio::test]
    async fn test_shutdown_halts_handlers_and_detaches() {
        let router = MessageRouterHandle::new(32);
        let mut registry = HandlerRegistry::new();
        registry.register(ContentKind::LogAsk, || Box::new(Echo { seen: 0, stop_after: 10 }));
        let runtime = agent(&router, "echo", registry).await;
        let mut probe = probe(&router).await;

        router.deliver(log_ask("r-1", 1)).await.unwrap();
        probe.recv().await.unwrap();
        let handler = runtime.live_handler(&RequestId::new("r-1")).unwrap();

        runtime.shutdown().await;
        runtime.shutdown().await;

        assert!(handler.is_halted());
        assert!(runtime.is_stopped());
        assert_eq!(runtime.live_handlers(), 0);
        assert_eq!(router.agents().await.unwrap(), vec![AgentName::new("probe")]);
    }
}
