//! Request Handler - one mailbox and one control loop per logical request
//!
//! Information Hiding:
//! - Queue, wake signal and phase flag hidden behind enqueue/halt
//! - Handling strategy plugged in through the `Handler` trait
//! - Runtime binding established once by `init`

use crate::actors::agent_runtime::AgentRuntime;
use crate::actors::messages::{AgentName, HandlerInfo, Message, MessageContent, RequestId};
use crate::error::AgentError;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Handling strategy run by a [`RequestHandler`].
#[async_trait]
pub trait Handler: Send {
    fn description(&self) -> String;

    /// Process one message. `Ok(false)` means the message was not recognized.
    async fn work(&mut self, cx: &HandlerContext, message: Message) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    Created,
    Running,
    Halted,
}

struct Binding {
    request_id: RequestId,
    runtime: AgentRuntime,
}

pub struct RequestHandler {
    description: String,
    reusable: bool,
    binding: OnceLock<Binding>,
    queue: Mutex<VecDeque<Message>>,
    phase: Mutex<HandlerPhase>,
    initial_message: OnceLock<Message>,
    send_partial_results: AtomicBool,
    started_at: Instant,
    wake: Notify,
}

impl RequestHandler {
    pub fn new(description: impl Into<String>, reusable: bool) -> Arc<Self> {
        Arc::new(Self {
            description: description.into(),
            reusable,
            binding: OnceLock::new(),
            queue: Mutex::new(VecDeque::new()),
            phase: Mutex::new(HandlerPhase::Created),
            initial_message: OnceLock::new(),
            send_partial_results: AtomicBool::new(false),
            started_at: Instant::now(),
            wake: Notify::new(),
        })
    }

    /// Bind the handler to its request and runtime.
    ///
    /// # Panics
    /// When called a second time: double initialization is a framework bug.
    pub fn init(&self, request_id: RequestId, runtime: AgentRuntime) {
        let bound = self.binding.set(Binding {
            request_id: request_id.clone(),
            runtime,
        });
        if bound.is_err() {
            panic!(
                "request handler '{}' initialized twice (second request id {})",
                self.description, request_id
            );
        }

        let mut phase = self.phase.lock();
        if *phase == HandlerPhase::Created {
            *phase = HandlerPhase::Running;
        }
    }

    /// Append a message to the mailbox and wake the loop.
    ///
    /// Returns false when the message was dropped (`None` or handler halted).
    pub fn enqueue(&self, message: Option<Message>) -> bool {
        let Some(message) = message else {
            return false;
        };
        if self.is_halted() {
            tracing::debug!(
                "Dropping {:?} for halted handler '{}'",
                message.kind(),
                self.description
            );
            return false;
        }

        let _ = self.initial_message.set(message.clone());
        self.queue.lock().push_back(message);
        self.wake.notify_one();
        true
    }

    /// Stop the loop. Safe to call any number of times.
    pub fn halt(&self) {
        let mut phase = self.phase.lock();
        if *phase != HandlerPhase::Halted {
            *phase = HandlerPhase::Halted;
            tracing::debug!("Handler '{}' halted", self.description);
        }
        drop(phase);
        self.wake.notify_one();
    }

    pub fn is_halted(&self) -> bool {
        *self.phase.lock() == HandlerPhase::Halted
    }

    pub fn phase(&self) -> HandlerPhase {
        *self.phase.lock()
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.binding.get().map(|b| &b.request_id)
    }

    pub fn initial_message(&self) -> Option<&Message> {
        self.initial_message.get()
    }

    pub fn send_partial_results(&self) -> bool {
        self.send_partial_results.load(Ordering::SeqCst)
    }

    pub fn set_send_partial_results(&self, enabled: bool) {
        self.send_partial_results.store(enabled, Ordering::SeqCst);
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn info(&self) -> HandlerInfo {
        HandlerInfo {
            request_id: self.request_id().cloned(),
            description: self.description.clone(),
            running: !self.is_halted(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Control loop: drain the mailbox through `logic` until halted.
    pub async fn run(self: Arc<Self>, mut logic: Box<dyn Handler>) {
        let Some(binding) = self.binding.get() else {
            tracing::error!("Handler '{}' run before init", self.description);
            self.halt();
            return;
        };

        let cx = HandlerContext {
            handler: self.clone(),
            runtime: binding.runtime.clone(),
            request_id: binding.request_id.clone(),
        };

        tracing::debug!(
            "Handler '{}' running for request {}",
            self.description,
            binding.request_id
        );

        loop {
            if self.is_halted() {
                break;
            }

            let next = self.queue.lock().pop_front();
            match next {
                Some(message) => self.process(logic.as_mut(), &cx, message).await,
                None => self.wake.notified().await,
            }
        }

        binding.runtime.forget(&self);
        tracing::debug!(
            "Handler '{}' for request {} finished after {:?}",
            self.description,
            binding.request_id,
            self.started_at.elapsed()
        );
    }

    async fn process(&self, logic: &mut dyn Handler, cx: &HandlerContext, message: Message) {
        let kind = message.kind();
        let from = message.from.clone();

        match logic.work(cx, message).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Handler '{}' did not recognize {:?} from '{}' (request {})",
                    self.description,
                    kind,
                    from,
                    cx.request_id
                );
                cx.runtime.record_event(format!(
                    "unrecognized {:?} from {} in '{}'",
                    kind, from, self.description
                ));
            }
            Err(e) => {
                tracing::error!(
                    "Handler '{}' failed on {:?} from '{}': {:#}",
                    self.description,
                    kind,
                    from,
                    e
                );
                cx.runtime
                    .record_event(format!("error in '{}': {}", self.description, e));
            }
        }
    }
}

/// What a handler sees of its own request while working.
pub struct HandlerContext {
    handler: Arc<RequestHandler>,
    runtime: AgentRuntime,
    request_id: RequestId,
}

impl HandlerContext {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    pub fn initial_message(&self) -> Option<&Message> {
        self.handler.initial_message()
    }

    /// Send under this handler's request id.
    pub async fn send(
        &self,
        to: impl Into<AgentName>,
        content: MessageContent,
    ) -> Result<(), AgentError> {
        self.runtime
            .send(to, self.request_id.clone(), content)
            .await
    }

    /// Answer `message` on its own request id.
    pub async fn reply(&self, message: &Message, content: MessageContent) -> Result<(), AgentError> {
        self.runtime.reply(message, content).await
    }

    pub fn halt(&self) {
        self.handler.halt();
    }

    /// Deliver `content` to this handler's own mailbox after `delay`.
    pub fn schedule(&self, delay: Duration, content: MessageContent) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let message = Message::new(
            self.runtime.name().clone(),
            self.runtime.name().clone(),
            self.request_id.clone(),
            content,
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler.enqueue(Some(message));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::agent_runtime::AgentIdentity;
    use crate::actors::handler_registry::HandlerRegistry;
    use crate::actors::message_router::MessageRouterHandle;
    use crate::config::Settings;
    use tokio::sync::mpsc;

    struct Recorder {
        seen: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Handler for Recorder {
        fn description(&self) -> String {
            "recorder".to_string()
        }

        async fn work(&mut self, _cx: &HandlerContext, message: Message) -> Result<bool> {
            match message.content {
                MessageContent::LogAsk { lines } => {
                    let _ = self.seen.send(format!("log-{}", lines));
                    Ok(true)
                }
                MessageContent::ErrorTell { reason } => Err(anyhow::anyhow!(reason)),
                _ => Ok(false),
            }
        }
    }

    async fn runtime() -> AgentRuntime {
        let settings = Settings::default();
        let router = MessageRouterHandle::new(16);
        AgentRuntime::start(
            AgentIdentity::new("tester", "/service/test", "secret"),
            HandlerRegistry::new(),
            router,
            &settings,
        )
        .await
        .unwrap()
    }

    fn log_ask(lines: usize) -> Message {
        Message::new("peer", "tester", RequestId::new("r-1"), MessageContent::LogAsk { lines })
    }

    #[tokio::test]
    async fn test_messages_processed_in_enqueue_order() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", false);
        handler.init(RequestId::new("r-1"), runtime);

        for i in 0..20 {
            assert!(handler.enqueue(Some(log_ask(i))));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(handler.clone().run(Box::new(Recorder { seen: tx })));

        for i in 0..20 {
            assert_eq!(rx.recv().await.unwrap(), format!("log-{}", i));
        }

        handler.halt();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_and_failing_messages_do_not_stop_the_loop() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", false);
        handler.init(RequestId::new("r-1"), runtime);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(handler.clone().run(Box::new(Recorder { seen: tx })));

        handler.enqueue(Some(Message::new(
            "peer",
            "tester",
            RequestId::new("r-1"),
            MessageContent::StatusAsk,
        )));
        handler.enqueue(Some(Message::new(
            "peer",
            "tester",
            RequestId::new("r-1"),
            MessageContent::ErrorTell {
                reason: "boom".to_string(),
            },
        )));
        handler.enqueue(Some(log_ask(7)));

        assert_eq!(rx.recv().await.unwrap(), "log-7");
        assert!(!handler.is_halted());

        handler.halt();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_none_is_ignored_and_first_message_is_initial() {
        let handler = RequestHandler::new("recorder", false);
        assert!(!handler.enqueue(None));
        assert!(handler.initial_message().is_none());

        handler.enqueue(Some(log_ask(1)));
        handler.enqueue(Some(log_ask(2)));
        assert_eq!(handler.queued(), 2);
        assert_eq!(
            handler.initial_message().map(|m| m.content.clone()),
            Some(MessageContent::LogAsk { lines: 1 })
        );
    }

    #[tokio::test]
    #[should_panic(expected = "initialized twice")]
    async fn test_init_twice_panics() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", false);
        handler.init(RequestId::new("r-1"), runtime.clone());
        handler.init(RequestId::new("r-2"), runtime);
    }

    #[tokio::test]
    async fn test_halt_is_idempotent_and_terminal() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", false);
        assert_eq!(handler.phase(), HandlerPhase::Created);
        handler.init(RequestId::new("r-1"), runtime);
        assert_eq!(handler.phase(), HandlerPhase::Running);

        for _ in 0..3 {
            handler.halt();
            assert!(handler.is_halted());
        }

        assert!(!handler.enqueue(Some(log_ask(1))));
        assert_eq!(handler.queued(), 0);
        assert!(!handler.info().running);

        let (tx, _rx) = mpsc::unbounded_channel();
        // A halted handler's loop returns immediately.
        handler.clone().run(Box::new(Recorder { seen: tx })).await;
        assert_eq!(handler.phase(), HandlerPhase::Halted);
    }

    #[tokio::test]
    async fn test_info_reports_description_and_request() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", true);
        handler.init(RequestId::new("r-9"), runtime);

        let info = handler.info();
        assert_eq!(info.description, "recorder");
        assert_eq!(info.request_id, Some(RequestId::new("r-9")));
        assert!(info.running);
        assert!(handler.is_reusable());
    }

    #[test]
    fn test_partial_results_flag_defaults_off() {
        let handler = RequestHandler::new("recorder", false);
        assert!(!handler.send_partial_results());
        handler.set_send_partial_results(true);
        assert!(handler.send_partial_results());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_delivers_to_own_mailbox() {
        let runtime = runtime().await;
        let handler = RequestHandler::new("recorder", false);
        handler.init(RequestId::new("r-1"), runtime.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(handler.clone().run(Box::new(Recorder { seen: tx })));

        let cx = HandlerContext {
            handler: handler.clone(),
            runtime,
            request_id: RequestId::new("r-1"),
        };
        cx.schedule(Duration::from_secs(3), MessageContent::LogAsk { lines: 3 });

        assert_eq!(rx.recv().await.unwrap(), "log-3");
        handler.halt();
        task.await.unwrap();
    }
}
