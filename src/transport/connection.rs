//! Gated Connection - one client socket disguised as an endless HTTP response
//!
//! Information Hiding:
//! - Receiver, sender and keep-alive loops run as private tasks
//! - Loops coordinate only through the state watch and the send queue
//! - Halting drains queued chunks before the socket is closed

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::codec::{self, ChunkReader, KEEP_ALIVE_CHUNK};
use crate::transport::http;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Running,
    Leaving,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Accepted,
    Rejected,
}

/// The agent side of a connection: consumes received chunks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn on_chunk(&self, connection: &Arc<Connection>, chunk: String) -> ChunkOutcome;

    async fn on_closed(&self, _connection: &Arc<Connection>) {}
}

pub struct Connection {
    id: ConnectionId,
    settings: TransportConfig,
    send_queue: Mutex<VecDeque<String>>,
    state: watch::Sender<ConnectionState>,
    rejected: AtomicU32,
}

impl Connection {
    pub fn new(id: ConnectionId, settings: TransportConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Init);
        Arc::new(Self {
            id,
            settings,
            send_queue: Mutex::new(VecDeque::new()),
            state,
            rejected: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_halted(&self) -> bool {
        self.state() == ConnectionState::Halted
    }

    pub fn queued(&self) -> usize {
        self.send_queue.lock().len()
    }

    /// Queue a chunk for the sender loop. Refused once the connection is leaving.
    pub fn enqueue(&self, chunk: String) -> bool {
        match self.state() {
            ConnectionState::Init | ConnectionState::Running => {
                self.send_queue.lock().push_back(chunk);
                true
            }
            ConnectionState::Leaving | ConnectionState::Halted => false,
        }
    }

    /// Begin the halting sequence. No-op when already leaving or halted.
    pub fn halt(&self) {
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Init | ConnectionState::Running => {
                *state = ConnectionState::Leaving;
                true
            }
            ConnectionState::Leaving | ConnectionState::Halted => false,
        });
        if changed {
            tracing::debug!("Connection {} leaving", self.id);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    /// Counts a rejected chunk. True once the tolerated count is exceeded.
    fn note_rejection(&self) -> bool {
        let rejected = self.rejected.fetch_add(1, Ordering::SeqCst) + 1;
        rejected > self.settings.max_rejected_chunks
    }

    fn note_acceptance(&self) {
        self.rejected.store(0, Ordering::SeqCst);
    }

    /// Owner loop: handshake, start receiver and sender, keep alive, then halt in order.
    pub async fn run<S, F>(self: Arc<Self>, stream: S, sink: Arc<dyn ChunkSink>, on_halted: F)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(&ConnectionId) + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let handshake = timeout(self.settings.handshake_timeout(), async {
            match http::read_request_header(&mut reader).await {
                Ok(request_line) => {
                    tracing::debug!("Connection {} opened by '{}'", self.id, request_line);
                    http::write_response_header(&mut write_half, &self.settings.server_name).await
                }
                Err(e) => Err(e),
            }
        });
        let failure = match handshake.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("no request header before handshake timeout".to_string()),
        };
        if let Some(reason) = failure {
            tracing::warn!("Connection {} failed handshake: {}", self.id, reason);
            self.set_state(ConnectionState::Halted);
            sink.on_closed(&self).await;
            on_halted(&self.id);
            return;
        }

        let running = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Init {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            self.set_state(ConnectionState::Halted);
            sink.on_closed(&self).await;
            on_halted(&self.id);
            return;
        }
        tracing::info!("Connection {} running", self.id);
        let mut state_rx = self.state.subscribe();

        let chunks = ChunkReader::new(reader, self.settings.max_chunk_bytes);
        let mut receiver = tokio::spawn(self.clone().receive_loop(chunks, sink.clone()));
        let mut sender = tokio::spawn(self.clone().send_loop(write_half));

        let keep_alive = self.settings.keep_alive();
        let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
        while self.state() == ConnectionState::Running {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state() == ConnectionState::Running {
                        self.enqueue(KEEP_ALIVE_CHUNK.to_string());
                        tracing::trace!("Connection {} keep-alive queued", self.id);
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let grace = self.settings.drain_grace();
        if timeout(grace, &mut sender).await.is_err() {
            tracing::warn!(
                "Connection {} dropped {} queued chunks after drain grace",
                self.id,
                self.queued()
            );
            sender.abort();
        }
        if timeout(grace, &mut receiver).await.is_err() {
            receiver.abort();
        }

        self.send_queue.lock().clear();
        self.set_state(ConnectionState::Halted);
        tracing::info!("Connection {} halted", self.id);
        sink.on_closed(&self).await;
        on_halted(&self.id);
    }

    async fn receive_loop<R>(self: Arc<Self>, mut chunks: ChunkReader<R>, sink: Arc<dyn ChunkSink>)
    where
        R: AsyncRead + Unpin + Send,
    {
        let read_timeout = self.settings.read_timeout();
        let mut state_rx = self.state.subscribe();

        while self.state() == ConnectionState::Running {
            let read = tokio::select! {
                read = timeout(read_timeout, chunks.read_chunk()) => read,
                _ = state_rx.changed() => continue,
            };

            let chunk = match read {
                Err(_) => continue,
                Ok(Ok(chunk)) => chunk,
                Ok(Err(TransportError::Closed)) => {
                    tracing::info!("Connection {} closed by peer", self.id);
                    self.halt();
                    break;
                }
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::warn!("Connection {} read failed: {}", self.id, e);
                    self.halt();
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Connection {} received malformed chunk: {}", self.id, e);
                    if self.note_rejection() {
                        self.halt_for_rejections();
                        break;
                    }
                    continue;
                }
            };

            if chunk == KEEP_ALIVE_CHUNK {
                self.note_acceptance();
                continue;
            }

            match sink.on_chunk(&self, chunk).await {
                ChunkOutcome::Accepted => self.note_acceptance(),
                ChunkOutcome::Rejected => {
                    if self.note_rejection() {
                        self.halt_for_rejections();
                        break;
                    }
                }
            }
        }
    }

    fn halt_for_rejections(&self) {
        tracing::warn!(
            "Connection {} exceeded {} consecutive rejected chunks",
            self.id,
            self.settings.max_rejected_chunks
        );
        self.halt();
    }

    async fn send_loop<W>(self: Arc<Self>, mut writer: W)
    where
        W: AsyncWrite + Unpin + Send,
    {
        let max_chunk = self.settings.max_chunk_bytes;
        let poll = self.settings.send_poll();

        loop {
            let next = self.send_queue.lock().pop_front();
            match next {
                Some(chunk) => {
                    // Nothing is written for an oversized chunk, so framing survives its loss.
                    let frame = match codec::encode_chunk(&chunk, max_chunk) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!("Connection {} dropped an outgoing chunk: {}", self.id, e);
                            continue;
                        }
                    };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        tracing::warn!("Connection {} write failed: {}", self.id, e);
                        self.halt();
                        break;
                    }
                }
                None => {
                    if self.state() != ConnectionState::Running {
                        break;
                    }
                    sleep(poll).await;
                }
            }
        }

        let _ = writer.shutdown().await;
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
