//! Gated Server - accept loop and connection table
//!
//! Information Hiding:
//! - Listener and accept timeout hidden behind spawn/stop
//! - Connection ids generated internally, unique for the process lifetime
//! - Unknown ids are tolerated: closes race with in-flight sends

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::connection::{ChunkSink, Connection, ConnectionId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

/// Pause after a failed accept; errors such as EMFILE persist until a descriptor frees up.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Produces `<local port>:<creation millis in hex>`, bumping the timestamp on collisions.
pub struct ConnectionIdGenerator {
    port: u16,
    last_millis: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut last = self.last_millis.load(Ordering::SeqCst);
        let millis = loop {
            let candidate = now.max(last + 1);
            match self.last_millis.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };
        ConnectionId::new(format!("{}:{:x}", self.port, millis))
    }
}

type ConnectionTable = Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>;

pub struct GatedServer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    connections: ConnectionTable,
    ids: ConnectionIdGenerator,
    sink: Arc<dyn ChunkSink>,
    settings: TransportConfig,
    running: AtomicBool,
}

impl GatedServer {
    pub async fn bind(
        settings: TransportConfig,
        sink: Arc<dyn ChunkSink>,
    ) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(&settings.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Gated server listening on {}", local_addr);

        Ok(Arc::new(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            connections: Arc::new(RwLock::new(HashMap::new())),
            ids: ConnectionIdGenerator::new(local_addr.port()),
            sink,
            settings,
            running: AtomicBool::new(true),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop. Returns `None` if it was already started.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let listener = self.listener.lock().take()?;
        Some(tokio::spawn(self.clone().accept_loop(listener)))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let accept_timeout = self.settings.accept_timeout();

        while self.running.load(Ordering::SeqCst) {
            match timeout(accept_timeout, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, peer))) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                    }
                    self.open(stream, peer);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Accept failed: {}, backing off {:?}", e, ACCEPT_BACKOFF);
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        tracing::info!("Gated server on {} stopped accepting", self.local_addr);
        for connection in self.connections.read().values() {
            connection.halt();
        }
    }

    fn open(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.ids.next_id();
        let connection = Connection::new(id.clone(), self.settings.clone());
        self.connections.write().insert(id.clone(), connection.clone());
        tracing::info!("Accepted {} as connection {}", peer, id);

        let table = self.connections.clone();
        tokio::spawn(connection.run(stream, self.sink.clone(), move |id| {
            table.write().remove(id);
        }));
    }

    /// Queue `chunk` on connection `id`. Unknown or closing connections drop it.
    pub fn send(&self, id: &ConnectionId, chunk: String) -> bool {
        let connection = self.connections.read().get(id).cloned();
        match connection {
            Some(connection) => connection.enqueue(chunk),
            None => {
                tracing::debug!("Dropping chunk for unknown connection {}", id);
                false
            }
        }
    }

    pub fn halt_connection(&self, id: &ConnectionId) {
        if let Some(connection) = self.connections.read().get(id) {
            connection.halt();
        }
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn connections(&self) -> usize {
        self.connections.read().len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop accepting; the accept loop halts every connection on its way out.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping gated server on {}", self.local_addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::client::GatedClient;
    use crate::transport::connection::ChunkOutcome;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::time::{sleep, Duration};

    struct Echo;

    #[async_trait]
    impl ChunkSink for Echo {
        async fn on_chunk(&self, connection: &Arc<Connection>, chunk: String) -> ChunkOutcome {
            connection.enqueue(chunk.to_uppercase());
            ChunkOutcome::Accepted
        }
    }

    fn settings() -> TransportConfig {
        TransportConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            accept_timeout_ms: 50,
            read_timeout_ms: 50,
            send_poll_ms: 5,
            drain_grace_ms: 200,
            ..TransportConfig::default()
        }
    }

    async fn wait_for(server: &GatedServer, count: usize) {
        for _ in 0..100 {
            if server.connections() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} connections, found {}", count, server.connections());
    }

    #[test]
    fn test_ids_are_unique_and_carry_the_port() {
        let ids = ConnectionIdGenerator::new(7070);
        let generated: HashSet<ConnectionId> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(generated.len(), 1000);
        assert!(generated.iter().all(|id| id.as_str().starts_with("7070:")));
    }

    #[test]
    fn test_accept_backoff_is_shorter_than_the_accept_timeout() {
        assert!(ACCEPT_BACKOFF > Duration::ZERO);
        assert!(ACCEPT_BACKOFF < TransportConfig::default().accept_timeout());
    }

    #[tokio::test]
    async fn test_echo_through_server() {
        let server = GatedServer::bind(settings(), Arc::new(Echo)).await.unwrap();
        server.spawn().unwrap();
        assert!(server.spawn().is_none());

        let mut client = GatedClient::connect(server.local_addr(), 1024).await.unwrap();
        client.send("hello").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), "HELLO");
        wait_for(&server, 1).await;

        let id = server.connection_ids().remove(0);
        assert!(server.send(&id, "pushed".to_string()));
        assert_eq!(client.recv().await.unwrap(), "pushed");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_no_ops() {
        let server = GatedServer::bind(settings(), Arc::new(Echo)).await.unwrap();
        let ghost = ConnectionId::new("1:dead");
        assert!(!server.send(&ghost, "x".to_string()));
        server.halt_connection(&ghost);
        assert_eq!(server.connections(), 0);
    }

    #[tokio::test]
    async fn test_halted_connection_is_forgotten() {
        let server = GatedServer::bind(settings(), Arc::new(Echo)).await.unwrap();
        server.spawn().unwrap();

        let _a = GatedClient::connect(server.local_addr(), 1024).await.unwrap();
        let b = GatedClient::connect(server.local_addr(), 1024).await.unwrap();
        wait_for(&server, 2).await;

        drop(b);
        wait_for(&server, 1).await;

        let id = server.connection_ids().remove(0);
        server.halt_connection(&id);
        wait_for(&server, 0).await;
        assert!(!server.send(&id, "late".to_string()));
    }

    #[tokio::test]
    async fn test_stop_halts_everything() {
        let server = GatedServer::bind(settings(), Arc::new(Echo)).await.unwrap();
        let accept = server.spawn().unwrap();

        let _client = GatedClient::connect(server.local_addr(), 1024).await.unwrap();
        wait_for(&server, 1).await;

        server.stop();
        tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .unwrap()
            .unwrap();
        wait_for(&server, 0).await;
    }
}
