//! Client side of a gated session, used by the CLI and the integration tests.

use crate::actors::messages::Message;
use crate::error::TransportError;
use crate::transport::codec::{self, ChunkReader, KEEP_ALIVE_CHUNK};
use crate::transport::http;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{timeout, Duration};

pub struct GatedClient {
    reader: ChunkReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    max_chunk: usize,
}

impl GatedClient {
    /// Connect, send the request header and wait for the server's 200.
    pub async fn connect<A: ToSocketAddrs>(addr: A, max_chunk: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let host = stream.peer_addr()?.to_string();
        let (read_half, mut writer) = stream.into_split();

        writer.write_all(http::request_header(&host).as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(read_half);
        http::read_response_header(&mut reader).await?;
        tracing::debug!("Gated session open with {}", host);

        Ok(Self {
            reader: ChunkReader::new(reader, max_chunk),
            writer,
            max_chunk,
        })
    }

    pub async fn send(&mut self, chunk: &str) -> Result<(), TransportError> {
        codec::write_chunk(&mut self.writer, chunk, self.max_chunk).await
    }

    /// Next chunk from the server, skipping keep-alives.
    pub async fn recv(&mut self) -> Result<String, TransportError> {
        loop {
            let chunk = self.reader.read_chunk().await?;
            if chunk != KEEP_ALIVE_CHUNK {
                return Ok(chunk);
            }
        }
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let json = message
            .to_json()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.send(&json).await
    }

    pub async fn recv_message(&mut self) -> Result<Message, TransportError> {
        let chunk = self.recv().await?;
        Message::from_json(&chunk).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Send `message` and wait for the first reply on its request id. Other traffic is dropped.
    pub async fn request(&mut self, message: &Message, within: Duration) -> Result<Message, TransportError> {
        self.send_message(message).await?;
        let wait = async {
            loop {
                match self.recv_message().await {
                    Ok(reply) if reply.request_id == message.request_id => return Ok(reply),
                    Ok(reply) => {
                        tracing::debug!("Skipping {:?} for request {}", reply.kind(), reply.request_id)
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        timeout(within, wait)
            .await
            .map_err(|_| TransportError::TimedOut(within.as_millis() as u64))?
    }

    pub async fn close(mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
