//! Chunk framing for the gated transport.
//!
//! Each chunk is a 4-byte big-endian length followed by that many bytes of UTF-8.

use crate::error::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Payload written by the keep-alive loop. Never handed to a chunk sink.
pub const KEEP_ALIVE_CHUNK: &str = "#keep-alive";

const LENGTH_PREFIX: usize = 4;
const READ_SIZE: usize = 4096;

/// Reads whole chunks from a byte stream.
///
/// `read_chunk` is cancel-safe: bytes of a partially received chunk stay buffered
/// when the future is dropped, so callers can race it against a timeout.
pub struct ChunkReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_chunk: usize,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R, max_chunk: usize) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            max_chunk,
        }
    }

    pub async fn read_chunk(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(frame) = self.take_frame() {
                return frame;
            }

            let mut scratch = [0u8; READ_SIZE];
            let read = self.inner.read(&mut scratch).await?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            self.buffer.extend_from_slice(&scratch[..read]);
        }
    }

    fn take_frame(&mut self) -> Option<Result<String, TransportError>> {
        if self.buffer.len() < LENGTH_PREFIX {
            return None;
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_chunk {
            return Some(Err(TransportError::ChunkTooLarge {
                len,
                max: self.max_chunk,
            }));
        }
        if self.buffer.len() < LENGTH_PREFIX + len {
            return None;
        }

        let payload: Vec<u8> = self.buffer.drain(..LENGTH_PREFIX + len).skip(LENGTH_PREFIX).collect();
        Some(
            String::from_utf8(payload)
                .map_err(|e| TransportError::Malformed(format!("chunk is not UTF-8: {}", e))),
        )
    }
}

pub fn encode_chunk(chunk: &str, max_chunk: usize) -> Result<Vec<u8>, TransportError> {
    let len = chunk.len();
    if len > max_chunk || len > u32::MAX as usize {
        return Err(TransportError::ChunkTooLarge {
            len,
            max: max_chunk,
        });
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(chunk.as_bytes());
    Ok(frame)
}

pub async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunk: &str,
    max_chunk: usize,
) -> Result<(), TransportError> {
    let frame = encode_chunk(chunk, max_chunk)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
