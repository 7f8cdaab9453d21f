//! Gated transport: agent messages tunnelled over a fake, never-ending HTTP exchange.

pub mod client;
pub mod codec;
pub mod connection;
pub mod gateway;
pub mod http;
pub mod server;

pub use client::GatedClient;
pub use connection::{ChunkOutcome, ChunkSink, Connection, ConnectionId, ConnectionState};
pub use gateway::Gateway;
pub use server::GatedServer;
