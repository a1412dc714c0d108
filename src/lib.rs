//! # pebblekv - A Small In-Memory Key-Value Server
//!
//! pebblekv serves a flat key-value map over TCP using a RESP-style
//! protocol. Clients send a request value, the server runs the named
//! command against the shared store and writes back a reply value.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              pebblekv                               │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │              │
//! │  │ (bounded)   │    │  Handler    │    │  Handler    │              │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘              │
//! │                            │                  │                     │
//! │                            ▼                  ▼                     │
//! │                     ┌─────────────┐    ┌──────────────────────┐     │
//! │                     │ RESP codec  │    │ StorageEngine        │     │
//! │                     │ (encode /   │    │ RwLock<HashMap>      │     │
//! │                     │  decode)    │    │ behind `dyn Store`   │     │
//! │                     └─────────────┘    └──────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pebblekv::config::Config;
//! use pebblekv::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::bind(&Config::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `GET key`
//! - `SET key value`
//! - `DELETE key`
//! - `FLUSH`
//! - `MGET key [key ...]`
//! - `MSET key value [key value ...]`
//!
//! ## Module Overview
//!
//! - [`protocol`]: Wire values, encoder and incremental decoder
//! - [`storage`]: The `Store` trait and the in-memory engine
//! - [`commands`]: Request normalization and the command table
//! - [`connection`]: The per-connection request loop
//! - [`server`]: Listener and connection limit
//! - [`config`]: Settings and command-line parsing

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::Server;
pub use storage::{StorageEngine, Store};

/// The default port pebblekv listens on
pub const DEFAULT_PORT: u16 = 31337;

/// The default host pebblekv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Connections served at once by default
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Version of pebblekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
