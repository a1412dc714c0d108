//! Connection Module
//!
//! This module manages individual client connections. Each connection is
//! served by its own async task running a strictly sequential
//! read → execute → reply loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server (accept loop)                    │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ permit + accept()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │         ▲                                     ▼             │
//! │         │                             ┌─────────────┐       │
//! │         └─────────────────────────────│ Send reply  │       │
//! │                                       └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pebblekv::connection::{handle_connection, ConnectionStats, DEFAULT_MAX_BUFFER_SIZE};
//! use pebblekv::commands::CommandHandler;
//! use pebblekv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let handler = CommandHandler::new(storage.clone());
//! tokio::spawn(handle_connection(stream, addr, handler, stats.clone(), DEFAULT_MAX_BUFFER_SIZE));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats,
    DEFAULT_MAX_BUFFER_SIZE,
};
