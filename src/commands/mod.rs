//! Command Module
//!
//! The command processing layer. It receives decoded requests, runs them
//! against the store and returns the reply value.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Normalize    │
//! │  - Look up      │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   dyn Store     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Commands
//!
//! `GET`, `SET`, `DELETE`, `FLUSH`, `MGET`, `MSET`

pub mod handler;

pub use handler::{
    lookup, split_request, Arity, CommandError, CommandHandler, CommandResult, CommandSpec,
    COMMAND_TABLE,
};
