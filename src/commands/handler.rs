//! Command Handler Module
//!
//! Turns a decoded request into a command name plus arguments, looks the
//! name up in the static command table and runs the handler against the
//! store.
//!
//! ## Supported Commands
//!
//! - `GET key` - Stored value, or null
//! - `SET key value` - Overwrite a key, replies `1`
//! - `DELETE key` - Replies `1` if the key was removed, else `0`
//! - `FLUSH` - Remove every key, replies with the number removed
//! - `MGET key [key ...]` - Values (or null) in argument order
//! - `MSET key value [key value ...]` - Replies with the number of pairs set;
//!   a trailing key without a value is ignored
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌───────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │  │split_request()│───>│  dispatch() │───>│ table entry │    │
//! │  └───────────────┘    └─────────────┘    └─────────────┘    │
//! │                                               │             │
//! │                                               ▼             │
//! │                                          dyn Store          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use crate::storage::Store;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A well-formed request that cannot be executed.
///
/// These are reported to the client as an error reply and the connection
/// carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The request is neither an array nor a splittable string
    #[error("Request must be an array or a simple string")]
    InvalidRequest,

    /// The request contained no tokens
    #[error("Missing command")]
    EmptyCommand,

    /// The first element is not text
    #[error("invalid command name")]
    InvalidCommandName,

    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// A key argument is null, an array or a map
    #[error("invalid key")]
    InvalidKey,
}

impl CommandError {
    /// The error reply sent to the client.
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(format!("ERR {}", self))
    }
}

pub type CommandResult = Result<RespValue, CommandError>;

type HandlerFn = fn(&dyn Store, &[RespValue]) -> CommandResult;

/// How many arguments (excluding the command name) a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Any,
}

/// One entry of the command table.
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: Arity,
    handler: HandlerFn,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The verbs this server understands.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "GET",
        arity: Arity::Exact(1),
        handler: cmd_get,
    },
    CommandSpec {
        name: "SET",
        arity: Arity::Exact(2),
        handler: cmd_set,
    },
    CommandSpec {
        name: "DELETE",
        arity: Arity::Exact(1),
        handler: cmd_delete,
    },
    CommandSpec {
        name: "FLUSH",
        arity: Arity::Exact(0),
        handler: cmd_flush,
    },
    CommandSpec {
        name: "MGET",
        arity: Arity::Any,
        handler: cmd_mget,
    },
    CommandSpec {
        name: "MSET",
        arity: Arity::Any,
        handler: cmd_mset,
    },
];

/// Finds a command by its upper-cased name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

/// Executes requests against a shared store.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<dyn Store>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(storage: Arc<dyn Store>) -> Self {
        Self { storage }
    }

    /// Executes a request and returns the reply.
    ///
    /// Command failures become error replies; this never fails.
    pub fn execute(&self, request: RespValue) -> RespValue {
        match self.try_execute(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Command error");
                e.to_resp()
            }
        }
    }

    /// Executes a request, returning command failures as errors.
    pub fn try_execute(&self, request: RespValue) -> CommandResult {
        let (name, args) = split_request(request)?;
        self.dispatch(&name, &args)
    }

    fn dispatch(&self, name: &str, args: &[RespValue]) -> CommandResult {
        let spec = lookup(name).ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        debug!(command = spec.name, args = args.len(), "Received command");

        if let Arity::Exact(n) = spec.arity {
            if args.len() != n {
                return Err(CommandError::WrongArity(spec.name));
            }
        }

        (spec.handler)(self.storage.as_ref(), args)
    }
}

/// Normalizes a request into an upper-cased command name and its arguments.
///
/// Arrays are used as-is. A text or bulk scalar is split on ASCII whitespace,
/// so arguments containing spaces can only be sent in array form.
pub fn split_request(request: RespValue) -> Result<(String, Vec<RespValue>), CommandError> {
    let mut tokens = match request {
        RespValue::Array(items) => items,
        RespValue::SimpleString(text) | RespValue::Error(text) => text
            .split_ascii_whitespace()
            .map(RespValue::simple_string)
            .collect(),
        RespValue::BulkString(data) => data
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| RespValue::BulkString(data.slice_ref(token)))
            .collect(),
        RespValue::Integer(_) | RespValue::Null | RespValue::Map(_) => {
            return Err(CommandError::InvalidRequest)
        }
    };

    if tokens.is_empty() {
        return Err(CommandError::EmptyCommand);
    }

    let name = match tokens.remove(0) {
        RespValue::SimpleString(s) => s.to_uppercase(),
        RespValue::BulkString(b) => std::str::from_utf8(&b)
            .map_err(|_| CommandError::InvalidCommandName)?
            .to_uppercase(),
        _ => return Err(CommandError::InvalidCommandName),
    };

    Ok((name, tokens))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Extracts a key from an argument.
fn get_key(value: &RespValue) -> Result<Bytes, CommandError> {
    match value {
        RespValue::BulkString(b) => Ok(b.clone()),
        RespValue::SimpleString(s) | RespValue::Error(s) => Ok(Bytes::from(s.clone())),
        RespValue::Integer(n) => Ok(Bytes::from(n.to_string())),
        RespValue::Null | RespValue::Array(_) | RespValue::Map(_) => Err(CommandError::InvalidKey),
    }
}

// ============================================================================
// Commands
// ============================================================================

/// GET key
fn cmd_get(store: &dyn Store, args: &[RespValue]) -> CommandResult {
    let key = get_key(&args[0])?;
    Ok(store.get(&key).into())
}

/// SET key value
fn cmd_set(store: &dyn Store, args: &[RespValue]) -> CommandResult {
    let key = get_key(&args[0])?;
    store.set(key, args[1].clone());
    Ok(RespValue::integer(1))
}

/// DELETE key
fn cmd_delete(store: &dyn Store, args: &[RespValue]) -> CommandResult {
    let key = get_key(&args[0])?;
    Ok(store.delete(&key).into())
}

/// FLUSH
fn cmd_flush(store: &dyn Store, _args: &[RespValue]) -> CommandResult {
    Ok(store.flush().into())
}

/// MGET key [key ...]
fn cmd_mget(store: &dyn Store, args: &[RespValue]) -> CommandResult {
    let keys = args.iter().map(get_key).collect::<Result<Vec<_>, _>>()?;
    Ok(store.mget(&keys).into())
}

/// MSET key value [key value ...]
fn cmd_mset(store: &dyn Store, args: &[RespValue]) -> CommandResult {
    let pairs = args
        .chunks_exact(2)
        .map(|pair| -> Result<_, CommandError> { Ok((get_key(&pair[0])?, pair[1].clone())) })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(store.mset(pairs).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;

    fn create_handler() -> (CommandHandler, Arc<StorageEngine>) {
        let storage = Arc::new(StorageEngine::new());
        (CommandHandler::new(storage.clone()), storage)
    }

    fn make_command(args: &[&str]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|s| RespValue::bulk_string(Bytes::from(s.to_string())))
                .collect(),
        )
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_set_get() {
        let (handler, _) = create_handler();

        let response = handler.execute(make_command(&["SET", "foo", "bar"]));
        assert_eq!(response, RespValue::integer(1));

        let response = handler.execute(make_command(&["GET", "foo"]));
        assert_eq!(response, bulk("bar"));
    }

    #[test]
    fn test_get_nonexistent() {
        let (handler, _) = create_handler();
        let response = handler.execute(make_command(&["GET", "missing"]));
        assert_eq!(response, RespValue::null());
    }

    #[test]
    fn test_command_name_is_case_insensitive() {
        let (handler, _) = create_handler();
        handler.execute(make_command(&["set", "k", "v"]));
        assert_eq!(handler.execute(make_command(&["gEt", "k"])), bulk("v"));
    }

    #[test]
    fn test_delete() {
        let (handler, _) = create_handler();
        handler.execute(make_command(&["SET", "key", "value"]));

        let response = handler.execute(make_command(&["DELETE", "key"]));
        assert_eq!(response, RespValue::integer(1));

        let response = handler.execute(make_command(&["DELETE", "missing"]));
        assert_eq!(response, RespValue::integer(0));
    }

    #[test]
    fn test_flush() {
        let (handler, storage) = create_handler();
        handler.execute(make_command(&["SET", "key1", "value1"]));
        handler.execute(make_command(&["SET", "key2", "value2"]));

        let response = handler.execute(make_command(&["FLUSH"]));
        assert_eq!(response, RespValue::integer(2));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_mset_mget() {
        let (handler, _) = create_handler();

        let response = handler.execute(make_command(&["MSET", "k1", "v1", "k2", "v2"]));
        assert_eq!(response, RespValue::integer(2));

        let response = handler.execute(make_command(&["MGET", "k1", "k3", "k2"]));
        assert_eq!(
            response,
            RespValue::Array(vec![bulk("v1"), RespValue::null(), bulk("v2")])
        );
    }

    #[test]
    fn test_mset_drops_trailing_key() {
        let (handler, storage) = create_handler();

        let response = handler.execute(make_command(&["MSET", "a", "1", "b", "2", "c"]));
        assert_eq!(response, RespValue::integer(2));
        assert_eq!(storage.get(b"c"), None);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_empty_multi_commands() {
        let (handler, _) = create_handler();
        assert_eq!(handler.execute(make_command(&["MSET"])), RespValue::integer(0));
        assert_eq!(handler.execute(make_command(&["MGET"])), RespValue::array(vec![]));
    }

    #[test]
    fn test_unknown_command() {
        let (handler, _) = create_handler();

        let response = handler.execute(make_command(&["foo"]));
        assert_eq!(response, RespValue::error("ERR Unrecognized command: FOO"));
    }

    #[test]
    fn test_wrong_arity() {
        let (handler, _) = create_handler();

        assert_eq!(
            handler.try_execute(make_command(&["GET"])),
            Err(CommandError::WrongArity("GET"))
        );
        assert_eq!(
            handler.try_execute(make_command(&["SET", "only-key"])),
            Err(CommandError::WrongArity("SET"))
        );
        assert_eq!(
            handler.try_execute(make_command(&["FLUSH", "now"])),
            Err(CommandError::WrongArity("FLUSH"))
        );
    }

    #[test]
    fn test_inline_simple_string_request() {
        let (handler, storage) = create_handler();

        let response = handler.execute(RespValue::simple_string("set greeting  hello"));
        assert_eq!(response, RespValue::integer(1));
        // Tokens from a simple string keep their text type.
        assert_eq!(
            storage.get(b"greeting"),
            Some(RespValue::simple_string("hello"))
        );
    }

    #[test]
    fn test_inline_bulk_request() {
        let (handler, _) = create_handler();
        handler.execute(bulk("SET k v"));
        assert_eq!(handler.execute(bulk("GET\tk")), bulk("v"));
    }

    #[test]
    fn test_invalid_request_shapes() {
        let (handler, _) = create_handler();

        assert_eq!(
            handler.try_execute(RespValue::integer(5)),
            Err(CommandError::InvalidRequest)
        );
        assert_eq!(
            handler.try_execute(RespValue::Null),
            Err(CommandError::InvalidRequest)
        );
        assert_eq!(
            handler.try_execute(RespValue::array(vec![])),
            Err(CommandError::EmptyCommand)
        );
        assert_eq!(
            handler.try_execute(RespValue::simple_string("   ")),
            Err(CommandError::EmptyCommand)
        );
        assert_eq!(
            handler.try_execute(RespValue::array(vec![RespValue::integer(1)])),
            Err(CommandError::InvalidCommandName)
        );
    }

    #[test]
    fn test_invalid_key() {
        let (handler, _) = create_handler();
        let request = RespValue::array(vec![bulk("GET"), RespValue::array(vec![])]);
        assert_eq!(
            handler.execute(request),
            RespValue::error("ERR invalid key")
        );
    }

    #[test]
    fn test_values_returned_as_sent() {
        let (handler, _) = create_handler();
        let request = RespValue::array(vec![bulk("SET"), bulk("n"), RespValue::integer(42)]);
        handler.execute(request);

        assert_eq!(
            handler.execute(make_command(&["GET", "n"])),
            RespValue::integer(42)
        );
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("MSET").is_some());
        assert!(lookup("mset").is_none());
        assert_eq!(lookup("FLUSH").map(|spec| spec.arity), Some(Arity::Exact(0)));
    }
}
