//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that runs in a loop, reading one request, executing it,
//! and writing the reply before the next request is looked at.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Awaiting request            │◄────────┐
//!    │  (buffer + parse one value)  │         │
//!    └──────────────┬───────────────┘         │
//!                   ▼                         │
//!    ┌──────────────────────────────┐         │
//!    │  Dispatching                 │         │
//!    │  (execute, write, flush)     │─────────┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Closed: clean EOF, I/O error, or a framing error
//!    (the error is reported to the client first)
//! ```
//!
//! ## Error policy
//!
//! - A command error (unknown verb, wrong arity, bad key) becomes an error
//!   reply and the connection keeps going.
//! - A framing error leaves the byte stream at an unknown position, so the
//!   handler replies with `-ERR Protocol error: ...` and closes.
//! - EOF with nothing buffered is a normal disconnect and is not reported.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Default upper bound on bytes buffered for a single request (64 MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of a framing error
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the byte stream so the same loop serves TCP sockets and
/// in-memory streams.
pub struct ConnectionHandler<S> {
    /// The client stream, with buffered writes
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet parsed
    buffer: BytesMut,

    /// Upper bound on `buffer`
    max_buffer_size: usize,

    command_handler: CommandHandler,

    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Sets the largest request, in bytes, the handler will buffer.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Runs the connection until the client goes away or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::Disconnected) => {
                info!(client = %self.addr, "Client went away")
            }
            Err(e) if e.is_disconnect() => {
                debug!(client = %self.addr, reason = %e, "Client closed the connection")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = match self.read_request().await {
                Ok(request) => request,
                Err(e) => {
                    if let Some(detail) = e.protocol_detail() {
                        self.stats.protocol_error();
                        let reply = RespValue::error(format!("ERR Protocol error: {}", detail));
                        self.send_response(&reply).await?;
                    }
                    return Err(e);
                }
            };

            let response = self.command_handler.execute(request);
            self.stats.command_processed();

            self.send_response(&response).await?;
        }
    }

    /// Waits until one complete request has been buffered and returns it.
    async fn read_request(&mut self) -> Result<RespValue, ConnectionError> {
        loop {
            if let Some(request) = self.try_parse_command()? {
                return Ok(request);
            }
            self.read_more_data().await?;
        }
    }

    /// Attempts to parse a command from the buffer.
    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(value))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.max_buffer_size {
            return Err(ConnectionError::BufferFull(self.max_buffer_size));
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::Disconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Writes and flushes one reply.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request framing
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client closed the connection between requests
    #[error("Client disconnected")]
    Disconnected,

    /// Client closed the connection part way through a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A single request grew past the buffer limit
    #[error("Request exceeds {0} bytes")]
    BufferFull(usize),
}

impl ConnectionError {
    /// The message to report to the client before closing, for errors
    /// caused by what the client sent.
    fn protocol_detail(&self) -> Option<String> {
        match self {
            ConnectionError::ParseError(e) => Some(e.to_string()),
            ConnectionError::BufferFull(max) => Some(format!("request exceeds {} bytes", max)),
            _ => None,
        }
    }

    /// True for the ordinary ways a client leaves.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Disconnected | ConnectionError::UnexpectedEof => true,
            ConnectionError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion. Errors are
/// contained here; nothing propagates to other connections.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    max_buffer_size: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats)
        .with_max_buffer_size(max_buffer_size);

    // `run` has already logged how the connection ended.
    let _ = handler.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn new_handler<S>(stream: S) -> (ConnectionHandler<S>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            stream,
            test_addr(),
            CommandHandler::new(storage),
            Arc::clone(&stats),
        );
        (handler, stats)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .write(b":1\r\n")
            .read(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .write(b"$3\r\nbar\r\n")
            .build();

        let (handler, stats) = new_handler(stream);
        let result = handler.run().await;

        assert!(matches!(result, Err(ConnectionError::Disconnected)));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let stream = Builder::new()
            .read(b"*2\r\n$3\r\nGE")
            .read(b"T\r\n$7\r\nmis")
            .read(b"sing\r\n")
            .write(b"$-1\r\n")
            .build();

        let (handler, _) = new_handler(stream);
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let stream = Builder::new()
            .read(b"*2\r\n$6\r\nDELETE\r\n$1\r\nx\r\n*1\r\n$5\r\nFLUSH\r\n")
            .write(b":0\r\n")
            .write(b":0\r\n")
            .build();

        let (handler, _) = new_handler(stream);
        assert!(handler.run().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection_open() {
        let stream = Builder::new()
            .read(b"*1\r\n$3\r\nFOO\r\n")
            .write(b"-ERR Unrecognized command: FOO\r\n")
            .read(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n")
            .write(b"$-1\r\n")
            .build();

        let (handler, stats) = new_handler(stream);
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::Disconnected)
        ));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_inline_request() {
        let stream = Builder::new()
            .read(b"+SET k v\r\n")
            .write(b":1\r\n")
            .read(b"+GET k\r\n")
            .write(b"+v\r\n")
            .build();

        let (handler, _) = new_handler(stream);
        assert!(handler.run().await.is_err());
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported_then_closes() {
        let stream = Builder::new()
            .read(b"@bad\r\n*1\r\n$5\r\nFLUSH\r\n")
            .write(b"-ERR Protocol error: bad request (unknown type tag 0x40)\r\n")
            .build();

        let (handler, stats) = new_handler(stream);
        let result = handler.run().await;

        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::UnknownPrefix(b'@')))
        ));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_bad_length_is_protocol_error() {
        let stream = Builder::new()
            .read(b"*-5\r\n")
            .write(b"-ERR Protocol error: invalid array length: -5\r\n")
            .build();

        let (handler, _) = new_handler(stream);
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ParseError(ParseError::InvalidArrayLength(-5)))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_request() {
        let stream = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let (handler, stats) = new_handler(stream);
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_buffer_limit() {
        let stream = Builder::new()
            .read(b"$100\r\n0123456789abcdef")
            .write(b"-ERR Protocol error: request exceeds 16 bytes\r\n")
            .build();

        let (handler, _) = new_handler(stream);
        let result = handler.with_max_buffer_size(16).run().await;
        assert!(matches!(result, Err(ConnectionError::BufferFull(16))));
    }

    #[test]
    fn test_parsed_request_is_advanced_past() {
        let (mut handler, _) = new_handler(Builder::new().build());
        handler
            .buffer
            .extend_from_slice(b"*1\r\n$5\r\nFLUSH\r\n:1\r\n");

        let request = handler.try_parse_command().unwrap();
        assert_eq!(
            request,
            Some(RespValue::array(vec![RespValue::bulk_string("FLUSH")]))
        );
        assert_eq!(&handler.buffer[..], b":1\r\n");

        assert_eq!(
            handler.try_parse_command().unwrap(),
            Some(RespValue::integer(1))
        );
        assert!(handler.buffer.is_empty());
        assert_eq!(handler.try_parse_command().unwrap(), None);
    }

    #[tokio::test]
    async fn test_handle_connection_contains_errors() {
        let stream = Builder::new()
            .read(b"?oops\r\n")
            .write(b"-ERR Protocol error: bad request (unknown type tag 0x3f)\r\n")
            .build();
        let stats = Arc::new(ConnectionStats::new());

        handle_connection(
            stream,
            test_addr(),
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::clone(&stats),
            DEFAULT_MAX_BUFFER_SIZE,
        )
        .await;

        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_is_disconnect() {
        assert!(ConnectionError::Disconnected.is_disconnect());
        assert!(ConnectionError::UnexpectedEof.is_disconnect());
        assert!(!ConnectionError::BufferFull(1).is_disconnect());
        assert!(!ConnectionError::ParseError(ParseError::UnknownPrefix(b'?')).is_disconnect());
    }

    #[tokio::test]
    async fn test_connection_stats_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(storage.clone());
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler,
                    stats,
                    DEFAULT_MAX_BUFFER_SIZE,
                ));
            }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$5\r\nFLUSH\r\n").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b":0\r\n");

        // Give the server time to record the write
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 4);

        drop(client);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
