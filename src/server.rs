//! TCP Server
//!
//! Accepts client connections and spawns one [`ConnectionHandler`] task per
//! connection.
//!
//! The number of connections served at once is bounded by a semaphore. A
//! permit is taken *before* `accept()`, so once `max_clients` connections are
//! open the server simply stops accepting; new clients wait in the listen
//! backlog until a slot frees up. The permit lives in the connection task and
//! is released when that task ends, however it ends.
//!
//! [`ConnectionHandler`]: crate::connection::ConnectionHandler

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::StorageEngine;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// A bound, not yet running, pebblekv server.
pub struct Server {
    listener: TcpListener,
    /// The store shared by every connection
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
    /// One permit per connection slot
    limit: Arc<Semaphore>,
    max_clients: usize,
    max_buffer_size: usize,
}

impl Server {
    /// Binds the listening socket described by `config`.
    ///
    /// This is the only step that can fail fatally, e.g. when the port is
    /// already in use.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener, config: &Config) -> Self {
        Self {
            listener,
            storage: Arc::new(StorageEngine::new()),
            stats: Arc::new(ConnectionStats::new()),
            limit: Arc::new(Semaphore::new(config.max_clients)),
            max_clients: config.max_clients,
            max_buffer_size: config.max_buffer_size,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn storage(&self) -> Arc<StorageEngine> {
        Arc::clone(&self.storage)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` completes.
    ///
    /// Connections already in progress are not interrupted; they end with
    /// their client or with the runtime.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            max_clients = self.max_clients,
            "Listening"
        );

        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }

        let storage = self.storage.stats();
        info!(
            keys = storage.keys,
            connections = self.stats.connections_accepted.load(Ordering::Relaxed),
            commands = self.stats.commands_processed.load(Ordering::Relaxed),
            "Server shutdown complete"
        );
    }

    /// Main loop that accepts incoming connections
    async fn accept_loop(&self) {
        let mut failures = 0u32;
        loop {
            let permit = match Arc::clone(&self.limit).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Connection limiter closed");
                    return;
                }
            };

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    failures = 0;
                    let handler = CommandHandler::new(self.storage.clone());
                    let stats = Arc::clone(&self.stats);
                    let max_buffer_size = self.max_buffer_size;

                    debug!(
                        client = %addr,
                        free_slots = self.limit.available_permits(),
                        "Accepted connection"
                    );

                    tokio::spawn(async move {
                        handle_connection(stream, addr, handler, stats, max_buffer_size).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    drop(permit);
                    let delay = accept_backoff(failures);
                    failures = failures.saturating_add(1);
                    error!(retry_in = ?delay, "Failed to accept connection: {}", e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Delay before retrying after `failures` consecutive accept errors.
///
/// Doubles from 10ms up to one second.
fn accept_backoff(failures: u32) -> Duration {
    let millis = 10u64.saturating_mul(1 << failures.min(7));
    Duration::from_millis(millis.min(1000))
}
