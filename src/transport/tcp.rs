//! # TCP Transport
//!
//! Listener lifecycle for the puzzle gate.
//!
//! `TcpServer::listen` binds, spawns the accept loop and returns at once.
//! Every accepted connection is served by its own task under a fixed read
//! deadline and is shut down when the handler returns. `shutdown` stops
//! accepting, then waits a bounded time for in-flight connections; tasks
//! still running after that are left to finish on their own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::{IssuerConfig, ListenerConfig};
use crate::error::{ProtocolError, Result};
use crate::protocol::server::ServerHandler;
use crate::utils::metrics::Metrics;
use crate::utils::resource::ResourceProvider;

/// A running listener
pub struct TcpServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
    metrics: Arc<Metrics>,
}

struct AcceptLoop<C, P> {
    listener: TcpListener,
    handler: Arc<ServerHandler<C, P>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    connection_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl TcpServer {
    /// Bind `config.listen_address()` and start serving with `handler`.
    ///
    /// Also starts the registry sweep when a clean interval is configured.
    #[instrument(skip_all, fields(address = config.listen_address()))]
    pub async fn listen<L, C, P>(config: &L, handler: Arc<ServerHandler<C, P>>) -> Result<Self>
    where
        L: ListenerConfig,
        C: IssuerConfig + 'static,
        P: ResourceProvider + 'static,
    {
        let listener = TcpListener::bind(config.listen_address()).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let metrics = handler.metrics().clone();

        let sweeper = handler
            .registry()
            .spawn_sweeper(config.registry_clean_interval(), shutdown.child_token());

        let accept_loop = AcceptLoop {
            listener,
            handler,
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            connection_timeout: config.connection_timeout(),
            limiter: config
                .max_connections()
                .map(|max| Arc::new(Semaphore::new(max))),
        };
        let accept_task = tokio::spawn(accept_loop.run());

        Ok(Self {
            local_addr,
            shutdown,
            tracker,
            accept_task,
            sweeper,
            shutdown_timeout: config.shutdown_timeout(),
            metrics,
        })
    }

    /// Address actually bound, useful when listening on port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently being served
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting, stop the sweep, and wait up to the shutdown timeout
    /// for in-flight connections.
    pub async fn shutdown(self) {
        info!("Shutting down server. Waiting for connections to close...");

        self.shutdown.cancel();

        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Registry sweeper ended abnormally");
            }
        }

        self.tracker.close();
        match tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => info!("All connections closed, shutting down"),
            Err(_) => warn!(
                connections = self.tracker.len(),
                "Shutdown timeout reached, no longer waiting for connections"
            ),
        }

        self.metrics.log_metrics();
    }
}

impl<C, P> AcceptLoop<C, P>
where
    C: IssuerConfig + 'static,
    P: ResourceProvider + 'static,
{
    async fn run(self) {
        loop {
            let permit = match self.admit().await {
                Some(permit) => permit,
                None => break,
            };

            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection established");
                    let handler = self.handler.clone();
                    let deadline = Instant::now() + self.connection_timeout;
                    self.tracker
                        .spawn(serve_connection(stream, peer, handler, deadline, permit));
                }
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, "Error accepting connection");
                }
            }
        }

        // Dropping the listener closes the socket
        info!("Listener closed");
    }

    /// Wait for a free slot when connections are limited.
    ///
    /// Returns `None` once shutdown has been requested.
    async fn admit(&self) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(limiter) = &self.limiter else {
            return Some(None);
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            permit = limiter.clone().acquire_owned() => permit.ok().map(Some),
        }
    }
}

#[instrument(skip_all, fields(peer = %peer))]
async fn serve_connection<C, P>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<ServerHandler<C, P>>,
    deadline: Instant,
    _permit: Option<OwnedSemaphorePermit>,
) where
    C: IssuerConfig,
    P: ResourceProvider,
{
    let metrics = handler.metrics().clone();
    metrics.connection_established();

    handler.handle(&peer.to_string(), &mut stream, deadline).await;

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Failed to shut down connection");
    }
    metrics.connection_closed();
    debug!("Connection closed");
}

/// Dial the gate, failing with [`ProtocolError::Timeout`] after `timeout`
#[instrument]
pub async fn connect(address: &str, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(ProtocolError::from)
}
