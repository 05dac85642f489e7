//! Server side of the puzzle exchange.
//!
//! Each connection runs a small state machine: it waits for a message, answers
//! it, and either waits again (after issuing a puzzle) or terminates (after a
//! redemption attempt or any error). Exactly one reply is written per message
//! received.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::IssuerConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{Command, Message, RECORD_DELIMITER};
use crate::core::puzzle::Puzzle;
use crate::error::{ProtocolError, ServerError};
use crate::utils::metrics::Metrics;
use crate::utils::registry::ExpiringRegistry;
use crate::utils::resource::ResourceProvider;
use crate::utils::timeout::{with_deadline, ConnErrorClassifier, ErrorClassifier};

/// Registry of issued, unredeemed puzzle keys
pub type PuzzleRegistry = ExpiringRegistry<String, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    AwaitMessage,
    Terminal,
}

/// Issues puzzles and grants the resource for correct solutions
pub struct ServerHandler<C, P> {
    config: C,
    registry: Arc<PuzzleRegistry>,
    resources: P,
    classifier: Box<dyn ErrorClassifier>,
    metrics: Arc<Metrics>,
}

impl<C, P> ServerHandler<C, P>
where
    C: IssuerConfig,
    P: ResourceProvider,
{
    pub fn new(config: C, registry: Arc<PuzzleRegistry>, resources: P) -> Self {
        Self {
            config,
            registry,
            resources,
            classifier: Box::new(ConnErrorClassifier),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<PuzzleRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Serve one connection until it reaches its terminal state.
    ///
    /// `client_id` identifies the peer and becomes the subject of every
    /// puzzle issued on this connection. Reads and writes fail once
    /// `deadline` passes.
    #[instrument(skip(self, stream, deadline))]
    pub async fn handle<T>(&self, client_id: &str, stream: T, deadline: Instant)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, MessageCodec::new());
        let mut state = ConnectionState::AwaitMessage;

        info!("Connected new client");

        while state == ConnectionState::AwaitMessage {
            let received = match with_deadline(deadline, framed.next()).await {
                Ok(Some(received)) => received,
                Ok(None) => {
                    debug!("Client closed the connection");
                    return;
                }
                Err(err) => Err(err),
            };

            let (reply, next) = match received {
                Ok(msg) => self.dispatch(client_id, msg),
                Err(err) => (self.read_failure(client_id, err), ConnectionState::Terminal),
            };

            let granted = reply.command == Command::ResponseResource;
            if self.write(&mut framed, reply, deadline).await && granted {
                self.metrics.resource_granted();
            }
            state = next;
        }
    }

    fn dispatch(&self, client_id: &str, msg: Message) -> (Message, ConnectionState) {
        match msg.command {
            Command::RequestPuzzle => (self.issue_puzzle(client_id), ConnectionState::AwaitMessage),
            Command::RequestResource => (
                self.redeem(client_id, &msg.payload),
                ConnectionState::Terminal,
            ),
            other => {
                warn!(command = ?other, "Unexpected command from client");
                self.metrics.protocol_error();
                (error_message(ServerError::InternalError), ConnectionState::Terminal)
            }
        }
    }

    fn issue_puzzle(&self, client_id: &str) -> Message {
        info!("Requested new puzzle");

        let puzzle = match Puzzle::create(self.config.puzzle_difficulty(), client_id) {
            Ok(puzzle) => puzzle,
            Err(err) => {
                error!(error = %err, "Failed to create puzzle");
                self.metrics.protocol_error();
                return error_message(ServerError::InternalError);
            }
        };

        match StdInstant::now().checked_add(self.config.puzzle_ttl()) {
            Some(expires_at) => self.registry.add_with_expiry(puzzle.key(), (), expires_at),
            None => self.registry.add(puzzle.key(), ()),
        }
        self.metrics.puzzle_issued();

        let header = puzzle.serialize();
        info!(puzzle = %header, "Puzzle sent");
        Message::new(Command::ResponsePuzzle, header)
    }

    /// Checks run in a fixed order; an unknown puzzle and a puzzle bound to
    /// another subject are reported identically.
    fn redeem(&self, client_id: &str, payload: &str) -> Message {
        info!(solution = payload, "Requested resource");

        let puzzle = match Puzzle::deserialize(payload) {
            Ok(puzzle) => puzzle,
            Err(_) => return self.reject(ServerError::IncorrectHeaderFormat, payload),
        };

        let key = puzzle.key();
        if self.registry.get(&key).is_none() || !puzzle.equal_resource(client_id) {
            return self.reject(ServerError::HeaderNotFound, payload);
        }
        if !puzzle.is_actual(self.config.puzzle_ttl()) {
            return self.reject(ServerError::ExpirationExceeded, payload);
        }
        match puzzle.verify() {
            Ok(true) => {}
            Ok(false) => return self.reject(ServerError::HeaderNotCorrect, payload),
            Err(err) => {
                debug!(error = %err, "Header verification failed");
                return self.reject(ServerError::HeaderNotCorrect, payload);
            }
        }

        // A resource that cannot be framed must not consume the puzzle
        let resource = self.resources.resource();
        if resource.as_bytes().contains(&RECORD_DELIMITER) {
            error!("Resource contains the record delimiter");
            self.metrics.protocol_error();
            return error_message(ServerError::InternalError);
        }

        // Single use: a concurrent redemption of the same key loses here
        if self.registry.take(&key).is_none() {
            return self.reject(ServerError::HeaderNotFound, payload);
        }

        info!(resource = %resource, "Resource sent");
        Message::new(Command::ResponseResource, resource)
    }

    fn reject(&self, reason: ServerError, header: &str) -> Message {
        info!(reason = %reason, header, "Rejected redemption");
        self.metrics.rejection();
        error_message(reason)
    }

    fn read_failure(&self, client_id: &str, err: ProtocolError) -> Message {
        if matches!(err, ProtocolError::IncorrectMessageFormat) {
            info!(client_id, "Incorrect message format");
            self.metrics.protocol_error();
            return error_message(ServerError::IncorrectMessageFormat);
        }

        if self.classifier.is_timeout(&err) {
            info!(client_id, "Timeout exceeded");
            self.metrics.timeout();
            error_message(ServerError::TimeoutExceeded)
        } else {
            error!(client_id, error = %err, "Failed to read message");
            self.metrics.protocol_error();
            error_message(ServerError::InternalError)
        }
    }

    /// Returns whether the reply reached the stream
    async fn write<T>(
        &self,
        framed: &mut Framed<T, MessageCodec>,
        msg: Message,
        deadline: Instant,
    ) -> bool
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let sent = match with_deadline(deadline, framed.send(msg)).await {
            Ok(sent) => sent,
            Err(err) => Err(err),
        };
        match sent {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "Failed to write message");
                false
            }
        }
    }
}

fn error_message(err: ServerError) -> Message {
    Message::new(Command::Error, err.as_str())
}
