//! Client side of the puzzle exchange: request, solve, redeem.

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{error, info, instrument};

use crate::config::SolverConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{Command, Message};
use crate::core::puzzle::Puzzle;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Timer;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

pub struct Client<C> {
    config: C,
    response_timeout: Duration,
}

impl<C: SolverConfig> Client<C> {
    pub fn new(config: C) -> Self {
        Self {
            config,
            response_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// How long to wait for each server response
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Run one full exchange over `stream` and return the granted resource.
    ///
    /// Any failure aborts the exchange. A server `Error` reply surfaces as
    /// [`ProtocolError::ServerRejected`] carrying the server's payload.
    #[instrument(skip(self, stream))]
    pub async fn request_resource<T>(&self, client_id: &str, stream: T) -> Result<String>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, MessageCodec::new());
        info!("Connection established");

        let result = self.exchange(&mut framed).await;
        if let Err(err) = &result {
            error!(error = %err, "Resource request failed");
        }
        result
    }

    async fn exchange<T>(&self, framed: &mut Framed<T, MessageCodec>) -> Result<String>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        info!("Requesting puzzle");
        let header = self
            .request(
                framed,
                Message::bare(Command::RequestPuzzle),
                Command::ResponsePuzzle,
            )
            .await?;
        info!(puzzle = %header, "Puzzle received");

        let puzzle = Puzzle::deserialize(&header)?;

        info!("Solving puzzle");
        let solved = self.solve(puzzle).await?;
        info!(counter = solved.counter(), "Puzzle solved");

        info!("Requesting resource");
        let resource = self
            .request(
                framed,
                Message::new(Command::RequestResource, solved.serialize()),
                Command::ResponseResource,
            )
            .await?;
        info!(resource = %resource, "Resource received");

        Ok(resource)
    }

    /// Solving is CPU-bound, so it runs on the blocking pool
    async fn solve(&self, mut puzzle: Puzzle) -> Result<Puzzle> {
        let max_attempts = self.config.puzzle_compute_max_attempts();
        tokio::task::spawn_blocking(move || {
            let _timer = Timer::start("solve_puzzle");
            puzzle.solve(max_attempts).map(|_| puzzle)
        })
        .await
        .map_err(|e| ProtocolError::Io(io::Error::other(e)))?
    }

    async fn request<T>(
        &self,
        framed: &mut Framed<T, MessageCodec>,
        msg: Message,
        expected: Command,
    ) -> Result<String>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        framed.send(msg).await?;

        let response = with_timeout_error(
            async {
                match framed.next().await {
                    Some(received) => received,
                    None => Err(ProtocolError::ConnectionClosed),
                }
            },
            self.response_timeout,
        )
        .await?;

        match response.command {
            Command::Error => Err(ProtocolError::ServerRejected(response.payload)),
            command if command == expected => Ok(response.payload),
            _ => Err(ProtocolError::ResponseCommandNotCorrect),
        }
    }
}
