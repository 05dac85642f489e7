// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{IssuerConfig, SolverConfig};
use crate::error::{ProtocolError, ServerError};
use crate::protocol::client::Client;
use crate::protocol::server::{PuzzleRegistry, ServerHandler};
use crate::utils::resource::StaticResource;

struct Settings;

impl IssuerConfig for Settings {
    fn puzzle_ttl(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn puzzle_difficulty(&self) -> u32 {
        2
    }
}

impl SolverConfig for Settings {
    fn puzzle_compute_max_attempts(&self) -> u64 {
        1_000_000
    }
}

/// Connect a client and a server handler over an in-memory pipe
async fn run_exchange(
    server: &ServerHandler<Settings, StaticResource>,
    client_id: &str,
) -> crate::error::Result<String> {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let deadline = Instant::now() + Duration::from_secs(10);

    let client = Client::new(Settings);
    let (granted, ()) = tokio::join!(
        client.request_resource(client_id, client_end),
        server.handle(client_id, server_end, deadline),
    );
    granted
}

#[tokio::test]
async fn test_puzzle_flow_grants_resource() {
    let registry = Arc::new(PuzzleRegistry::new());
    let server = ServerHandler::new(Settings, registry.clone(), StaticResource::new("wisdom"));

    let resource = run_exchange(&server, "A").await.expect("resource");
    assert_eq!(resource, "wisdom");

    // The redeemed key is gone
    assert!(registry.is_empty());

    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.puzzles_issued, 1);
    assert_eq!(snapshot.resources_granted, 1);
    assert_eq!(snapshot.rejections, 0);
}

#[tokio::test]
async fn test_independent_clients_each_get_resource() {
    let server = Arc::new(ServerHandler::new(
        Settings,
        Arc::new(PuzzleRegistry::new()),
        StaticResource::new("wisdom"),
    ));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let server = server.clone();
        tasks.spawn(async move { run_exchange(&server, &format!("10.0.0.{i}:4000")).await });
    }

    while let Some(joined) = tasks.join_next().await {
        assert_eq!(joined.expect("task").expect("resource"), "wisdom");
    }
    assert_eq!(server.metrics().snapshot().resources_granted, 8);
}

#[tokio::test]
async fn test_rejection_reaches_client_typed() {
    let server = ServerHandler::new(
        Settings,
        Arc::new(PuzzleRegistry::new()),
        StaticResource::new("wisdom"),
    );

    // Solving a puzzle the server never issued
    let (client_end, server_end) = tokio::io::duplex(4096);
    let deadline = Instant::now() + Duration::from_secs(10);
    let forged = async {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        use crate::core::codec::MessageCodec;
        use crate::core::message::{Command, Message};
        use crate::core::puzzle::Puzzle;

        let mut framed = Framed::new(client_end, MessageCodec::new());
        let mut puzzle = Puzzle::create(2, "A").expect("create");
        puzzle.solve(1_000_000).expect("solve");
        framed
            .send(Message::new(Command::RequestResource, puzzle.serialize()))
            .await
            .expect("send");
        framed.next().await.expect("reply").expect("message")
    };

    let (reply, ()) = tokio::join!(forged, server.handle("A", server_end, deadline));
    let err = ProtocolError::ServerRejected(reply.payload);
    assert_eq!(err.server_error(), Some(ServerError::HeaderNotFound));
}

#[tokio::test]
async fn test_unframeable_resource_keeps_puzzle() {
    let registry = Arc::new(PuzzleRegistry::new());
    let server = ServerHandler::new(
        Settings,
        registry.clone(),
        StaticResource::new("line one\nline two"),
    );

    let err = run_exchange(&server, "A").await.expect_err("no resource");
    assert_eq!(err.server_error(), Some(ServerError::InternalError));

    // The puzzle was not consumed and nothing was granted
    assert_eq!(registry.len(), 1);
    assert_eq!(server.metrics().snapshot().resources_granted, 0);
}
