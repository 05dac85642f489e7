//! # pow-gate
//!
//! Hashcash proof-of-work gate for TCP services.
//!
//! A client must solve a puzzle before the server grants it a resource.
//! Solving costs the client many digest computations. Verifying the solution
//! costs the server one. Puzzles are bound to the client's address, expire
//! after a TTL, and can be redeemed once.
//!
//! ## Layout
//! - [`core`]: puzzle codec and solver, line protocol messages and codec
//! - [`protocol`]: server and client handlers for the exchange
//! - [`transport`]: TCP accept loop, graceful shutdown, dialing
//! - [`utils`]: expiring registry, timeouts, metrics, logging, resources
//! - [`config`]: settings and the capability traits the handlers consume
//! - [`error`]: error types and wire error payloads

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
