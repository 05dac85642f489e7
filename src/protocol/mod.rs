//! # Protocol Layer
//!
//! The two halves of the puzzle exchange, written against any
//! `AsyncRead + AsyncWrite` stream so they run the same over TCP and over
//! in-memory pipes.
//!
//! ## Exchange
//! ```text
//! client                         server
//!   1:                 ------>   issue puzzle, register key (TTL)
//!                      <------   2:<header>
//!   solve
//!   3:<solved header>  ------>   registry, subject, freshness, digest
//!                      <------   4:<resource>   or   0:<error>
//! ```
//!
//! ## Components
//! - **Server**: per-connection state machine issuing and redeeming puzzles
//! - **Client**: linear request, solve, redeem sequence

pub mod client;
pub mod server;

pub use client::Client;
pub use server::{PuzzleRegistry, ServerHandler};

#[cfg(test)]
mod tests;
