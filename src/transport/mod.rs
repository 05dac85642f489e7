//! # Transport Layer
//!
//! TCP listener lifecycle and client dialing.

pub mod tcp;

pub use tcp::{connect, TcpServer};
