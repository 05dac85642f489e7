//! # Error Types
//!
//! Error handling for the proof-of-work gate.
//!
//! This module defines every failure that can occur while issuing, solving,
//! redeeming or transporting a puzzle, plus the fixed set of error payloads
//! the server is allowed to put on the wire.
//!
//! ## Error Categories
//! - **Format**: malformed protocol messages or puzzle headers
//! - **Protocol**: unexpected commands, invalid difficulty
//! - **Expiry**: puzzle unknown to the registry or past its TTL
//! - **Compute**: the solver ran out of attempts
//! - **Transport**: I/O failures, split into timeouts and everything else
//! - **Internal**: unexpected faults such as RNG failure
//!
//! ## Example Usage
//! ```rust
//! use pow_gate::core::puzzle::Puzzle;
//! use pow_gate::error::{ErrorKind, ProtocolError};
//!
//! let err = Puzzle::create(0, "127.0.0.1:4000").unwrap_err();
//! assert!(matches!(err, ProtocolError::InvalidDifficulty));
//! assert_eq!(err.kind(), ErrorKind::Protocol);
//! ```

use std::fmt;
use std::io;
use std::str::FromStr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Wire payloads written by the server with an `Error` command
    pub const ERR_INCORRECT_MESSAGE_FORMAT: &str = "incorrect message format";
    pub const ERR_INCORRECT_HEADER_FORMAT: &str = "incorrect header format";
    pub const ERR_TIMEOUT_EXCEEDED: &str = "timeout exceeded";
    pub const ERR_HEADER_NOT_FOUND: &str = "header not found";
    pub const ERR_HEADER_NOT_CORRECT: &str = "header not correct";
    pub const ERR_EXPIRATION_EXCEEDED: &str = "expiration exceeded";
    pub const ERR_INTERNAL_ERROR: &str = "internal error";

    /// Lock errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Random source errors
    pub const ERR_RANDOM_SOURCE: &str = "Secure random source unavailable";
}

/// ProtocolError is the primary error type for all gate operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("difficulty must be greater than zero")]
    InvalidDifficulty,

    #[error("incorrect header format")]
    IncorrectHeaderFormat,

    #[error("zero bits must be more than zero")]
    ZeroBitsInvalid,

    #[error("hash length cannot be less than zero bits")]
    HashTooShort,

    #[error("max attempts to compute correct hash exceeded")]
    AttemptsExceeded,

    #[error("incorrect message format")]
    IncorrectMessageFormat,

    #[error("response command is not correct")]
    ResponseCommandNotCorrect,

    /// The server answered with an `Error` command; holds its payload verbatim
    #[error("{0}")]
    ServerRejected(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Random source error: {0}")]
    Random(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse classification of a [`ProtocolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed message or header
    Format,
    /// Unexpected command or invalid difficulty
    Protocol,
    /// Puzzle absent from the registry or past its TTL
    Expiry,
    /// Solver attempts exceeded
    Compute,
    /// I/O failure, including timeouts
    Transport,
    /// Unexpected fault on our side
    Internal,
}

impl ProtocolError {
    /// Map this error onto the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::IncorrectHeaderFormat | ProtocolError::IncorrectMessageFormat => {
                ErrorKind::Format
            }
            ProtocolError::InvalidDifficulty
            | ProtocolError::ZeroBitsInvalid
            | ProtocolError::HashTooShort
            | ProtocolError::ResponseCommandNotCorrect => ErrorKind::Protocol,
            ProtocolError::ServerRejected(payload) => match payload.parse::<ServerError>() {
                Ok(err) => err.kind(),
                Err(_) => ErrorKind::Protocol,
            },
            ProtocolError::AttemptsExceeded => ErrorKind::Compute,
            ProtocolError::Io(_) | ProtocolError::Timeout | ProtocolError::ConnectionClosed => {
                ErrorKind::Transport
            }
            ProtocolError::Random(_) | ProtocolError::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// The typed server error, when this is a rejection with a known payload
    pub fn server_error(&self) -> Option<ServerError> {
        match self {
            ProtocolError::ServerRejected(payload) => payload.parse().ok(),
            _ => None,
        }
    }
}

/// Error payloads the server sends back with an `Error` command
///
/// The server never puts anything else on the wire, so client code can match
/// on these after parsing a rejection payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerError {
    IncorrectMessageFormat,
    IncorrectHeaderFormat,
    TimeoutExceeded,
    /// Puzzle unknown, already redeemed, or bound to another subject
    HeaderNotFound,
    HeaderNotCorrect,
    ExpirationExceeded,
    InternalError,
}

impl ServerError {
    /// Text sent as the message payload
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServerError::IncorrectMessageFormat => constants::ERR_INCORRECT_MESSAGE_FORMAT,
            ServerError::IncorrectHeaderFormat => constants::ERR_INCORRECT_HEADER_FORMAT,
            ServerError::TimeoutExceeded => constants::ERR_TIMEOUT_EXCEEDED,
            ServerError::HeaderNotFound => constants::ERR_HEADER_NOT_FOUND,
            ServerError::HeaderNotCorrect => constants::ERR_HEADER_NOT_CORRECT,
            ServerError::ExpirationExceeded => constants::ERR_EXPIRATION_EXCEEDED,
            ServerError::InternalError => constants::ERR_INTERNAL_ERROR,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            ServerError::IncorrectMessageFormat | ServerError::IncorrectHeaderFormat => {
                ErrorKind::Format
            }
            ServerError::HeaderNotFound | ServerError::ExpirationExceeded => ErrorKind::Expiry,
            ServerError::HeaderNotCorrect => ErrorKind::Protocol,
            ServerError::TimeoutExceeded => ErrorKind::Transport,
            ServerError::InternalError => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerError {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            constants::ERR_INCORRECT_MESSAGE_FORMAT => Ok(ServerError::IncorrectMessageFormat),
            constants::ERR_INCORRECT_HEADER_FORMAT => Ok(ServerError::IncorrectHeaderFormat),
            constants::ERR_TIMEOUT_EXCEEDED => Ok(ServerError::TimeoutExceeded),
            constants::ERR_HEADER_NOT_FOUND => Ok(ServerError::HeaderNotFound),
            constants::ERR_HEADER_NOT_CORRECT => Ok(ServerError::HeaderNotCorrect),
            constants::ERR_EXPIRATION_EXCEEDED => Ok(ServerError::ExpirationExceeded),
            constants::ERR_INTERNAL_ERROR => Ok(ServerError::InternalError),
            _ => Err(ProtocolError::IncorrectMessageFormat),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
