//! Line protocol messages: `<command digit>:<payload>\n`.

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Separates messages on the wire
pub const RECORD_DELIMITER: u8 = b'\n';

/// Separates the command digit from the payload
pub const FIELD_DELIMITER: u8 = b':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Something went wrong on either side; payload describes it
    Error = 0,
    /// Client asks for a puzzle
    RequestPuzzle = 1,
    /// Server sends a puzzle header
    ResponsePuzzle = 2,
    /// Client sends a solved header
    RequestResource = 3,
    /// Server grants the resource
    ResponseResource = 4,
}

impl Command {
    pub const fn digit(self) -> char {
        (b'0' + self as u8) as char
    }

    fn from_prefix(prefix: &[u8]) -> Option<Self> {
        match prefix {
            [b'0', FIELD_DELIMITER] => Some(Command::Error),
            [b'1', FIELD_DELIMITER] => Some(Command::RequestPuzzle),
            [b'2', FIELD_DELIMITER] => Some(Command::ResponsePuzzle),
            [b'3', FIELD_DELIMITER] => Some(Command::RequestResource),
            [b'4', FIELD_DELIMITER] => Some(Command::ResponseResource),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub payload: String,
}

impl Message {
    pub fn new(command: Command, payload: impl Into<String>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Message with an empty payload
    pub fn bare(command: Command) -> Self {
        Self::new(command, String::new())
    }

    /// Parse one record, with or without its trailing delimiter.
    ///
    /// Surrounding whitespace is ignored and the payload is trimmed.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let prefix = raw
            .as_bytes()
            .get(..2)
            .ok_or(ProtocolError::IncorrectMessageFormat)?;
        let command = Command::from_prefix(prefix).ok_or(ProtocolError::IncorrectMessageFormat)?;

        Ok(Self {
            command,
            payload: raw[2..].trim().to_string(),
        })
    }

    /// Wire form including the record delimiter
    pub fn to_line(&self) -> String {
        format!("{self}{}", RECORD_DELIMITER as char)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.command.digit(),
            FIELD_DELIMITER as char,
            self.payload
        )
    }
}
