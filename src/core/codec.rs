//! Tokio codec framing [`Message`]s over a byte stream, one per line.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::message::{Message, RECORD_DELIMITER};
use crate::error::{ProtocolError, Result};

/// Longest record accepted before the delimiter, in bytes
pub const MAX_LINE_LENGTH: usize = 4 * 1024;

#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_length: usize,
    /// Bytes already scanned for a delimiter
    next_index: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let found = src[self.next_index..]
            .iter()
            .position(|b| *b == RECORD_DELIMITER);

        match found {
            Some(offset) => {
                let line_len = self.next_index + offset;
                let line = src.split_to(line_len + 1);
                self.next_index = 0;
                if line_len > self.max_length {
                    return Err(ProtocolError::IncorrectMessageFormat);
                }
                let text =
                    std::str::from_utf8(&line).map_err(|_| ProtocolError::IncorrectMessageFormat)?;
                Message::parse(text).map(Some)
            }
            None if src.len() > self.max_length => {
                src.clear();
                self.next_index = 0;
                Err(ProtocolError::IncorrectMessageFormat)
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            // A partial record at end of stream was cut off by the peer
            None if !src.is_empty() => {
                src.clear();
                self.next_index = 0;
                Err(ProtocolError::ConnectionClosed)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<()> {
        if msg.payload.as_bytes().contains(&RECORD_DELIMITER) {
            return Err(ProtocolError::IncorrectMessageFormat);
        }

        let line = msg.to_line();
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}
