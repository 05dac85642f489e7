//! # Core Components
//!
//! Pure computation with no I/O: the hashcash puzzle and the line protocol.
//!
//! ## Components
//! - **Puzzle**: create, serialize, deserialize, solve and verify challenges
//! - **Message**: `<digit>:<payload>` records and their five commands
//! - **Codec**: Tokio codec for newline-delimited framing over byte streams
//!
//! ## Wire Format
//! ```text
//! <command digit>:<payload>\n
//! ```
//!
//! ## Security
//! - Maximum record length: 4 KB (prevents memory exhaustion)
//! - Salts come from the operating system's secure random source

pub mod codec;
pub mod message;
pub mod puzzle;
