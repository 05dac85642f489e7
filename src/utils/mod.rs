//! # Utility Modules
//!
//! Supporting utilities shared by the protocol handlers and the transport.
//!
//! ## Components
//! - **Registry**: expiring key store correlating issued puzzles with redemptions
//! - **Timeout**: deadline wrappers and timeout/other error classification
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe observability counters
//! - **Resource**: providers of the content granted to solvers
//!
//! ## Security
//! - Registry lookups enforce expiry even before a sweep runs
//! - Every connection read is bounded by a deadline

pub mod logging;
pub mod metrics;
pub mod registry;
pub mod resource;
pub mod timeout;

pub use registry::ExpiringRegistry;
pub use resource::{QuoteBook, ResourceProvider, StaticResource};
