//! Relaycast Library
//!
//! One-way TCP byte stream relay with downstream fan-out.
//!
//! The relay reads an opaque byte stream from a single upstream endpoint and
//! delivers every chunk to all currently connected downstream endpoints.
//! Each side is independently configured to accept inbound connections or
//! dial out, and reconnects on its own whenever a connection is lost.

pub mod config;
pub mod relay;
pub mod shutdown;

pub use config::{Config, RelayConfig};
pub use relay::{RelayEvent, RelaySession};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
