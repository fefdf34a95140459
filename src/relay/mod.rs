//! Relay Core
//!
//! The relay engine: connection supervisors, the upstream pump, the fan-out
//! sink, the dump hook, and the session that wires them together.

pub mod dump;
pub mod events;
pub mod pump;
pub mod session;
pub mod sink;
pub mod supervisor;

pub use events::{EventBus, RelayEvent, Side};
pub use session::{RelaySession, RelaySnapshot, RelayStats, SessionState};
