//! Relay Status Events
//!
//! Human-readable status events observable by embedding callers (a CLI or a
//! GUI front-end) through a broadcast stream.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::session::SessionState;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which side of the relay an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Upstream,
    Downstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Upstream => write!(f, "upstream"),
            Side::Downstream => write!(f, "downstream"),
        }
    }
}

/// Status events emitted by a running relay session
#[derive(Debug, Clone)]
pub enum RelayEvent {
    UpstreamConnected { peer: SocketAddr },
    UpstreamLost { reason: String },
    DownstreamConnected { id: Uuid, peer: SocketAddr },
    DownstreamClosed { id: Uuid, reason: String },
    ClientCount { count: usize },
    RetryScheduled { side: Side, delay: Duration },
    Dump { rendered: String },
    StateChanged { state: SessionState },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::UpstreamConnected { peer } => write!(f, "upstream connected: {}", peer),
            RelayEvent::UpstreamLost { reason } => {
                write!(f, "upstream connection lost: {}", reason)
            }
            RelayEvent::DownstreamConnected { peer, .. } => {
                write!(f, "downstream connected: {}", peer)
            }
            RelayEvent::DownstreamClosed { id, reason } => {
                write!(f, "downstream {} closed: {}", id, reason)
            }
            RelayEvent::ClientCount { count } => write!(f, "downstream clients: {}", count),
            RelayEvent::RetryScheduled { side, delay } => write!(
                f,
                "{} unavailable, retrying in {}",
                side,
                humantime::format_duration(*delay)
            ),
            RelayEvent::Dump { rendered } => write!(f, "dump:\n{}", rendered),
            RelayEvent::StateChanged { state } => write!(f, "session state: {}", state),
        }
    }
}

/// Broadcast bus carrying status events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit an event. Events are dropped when nobody subscribes.
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// The event feed as a `Stream`, for callers that prefer one
    pub fn stream(&self) -> BroadcastStream<RelayEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let event = RelayEvent::UpstreamConnected {
            peer: "127.0.0.1:4001".parse().unwrap(),
        };
        assert_eq!(event.to_string(), "upstream connected: 127.0.0.1:4001");

        let event = RelayEvent::RetryScheduled {
            side: Side::Downstream,
            delay: Duration::from_secs(5),
        };
        assert_eq!(event.to_string(), "downstream unavailable, retrying in 5s");
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(RelayEvent::ClientCount { count: 2 });

        match rx.recv().await.unwrap() {
            RelayEvent::ClientCount { count } => assert_eq!(count, 2),
            other => panic!("unexpected event: {}", other),
        }
    }
}
