//! Downstream Fan-Out Sink
//!
//! Owns the set of live downstream connections and writes every upstream
//! chunk to all of them. A failed writer is evicted without disturbing the
//! rest; an empty set drops the chunk.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EventBus, RelayEvent};
use super::session::RelayStats;

/// One live downstream connection
struct DownstreamMember {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    closed: Arc<Notify>,
}

/// The set of live downstream connections, keyed by member id
pub struct FanoutSink {
    members: Mutex<HashMap<Uuid, DownstreamMember>>,
    events: EventBus,
    stats: Arc<RelayStats>,
}

impl FanoutSink {
    pub fn new(events: EventBus, stats: Arc<RelayStats>) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            events,
            stats,
        }
    }

    /// Add a downstream connection. The returned handle is notified when the
    /// sink evicts the member after a failed write.
    pub async fn insert(&self, id: Uuid, peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Notify> {
        let closed = Arc::new(Notify::new());
        let count = {
            let mut members = self.members.lock().await;
            members.insert(
                id,
                DownstreamMember {
                    peer,
                    writer,
                    closed: Arc::clone(&closed),
                },
            );
            members.len()
        };

        info!("downstream connected: {} ({} active)", peer, count);
        self.stats.set_client_count(count);
        self.events.emit(RelayEvent::DownstreamConnected { id, peer });
        self.events.emit(RelayEvent::ClientCount { count });

        closed
    }

    /// Remove a member, closing its connection. Used when the peer closes
    /// from its side; write failures are handled inside `broadcast`.
    pub async fn remove(&self, id: Uuid, reason: &str) {
        let (removed, count) = {
            let mut members = self.members.lock().await;
            (members.remove(&id), members.len())
        };

        if let Some(member) = removed {
            member.closed.notify_one();
            info!("downstream closed: {} ({}), {} active", member.peer, reason, count);
            self.stats.set_client_count(count);
            self.events.emit(RelayEvent::DownstreamClosed {
                id,
                reason: reason.to_string(),
            });
            self.events.emit(RelayEvent::ClientCount { count });
        }
    }

    /// Deliver one chunk to every member. Writes happen under the set lock,
    /// so membership cannot change mid-iteration.
    pub async fn broadcast(&self, chunk: &Bytes) {
        let mut members = self.members.lock().await;

        if members.is_empty() {
            // No downstream clients: the chunk is dropped, never buffered.
            self.stats.record_dropped();
            debug!("no downstream clients, dropped {} bytes", chunk.len());
            return;
        }

        let mut failed: Vec<(Uuid, String)> = Vec::new();
        for (id, member) in members.iter_mut() {
            if let Err(e) = member.writer.write_all(chunk).await {
                warn!("write to downstream {} failed: {}", member.peer, e);
                failed.push((*id, e.to_string()));
            }
        }

        let evicted = !failed.is_empty();
        for (id, reason) in failed {
            if let Some(member) = members.remove(&id) {
                member.closed.notify_one();
                info!("downstream evicted: {}", member.peer);
                self.events.emit(RelayEvent::DownstreamClosed { id, reason });
            }
        }

        let count = members.len();
        drop(members);

        if evicted {
            self.stats.set_client_count(count);
            self.events.emit(RelayEvent::ClientCount { count });
        }
        self.stats.record_delivered();
    }

    /// Number of live members
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Drop every member, closing all downstream connections
    pub async fn clear(&self) {
        let count = {
            let mut members = self.members.lock().await;
            let count = members.len();
            for (_, member) in members.drain() {
                member.closed.notify_one();
                debug!("closing downstream {}", member.peer);
            }
            count
        };

        if count > 0 {
            self.stats.set_client_count(0);
            self.events.emit(RelayEvent::ClientCount { count: 0 });
        }
    }
}
