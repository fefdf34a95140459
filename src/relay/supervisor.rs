//! Connection Supervisors
//!
//! Each supervisor owns one side of a relay. It produces live connections
//! per its source (dial with retry, or bind-once accept-forever) and keeps
//! doing so until the session shuts down. Closing is always followed by an
//! attempt to reacquire; there is no retry cap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Endpoint;
use crate::Result;

use super::events::{EventBus, RelayEvent, Side};
use super::pump::{PumpEnd, UpstreamPump};
use super::sink::FanoutSink;
use super::session::RelayStats;

/// Where the upstream supervisor gets its connections from
pub enum UpstreamSource {
    Dial(Endpoint),
    Accept(TcpListener),
}

/// Where the downstream supervisor gets its connections from
pub enum DownstreamSource {
    Dial(Endpoint),
    Accept(TcpListener),
}

/// Resolve an endpoint and dial it, trying each resolved address in turn
async fn dial(endpoint: &Endpoint) -> Result<(TcpStream, SocketAddr)> {
    let addrs: Vec<SocketAddr> = lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .with_context(|| format!("failed to resolve {}", endpoint))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("connected to {}", addr);
                return Ok((stream, addr));
            }
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(anyhow!("failed to connect to {}: {}", endpoint, e)),
        None => Err(anyhow!(
            "failed to connect to {}: no addresses resolved",
            endpoint
        )),
    }
}

/// Wait until a downstream peer closes its side of the connection. Bytes a
/// downstream peer sends are discarded; the relay is one-way.
async fn watch_peer(mut read_half: OwnedReadHalf) {
    let mut buf = [0u8; 512];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Supervises the upstream slot: acquires one live connection per its source
/// and runs the pump on it until it ends, forever.
pub struct UpstreamSupervisor {
    retry_interval: Duration,
    pump: UpstreamPump,
    events: EventBus,
    stats: Arc<RelayStats>,
    shutdown: broadcast::Receiver<()>,
}

impl UpstreamSupervisor {
    pub fn new(
        retry_interval: Duration,
        pump: UpstreamPump,
        events: EventBus,
        stats: Arc<RelayStats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            retry_interval,
            pump,
            events,
            stats,
            shutdown,
        }
    }

    pub async fn run(mut self, source: UpstreamSource) {
        match source {
            UpstreamSource::Dial(endpoint) => self.run_dialer(endpoint).await,
            UpstreamSource::Accept(listener) => self.run_acceptor(listener).await,
        }
        debug!("upstream supervisor stopped");
    }

    async fn run_dialer(&mut self, endpoint: Endpoint) {
        loop {
            let attempt = tokio::select! {
                result = dial(&endpoint) => result,
                _ = self.shutdown.recv() => return,
            };

            match attempt {
                Ok((mut stream, peer)) => {
                    info!("connected to upstream {}", peer);
                    self.events.emit(RelayEvent::UpstreamConnected { peer });

                    let end = self.pump.run(&mut stream, &mut self.shutdown).await;
                    if matches!(end, PumpEnd::Cancelled) {
                        return;
                    }

                    warn!("upstream connection lost: {}", end);
                    self.events.emit(RelayEvent::UpstreamLost {
                        reason: end.to_string(),
                    });
                    self.stats.record_upstream_reconnect();
                    // Dial again right away; only a failed attempt waits.
                }
                Err(e) => {
                    warn!("upstream dial failed: {:#}", e);
                    self.events.emit(RelayEvent::RetryScheduled {
                        side: Side::Upstream,
                        delay: self.retry_interval,
                    });
                    tokio::select! {
                        _ = sleep(self.retry_interval) => {}
                        _ = self.shutdown.recv() => return,
                    }
                }
            }
        }
    }

    async fn run_acceptor(&mut self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = self.shutdown.recv() => return,
            };

            match accepted {
                Ok((mut stream, peer)) => {
                    info!("upstream connected from {}", peer);
                    self.events.emit(RelayEvent::UpstreamConnected { peer });

                    let end = self.pump_single_source(&mut stream, &listener).await;
                    if matches!(end, PumpEnd::Cancelled) {
                        return;
                    }

                    warn!("upstream connection lost: {}", end);
                    self.events.emit(RelayEvent::UpstreamLost {
                        reason: end.to_string(),
                    });
                    self.stats.record_upstream_reconnect();
                }
                Err(e) => {
                    warn!("error accepting upstream connection: {}", e);
                    // Keep accepting even if one accept fails.
                }
            }
        }
    }

    /// Run the pump while turning away additional upstream connections; the
    /// upstream side is single-source.
    async fn pump_single_source(
        &mut self,
        stream: &mut TcpStream,
        listener: &TcpListener,
    ) -> PumpEnd {
        let pump = self.pump.run(stream, &mut self.shutdown);
        tokio::pin!(pump);

        loop {
            tokio::select! {
                end = &mut pump => return end,
                accepted = listener.accept() => {
                    if let Ok((_extra, peer)) = accepted {
                        warn!("rejecting additional upstream connection from {}", peer);
                    }
                }
            }
        }
    }
}

/// Supervises the downstream side: keeps the fan-out sink populated with
/// live connections per its source.
pub struct DownstreamSupervisor {
    retry_interval: Duration,
    sink: Arc<FanoutSink>,
    events: EventBus,
    shutdown_tx: broadcast::Sender<()>,
    shutdown: broadcast::Receiver<()>,
}

impl DownstreamSupervisor {
    pub fn new(
        retry_interval: Duration,
        sink: Arc<FanoutSink>,
        events: EventBus,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let shutdown = shutdown_tx.subscribe();
        Self {
            retry_interval,
            sink,
            events,
            shutdown_tx,
            shutdown,
        }
    }

    pub async fn run(mut self, source: DownstreamSource) {
        match source {
            DownstreamSource::Dial(endpoint) => self.run_dialer(endpoint).await,
            DownstreamSource::Accept(listener) => self.run_acceptor(listener).await,
        }
        debug!("downstream supervisor stopped");
    }

    /// Connect-mode: this slot contributes at most one member, re-dialed
    /// whenever it goes away.
    async fn run_dialer(&mut self, endpoint: Endpoint) {
        loop {
            let attempt = tokio::select! {
                result = dial(&endpoint) => result,
                _ = self.shutdown.recv() => return,
            };

            match attempt {
                Ok((stream, peer)) => {
                    let (read_half, write_half) = stream.into_split();
                    let id = Uuid::new_v4();
                    let closed = self.sink.insert(id, peer, write_half).await;

                    tokio::select! {
                        _ = closed.notified() => {
                            debug!("downstream slot evicted, redialing {}", endpoint);
                        }
                        _ = watch_peer(read_half) => {
                            self.sink.remove(id, "peer closed").await;
                        }
                        _ = self.shutdown.recv() => return,
                    }
                    // Dial again right away; only a failed attempt waits.
                }
                Err(e) => {
                    warn!("downstream dial failed: {:#}", e);
                    self.events.emit(RelayEvent::RetryScheduled {
                        side: Side::Downstream,
                        delay: self.retry_interval,
                    });
                    tokio::select! {
                        _ = sleep(self.retry_interval) => {}
                        _ = self.shutdown.recv() => return,
                    }
                }
            }
        }
    }

    /// Listen-mode: every accepted client becomes a member; a watcher task
    /// removes it when the peer goes away.
    async fn run_acceptor(&mut self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = self.shutdown.recv() => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let (read_half, write_half) = stream.into_split();
                    let id = Uuid::new_v4();
                    let closed = self.sink.insert(id, peer, write_half).await;

                    let sink = Arc::clone(&self.sink);
                    let mut shutdown = self.shutdown_tx.subscribe();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = closed.notified() => {}
                            _ = watch_peer(read_half) => {
                                sink.remove(id, "peer closed").await;
                            }
                            _ = shutdown.recv() => {}
                        }
                    });
                }
                Err(e) => {
                    warn!("error accepting downstream connection: {}", e);
                }
            }
        }
    }
}
