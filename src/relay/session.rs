//! Relay Session
//!
//! One `RelaySession` wires an upstream supervisor, a downstream supervisor,
//! the fan-out sink and the dump hook together per `RelayConfig`, and owns
//! their lifecycle from `Initializing` through `Stopped`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Endpoint, EndpointRole, GeneralConfig, RelayConfig};
use crate::Result;

use super::dump::DumpHook;
use super::events::{EventBus, RelayEvent};
use super::pump::UpstreamPump;
use super::sink::FanoutSink;
use super::supervisor::{
    DownstreamSource, DownstreamSupervisor, UpstreamSource, UpstreamSupervisor,
};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initializing => "initializing",
            SessionState::Running => "running",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Live transfer counters for one session
#[derive(Debug, Default)]
pub struct RelayStats {
    bytes_read: AtomicU64,
    chunks_read: AtomicU64,
    chunks_delivered: AtomicU64,
    chunks_dropped: AtomicU64,
    upstream_reconnects: AtomicU64,
    client_count: AtomicUsize,
}

impl RelayStats {
    /// Record one upstream read of `bytes` bytes
    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.chunks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_reconnect(&self) {
        self.upstream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_client_count(&self, count: usize) {
        self.client_count.store(count, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read.load(Ordering::Relaxed)
    }

    pub fn chunks_delivered(&self) -> u64 {
        self.chunks_delivered.load(Ordering::Relaxed)
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }

    pub fn upstream_reconnects(&self) -> u64 {
        self.upstream_reconnects.load(Ordering::Relaxed)
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics for a session, serializable for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub session_id: Uuid,
    pub name: String,
    pub state: SessionState,
    pub uptime_ms: u64,
    pub bytes_read: u64,
    pub chunks_read: u64,
    pub chunks_delivered: u64,
    pub chunks_dropped: u64,
    pub upstream_reconnects: u64,
    pub downstream_clients: usize,
}

/// One running relay instance
pub struct RelaySession {
    id: Uuid,
    config: RelayConfig,
    state: Mutex<SessionState>,
    started_at: Instant,
    stats: Arc<RelayStats>,
    events: EventBus,
    sink: Arc<FanoutSink>,
    upstream_local_addr: Option<SocketAddr>,
    downstream_local_addr: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelaySession {
    /// Validate the configuration, perform listen-role binds and launch the
    /// supervisors. The binds are the only fatal failure point past
    /// validation; everything later self-heals through the reconnect loops.
    pub async fn start(config: RelayConfig, general: &GeneralConfig) -> Result<Arc<Self>> {
        config
            .validate()
            .with_context(|| format!("invalid configuration for relay '{}'", config.name))?;

        info!(
            "initializing relay '{}': {} / {}",
            config.name,
            config.upstream_role(),
            config.downstream_role()
        );

        let events = EventBus::new();
        let stats = Arc::new(RelayStats::default());
        let sink = Arc::new(FanoutSink::new(events.clone(), Arc::clone(&stats)));
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut upstream_local_addr = None;
        let upstream_source = match config.upstream_role() {
            EndpointRole::Connect(endpoint) => UpstreamSource::Dial(endpoint),
            EndpointRole::Listen(endpoint) => {
                let listener = Self::bind(&endpoint).await?;
                upstream_local_addr = listener.local_addr().ok();
                UpstreamSource::Accept(listener)
            }
        };

        let mut downstream_local_addr = None;
        let downstream_source = match config.downstream_role() {
            EndpointRole::Connect(endpoint) => DownstreamSource::Dial(endpoint),
            EndpointRole::Listen(endpoint) => {
                let listener = Self::bind(&endpoint).await?;
                downstream_local_addr = listener.local_addr().ok();
                DownstreamSource::Accept(listener)
            }
        };

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState::Initializing),
            started_at: Instant::now(),
            stats: Arc::clone(&stats),
            events: events.clone(),
            sink: Arc::clone(&sink),
            upstream_local_addr,
            downstream_local_addr,
            shutdown_tx: shutdown_tx.clone(),
            shutdown_timeout: general.shutdown_timeout,
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let dump = DumpHook::new(session.config.dump, events.clone());
        let pump = UpstreamPump::new(general.buffer_size, Arc::clone(&sink), dump, Arc::clone(&stats));
        let upstream = UpstreamSupervisor::new(
            session.config.retry_interval,
            pump,
            events.clone(),
            Arc::clone(&stats),
            shutdown_tx.subscribe(),
        );
        let downstream = DownstreamSupervisor::new(
            session.config.retry_interval,
            Arc::clone(&sink),
            events.clone(),
            shutdown_tx.clone(),
        );

        {
            let mut tasks = session.tasks.lock().unwrap();
            tasks.push(tokio::spawn(upstream.run(upstream_source)));
            tasks.push(tokio::spawn(downstream.run(downstream_source)));
        }

        session.set_state(SessionState::Running);
        info!("relay '{}' running", session.config.name);

        Ok(session)
    }

    async fn bind(endpoint: &Endpoint) -> Result<TcpListener> {
        info!("binding listener on {}", endpoint);
        TcpListener::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .with_context(|| format!("failed to bind listener on {}", endpoint))
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
        debug!("relay '{}' state: {}", self.config.name, state);
        self.events.emit(RelayEvent::StateChanged { state });
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Local address of the upstream listener, when that side listens
    pub fn upstream_local_addr(&self) -> Option<SocketAddr> {
        self.upstream_local_addr
    }

    /// Local address of the downstream listener, when that side listens
    pub fn downstream_local_addr(&self) -> Option<SocketAddr> {
        self.downstream_local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// The status event feed as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<RelayEvent> {
        self.events.stream()
    }

    pub async fn client_count(&self) -> usize {
        self.sink.len().await
    }

    /// Point-in-time statistics
    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            session_id: self.id,
            name: self.config.name.clone(),
            state: self.state(),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            bytes_read: self.stats.bytes_read(),
            chunks_read: self.stats.chunks_read(),
            chunks_delivered: self.stats.chunks_delivered(),
            chunks_dropped: self.stats.chunks_dropped(),
            upstream_reconnects: self.stats.upstream_reconnects(),
            downstream_clients: self.stats.client_count(),
        }
    }

    /// Drive the session to `Stopped`: stop both supervisors and close every
    /// live connection. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, SessionState::ShuttingDown | SessionState::Stopped) {
                return;
            }
            *state = SessionState::ShuttingDown;
        }
        self.events.emit(RelayEvent::StateChanged {
            state: SessionState::ShuttingDown,
        });
        info!("stopping relay '{}'", self.config.name);

        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for mut task in tasks {
            match timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if !e.is_cancelled() {
                        warn!("supervisor task for relay '{}' failed: {}", self.config.name, e);
                    }
                }
                Err(_) => {
                    warn!(
                        "supervisor for relay '{}' did not stop within {:?}, aborting",
                        self.config.name, self.shutdown_timeout
                    );
                    task.abort();
                }
            }
        }

        self.sink.clear().await;

        self.set_state(SessionState::Stopped);
        info!("relay '{}' stopped", self.config.name);
    }
}
