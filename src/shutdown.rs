//! Graceful Shutdown Handling
//!
//! Signal-driven shutdown for the relay binary. Supports SIGTERM and SIGINT
//! and drives every running relay session to `Stopped` with all sockets
//! closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::relay::{RelaySession, SessionState};
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for the shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notification for shutdown completion
    shutdown_complete: Arc<Notify>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_complete = Arc::new(Notify::new());

        Self {
            shutdown_tx,
            shutdown_complete,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a handle to wait for shutdown completion
    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Request shutdown without a process signal, for embedding callers
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for SIGTERM/SIGINT, or an explicit `request_shutdown`
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");
        let mut requested = self.shutdown_tx.subscribe();

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = requested.recv() => {
                    info!("Shutdown requested, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
                _ = requested.recv() => {
                    info!("Shutdown requested, initiating graceful shutdown");
                }
            }
        }

        // Relay the signal to all components
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Drive every session to `Stopped`
    pub async fn shutdown_sessions(&self, sessions: &[Arc<RelaySession>]) -> Result<()> {
        info!(
            "Initiating graceful shutdown of {} relay session(s)",
            sessions.len()
        );
        let start_time = Instant::now();

        for session in sessions {
            session.stop().await;
        }

        let stragglers = sessions
            .iter()
            .filter(|s| s.state() != SessionState::Stopped)
            .count();
        let elapsed = start_time.elapsed();

        if stragglers == 0 {
            info!("All relay sessions stopped in {:?}", elapsed);
        } else {
            warn!("{} session(s) did not reach stopped state", stragglers);
        }

        self.shutdown_complete.notify_waiters();

        Ok(())
    }

    /// Wait for shutdown completion with timeout
    pub async fn wait_for_completion(&self) -> Result<()> {
        tokio::time::timeout(
            self.timeout + Duration::from_secs(5), // Extra buffer for cleanup
            self.shutdown_complete.notified(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown completion timeout"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, GeneralConfig, RelayConfig, RelayMode};

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let _receiver = coordinator.subscribe();
        let _completion = coordinator.completion_handle();

        // Should not panic
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.request_shutdown();

        // Should receive the signal
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_sessions_stops_all() {
        // Both sides dial endpoints nothing listens on, so the session sits
        // in its retry loops until shutdown interrupts them.
        let config = RelayConfig {
            name: "shutdown-test".to_string(),
            upstream: Endpoint::new("127.0.0.1", 1),
            downstream: Endpoint::new("127.0.0.1", 1),
            mode: RelayMode::ConnectConnect,
            dump: false,
            retry_interval: Duration::from_secs(30),
        };
        let session = RelaySession::start(config, &GeneralConfig::default())
            .await
            .unwrap();

        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator
            .shutdown_sessions(&[Arc::clone(&session)])
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Stopped);
    }
}
