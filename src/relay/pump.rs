//! Upstream Pump
//!
//! Reads chunks from the live upstream connection and feeds each one to the
//! dump hook and the fan-out sink, in read order.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::trace;

use super::dump::DumpHook;
use super::sink::FanoutSink;
use super::session::RelayStats;

/// Why the pump stopped reading
#[derive(Debug)]
pub enum PumpEnd {
    /// Peer closed the stream
    Eof,
    /// The read failed
    Error(std::io::Error),
    /// Session shutdown was requested
    Cancelled,
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpEnd::Eof => write!(f, "end of stream"),
            PumpEnd::Error(e) => write!(f, "read error: {}", e),
            PumpEnd::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Reads the upstream connection chunk by chunk
pub struct UpstreamPump {
    buffer_size: usize,
    sink: Arc<FanoutSink>,
    dump: DumpHook,
    stats: Arc<RelayStats>,
}

impl UpstreamPump {
    pub fn new(
        buffer_size: usize,
        sink: Arc<FanoutSink>,
        dump: DumpHook,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            buffer_size,
            sink,
            dump,
            stats,
        }
    }

    /// Pump until the connection ends or shutdown is requested. Each
    /// non-empty read becomes exactly one chunk, handed to the dump hook and
    /// then the sink before the next read is issued. A failed read emits
    /// nothing.
    pub async fn run(
        &self,
        stream: &mut TcpStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> PumpEnd {
        let mut buf = BytesMut::with_capacity(self.buffer_size);

        loop {
            buf.reserve(self.buffer_size);

            let read = tokio::select! {
                read = stream.read_buf(&mut buf) => read,
                _ = shutdown.recv() => return PumpEnd::Cancelled,
            };

            match read {
                Ok(0) => return PumpEnd::Eof,
                Ok(n) => {
                    let chunk = buf.split().freeze();
                    trace!("read {} bytes from upstream", n);
                    self.stats.record_read(n as u64);
                    self.dump.observe(&chunk);
                    self.sink.broadcast(&chunk).await;
                }
                Err(e) => return PumpEnd::Error(e),
            }
        }
    }
}
