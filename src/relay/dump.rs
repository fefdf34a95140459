//! Payload Dump Hook
//!
//! Optional hex rendering of every relayed chunk, written to the log and the
//! status event stream.

use bytes::Bytes;
use std::fmt::Write;
use tracing::info;

use super::events::{EventBus, RelayEvent};

/// Renders relayed chunks when enabled; otherwise a no-op
#[derive(Debug, Clone)]
pub struct DumpHook {
    enabled: bool,
    events: EventBus,
}

impl DumpHook {
    pub fn new(enabled: bool, events: EventBus) -> Self {
        Self { enabled, events }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render one chunk. The chunk itself is never modified.
    pub fn observe(&self, chunk: &Bytes) {
        if !self.enabled {
            return;
        }

        let rendered = hex_dump(chunk);
        info!("dump ({} bytes):\n{}", chunk.len(), rendered);
        self.events.emit(RelayEvent::Dump { rendered });
    }
}

/// Classic 16-bytes-per-row hex dump with a printable-ASCII column
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (row_index, row) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row_index * 16);

        for column in 0..16 {
            match row.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        for byte in row {
            if byte.is_ascii_graphic() || *byte == b' ' {
                out.push(*byte as char);
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn short_row_is_padded() {
        let rendered = hex_dump(b"hello");
        assert!(rendered.starts_with("00000000  68 65 6c 6c 6f"));
        assert!(rendered.contains("|hello|"));
    }

    #[test]
    fn long_input_gets_row_offsets() {
        let data: Vec<u8> = (0u8..40).collect();
        let rendered = hex_dump(&data);
        assert!(rendered.contains("00000010"));
        assert!(rendered.contains("00000020"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn non_printable_bytes_become_dots() {
        let rendered = hex_dump(&[0x00, 0x1f, b'a']);
        assert!(rendered.contains("|..a|"));
    }
}
