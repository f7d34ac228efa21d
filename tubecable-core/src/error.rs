//! Domain-specific error types for the command-stream encoder.
//!
//! All fallible operations return `Result<T, TubeError>`. A malformed
//! stream can wedge a real device until it is power-cycled, so misuse of
//! the buffer is reported as an error instead of being papered over.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the encoder.
#[derive(Debug, Error)]
pub enum TubeError {
    // ── Transport Errors ─────────────────────────────────────────
    /// A control or bulk transfer failed. Never retried internally.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // ── Buffer Errors ────────────────────────────────────────────
    /// An append would exceed the preallocated capacity.
    #[error("buffer overflow: need {needed} bytes (capacity {capacity})")]
    BufferOverflow { needed: usize, capacity: usize },

    /// A byte-level operation was attempted in the middle of a bit sequence.
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),

    /// A device address does not fit in 24 bits.
    #[error("device address out of range: {0:#x}")]
    AddressOutOfRange(u32),

    /// A count field does not fit the wire format.
    #[error("count out of range: {count} (allowed 1..={max})")]
    CountOutOfRange { count: usize, max: usize },

    // ── Table Errors ─────────────────────────────────────────────
    /// A Huffman table description did not cover every delta.
    #[error("incomplete Huffman table: {missing} entries missing (first: delta {first})")]
    IncompleteTable { missing: usize, first: i32 },

    /// A Huffman table description contained an invalid entry.
    #[error("malformed Huffman table at line {line}: {reason}")]
    MalformedTableFile { line: usize, reason: String },

    /// The table cannot be expressed in the on-device canonical form.
    #[error("Huffman table is not canonical")]
    NonCanonicalTable,

    /// An on-device table image could not be parsed.
    #[error("invalid device table image: {0}")]
    InvalidDeviceImage(&'static str),

    /// A compressed block could not be decoded.
    #[error("invalid compressed block: {0}")]
    InvalidBlock(&'static str),

    // ── Cipher Errors ────────────────────────────────────────────
    /// A key string could not be parsed into 16 bytes.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    // ── I/O Errors ───────────────────────────────────────────────
    /// Reading a table or image from disk failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ── TransportError ────────────────────────────────────────────────

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// Transfers either complete, time out, or fail; all three are reported
/// synchronously to the caller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transfer did not complete before its deadline.
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    /// The device stalled the given control request.
    #[error("device stalled request {request:#04x}")]
    Stall { request: u8 },

    /// The device went away.
    #[error("device disconnected")]
    Disconnected,

    /// Fewer bytes were moved than requested.
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// Host-side I/O failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TubeError::BufferOverflow {
            needed: 1000,
            capacity: 512,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("512"));

        let e = TubeError::MalformedTableFile {
            line: 7,
            reason: "duplicate delta 3".into(),
        };
        assert!(e.to_string().contains("line 7"));
    }

    #[test]
    fn from_transport() {
        let e: TubeError = TransportError::Timeout(Duration::from_millis(1000)).into();
        assert!(matches!(e, TubeError::Transport(TransportError::Timeout(_))));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no table");
        let e: TubeError = io_err.into();
        assert!(matches!(e, TubeError::Io(_)));
    }
}
