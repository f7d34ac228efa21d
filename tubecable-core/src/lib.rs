//! # tubecable-core
//!
//! Command-stream encoder for DisplayLink-style USB display adapters.
//!
//! This crate contains:
//! - **Buffer**: `CommandBuffer`, a byte/bit-addressable output buffer
//! - **Protocol**: register, mode, raw/RLE/copy graphics and sync commands
//! - **Huffman**: `HuffmanTable` and `HuffmanCodec` for compressed pixel writes
//! - **Cipher**: `CipherTables`, the keystream applied before transmission
//! - **Transport**: `Transport` / `DeviceProvider` seams and `CaptureTransport`
//! - **Control**: peek, poke, status, key and EDID requests
//! - **Session**: `DeviceSession`, bring-up and framebuffer updates for one adapter
//! - **Error**: `TubeError`, typed `thiserror`-based error hierarchy

pub mod buffer;
pub mod cipher;
pub mod control;
pub mod error;
pub mod huffman;
pub mod pixel;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{CommandBuffer, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, GrowthPolicy};
pub use cipher::{CipherCache, CipherTables, KEY_LEN, NULL_KEY, crc12, parse_key};
pub use error::{TransportError, TubeError};
pub use huffman::{Code, DEFAULT_BLOCKSIZE, DecodedBlock, HuffmanCodec, HuffmanTable};
pub use pixel::{read_rgb24, rgb24_to_rgb565};
pub use protocol::{GfxOp, Mode, RleRun};
pub use session::{DeviceSession, SessionConfig};
pub use transport::{CaptureTransport, DeviceProvider, Transport};
pub use types::DeviceAddress;
