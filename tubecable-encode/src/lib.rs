//! # tubecable-encode: raw image to command stream
//!
//! Converts a raw RGB888 image into the command stream an adapter would
//! receive: bring-up sequence, optional key change, Huffman table upload
//! and compressed (or RLE/raw) framebuffer writes. The stream is captured
//! to a file instead of being sent over USB.

pub mod config;
pub mod encoder;
