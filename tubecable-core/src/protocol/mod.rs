//! Command-stream protocol: wire constants and command encoders.
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `register` | `SET_REG` commands, address registers, mode tables    |
//! | `graphics` | raw / RLE / copy graphics commands, sync and `0x40` |
//!
//! Compressed writes live in [`crate::huffman`] because they need a code
//! table.

pub mod graphics;
pub mod register;

use bitflags::bitflags;

pub use graphics::{
    RleRun, graphics_copy, graphics_rle, graphics_write, graphics_write_bytes, sync, unknown_command,
};
pub use register::{Mode, set_address_register, set_address_registers, set_all_registers, set_register};

// ── Command opcodes ──────────────────────────────────────────────

/// Start-of-command token; precedes the Huffman table upload.
pub const CMD_START: u8 = 0xAF;
/// Set one register.
pub const CMD_SET_REG: u8 = 0x20;
/// Accepted by the device; effect not known.
pub const CMD_UNKNOWN: u8 = 0x40;
/// Execute everything buffered so far.
pub const CMD_SYNC: u8 = 0xA0;
/// Replace the on-device Huffman table.
pub const CMD_HUFFMAN: u8 = 0xE0;

/// Tag following the Huffman upload command.
pub const HUFFMAN_MAGIC: u32 = 0x2638_71CD;

bitflags! {
    /// Graphics opcode: base command, operation and mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GfxOp: u8 {
        const BASE = 0x60;
        const RLE = 0x01;
        const COPY = 0x02;
        /// Operate on 16-bit words rather than bytes.
        const WORD = 0x08;
        /// Payload is Huffman-compressed.
        const COMPRESSED = 0x10;
    }
}

impl GfxOp {
    /// `0x60`: raw byte write, for the 8-bit plane.
    pub const WRITE_BYTES: GfxOp = GfxOp::BASE;
    /// `0x68`: raw word write.
    pub const WRITE_WORDS: GfxOp = GfxOp::BASE.union(GfxOp::WORD);
    /// `0x69`: run-length encoded word write.
    pub const RLE_WORDS: GfxOp = GfxOp::WRITE_WORDS.union(GfxOp::RLE);
    /// `0x6A`: on-device word copy.
    pub const COPY_WORDS: GfxOp = GfxOp::WRITE_WORDS.union(GfxOp::COPY);
    /// `0x78`: Huffman-compressed word write.
    pub const COMPRESSED_WORDS: GfxOp = GfxOp::WRITE_WORDS.union(GfxOp::COMPRESSED);
}

// ── Registers ────────────────────────────────────────────────────

/// 0x00 = 16 bit, 0x01 = 24 bit.
pub const REG_COLORDEPTH: u8 = 0x00;
pub const REG_XRES_MSB: u8 = 0x0F;
pub const REG_XRES_LSB: u8 = 0x10;
pub const REG_YRES_MSB: u8 = 0x17;
pub const REG_YRES_LSB: u8 = 0x18;
/// 0x00 = normal operation, 0x01 = blank screen.
pub const REG_BLANK_SCREEN: u8 = 0x1F;
/// 0x00 = hold register updates, 0xFF = resume.
pub const REG_SYNC: u8 = 0xFF;

/// Number of mode registers written by a full mode set.
pub const MODE_REGISTER_COUNT: usize = 0x1D;

/// 16-bit plane start (RGB565 MSBs).
pub const ADDR_FB16_START: u8 = 0x20;
/// 16-bit plane stride, `2 * xres`.
pub const ADDR_FB16_STRIDE: u8 = 0x23;
/// 8-bit plane start (extra LSBs in 24-bit mode).
pub const ADDR_FB8_START: u8 = 0x26;
/// 8-bit plane stride, `xres`.
pub const ADDR_FB8_STRIDE: u8 = 0x29;
