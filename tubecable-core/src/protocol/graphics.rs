//! Uncompressed graphics commands.
//!
//! Commands operate on 16-bit RGB565 words unless noted and carry an
//! 8-bit count, so a single command covers at most 255 pixels (or 255
//! runs). Callers split larger writes.
//!
//! ```text
//! write:   0x68 addr(3) count      word * count
//! bytes:   0x60 addr(3) count      byte * count   (8-bit plane)
//! rle:     0x69 addr(3) runs       (count u8, word) * runs
//! copy:    0x6A dst(3)  count      src(3)
//! sync:    0xA0
//! unknown: 0x40
//! ```

use super::{CMD_SYNC, CMD_UNKNOWN, GfxOp};
use crate::buffer::CommandBuffer;
use crate::error::TubeError;
use crate::types::{DeviceAddress, MAX_COMMAND_COUNT, wire_count};

// ── RleRun ───────────────────────────────────────────────────────

/// `count` repetitions of one pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleRun {
    pub count: u8,
    pub value: u16,
}

impl RleRun {
    pub const fn new(count: u8, value: u16) -> Self {
        Self { count, value }
    }

    /// Collapse a pixel slice into runs of at most 255 repeats.
    pub fn from_pixels(pixels: &[u16]) -> Vec<RleRun> {
        let mut runs: Vec<RleRun> = Vec::new();
        for &px in pixels {
            match runs.last_mut() {
                Some(run) if run.value == px && (run.count as usize) < MAX_COMMAND_COUNT => {
                    run.count += 1;
                }
                _ => runs.push(RleRun::new(1, px)),
            }
        }
        runs
    }
}

/// Emit the common `opcode addr count` header.
fn graphics_header(
    buf: &mut CommandBuffer,
    op: GfxOp,
    addr: DeviceAddress,
    count: u8,
) -> Result<(), TubeError> {
    buf.append_byte(op.bits())?;
    buf.append_address(addr)?;
    buf.append_byte(count)
}

/// Write `pixels` verbatim starting at `addr`.
pub fn graphics_write(
    buf: &mut CommandBuffer,
    addr: DeviceAddress,
    pixels: &[u16],
) -> Result<(), TubeError> {
    let count = wire_count(pixels.len())?;
    graphics_header(buf, GfxOp::WRITE_WORDS, addr, count)?;
    for &px in pixels {
        buf.append_word(px)?;
    }
    Ok(())
}

/// Write `data` byte by byte starting at `addr`. Used for the 8-bit plane,
/// which holds the low colour bits in 24-bit mode.
pub fn graphics_write_bytes(
    buf: &mut CommandBuffer,
    addr: DeviceAddress,
    data: &[u8],
) -> Result<(), TubeError> {
    let count = wire_count(data.len())?;
    graphics_header(buf, GfxOp::WRITE_BYTES, addr, count)?;
    buf.append_bytes(data)
}

/// Write run-length encoded pixels starting at `addr`.
pub fn graphics_rle(
    buf: &mut CommandBuffer,
    addr: DeviceAddress,
    runs: &[RleRun],
) -> Result<(), TubeError> {
    let count = wire_count(runs.len())?;
    if let Some(empty) = runs.iter().find(|r| r.count == 0) {
        return Err(TubeError::CountOutOfRange {
            count: empty.count as usize,
            max: MAX_COMMAND_COUNT,
        });
    }
    graphics_header(buf, GfxOp::RLE_WORDS, addr, count)?;
    for run in runs {
        buf.append_byte(run.count)?;
        buf.append_word(run.value)?;
    }
    Ok(())
}

/// Copy `count` pixel words inside device memory.
pub fn graphics_copy(
    buf: &mut CommandBuffer,
    src: DeviceAddress,
    dst: DeviceAddress,
    count: usize,
) -> Result<(), TubeError> {
    let count = wire_count(count)?;
    graphics_header(buf, GfxOp::COPY_WORDS, dst, count)?;
    buf.append_address(src)
}

/// Execution barrier: everything buffered before takes effect here.
pub fn sync(buf: &mut CommandBuffer) -> Result<(), TubeError> {
    buf.append_byte(CMD_SYNC)
}

/// Single-byte command `0x40`. The device accepts it; what it does is not
/// known.
pub fn unknown_command(buf: &mut CommandBuffer) -> Result<(), TubeError> {
    buf.append_byte(CMD_UNKNOWN)
}
