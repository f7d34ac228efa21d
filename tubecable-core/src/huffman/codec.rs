//! Block compression with the active delta table.
//!
//! A compressed block is
//!
//! ```text
//! 0x78 addr(3) count   code(delta_0) code(delta_1) ... [zero padding]
//! ```
//!
//! where `delta_i = pixel_i - pixel_{i-1}` (16-bit wrapping) and the
//! reference for the first pixel of every block is zero, so each block
//! decodes on its own. A block never exceeds the requested size unless a
//! single pixel does not fit, in which case that one pixel is emitted
//! anyway to guarantee progress.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::table::HuffmanTable;
use crate::buffer::CommandBuffer;
use crate::error::TubeError;
use crate::protocol::{CMD_HUFFMAN, CMD_START, GfxOp, HUFFMAN_MAGIC};
use crate::types::{DeviceAddress, MAX_COMMAND_COUNT};

/// Default upper bound for one compressed block, header included.
pub const DEFAULT_BLOCKSIZE: usize = 512;

/// Opcode, address and count.
pub const BLOCK_HEADER_LEN: usize = 5;

// ── BitReader ────────────────────────────────────────────────────

/// MSB-first reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn next_bit(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.bit / 8)?;
        let value = (byte >> (7 - self.bit % 8)) & 1;
        self.bit += 1;
        Some(value)
    }

    fn bytes_consumed(&self) -> usize {
        self.bit.div_ceil(8)
    }
}

/// Decode `count` deltas from a bit-packed payload.
pub fn decode_deltas(table: &HuffmanTable, payload: &[u8], count: usize) -> Result<Vec<i32>, TubeError> {
    let mut reader = BitReader::new(payload);
    (0..count)
        .map(|_| {
            table
                .decode_with(|| reader.next_bit())
                .ok_or(TubeError::InvalidBlock("payload ends inside a code or uses an unassigned code"))
        })
        .collect()
}

// ── DecodedBlock ─────────────────────────────────────────────────

/// A compressed block turned back into pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub addr: DeviceAddress,
    pub pixels: Vec<u16>,
    /// Bytes of input the block occupied, header and padding included.
    pub len: usize,
}

// ── HuffmanCodec ─────────────────────────────────────────────────

/// Holds the active table and compresses pixel runs with it.
///
/// The table is an immutable `Arc`. Replacing it needs `&mut self`, so
/// an encode can never observe a half-installed table; threads that
/// encode concurrently clone the `Arc` for the generation they use.
#[derive(Debug, Clone)]
pub struct HuffmanCodec {
    active: Arc<HuffmanTable>,
}

impl Default for HuffmanCodec {
    fn default() -> Self {
        Self::new(HuffmanTable::shared_default())
    }
}

impl HuffmanCodec {
    pub fn new(table: Arc<HuffmanTable>) -> Self {
        Self { active: table }
    }

    /// The table subsequent compress calls use.
    pub fn table(&self) -> &Arc<HuffmanTable> {
        &self.active
    }

    pub fn set_active_table(&mut self, table: Arc<HuffmanTable>) {
        self.active = table;
    }

    /// Load a table file and make it active.
    ///
    /// The file is fully parsed and validated before the swap; on error the
    /// previous table stays active.
    pub fn load_table(&mut self, path: &Path) -> Result<Arc<HuffmanTable>, TubeError> {
        match HuffmanTable::load(path) {
            Ok(table) => {
                let table = Arc::new(table);
                self.active = Arc::clone(&table);
                info!(path = %path.display(), canonical = table.is_canonical(), "loaded Huffman table");
                Ok(table)
            }
            Err(e) => {
                warn!(path = %path.display(), "rejected Huffman table: {e}");
                Err(e)
            }
        }
    }

    /// Append the upload command for the active table.
    pub fn upload_device_table(&self, buf: &mut CommandBuffer) -> Result<(), TubeError> {
        upload_device_table(buf, &self.active)
    }

    /// Compress one block of `pixels` to `addr`.
    ///
    /// Returns how many pixels went into the block; callers loop until the
    /// run is exhausted. An empty input emits nothing and returns 0.
    pub fn compress(
        &self,
        buf: &mut CommandBuffer,
        addr: DeviceAddress,
        pixels: &[u16],
        blocksize: usize,
    ) -> Result<usize, TubeError> {
        let table = &*self.active;
        let limit = pixels.len().min(MAX_COMMAND_COUNT);

        // Size the block before writing so the header can carry the count.
        let mut prev = 0u16;
        let mut bits = 0usize;
        let mut count = 0usize;
        for &px in &pixels[..limit] {
            let len = table.code_for(px.wrapping_sub(prev) as i16).len as usize;
            let total = BLOCK_HEADER_LEN + (bits + len).div_ceil(8);
            if count > 0 && total > blocksize {
                break;
            }
            bits += len;
            count += 1;
            prev = px;
        }
        if count == 0 {
            return Ok(0);
        }

        buf.reserve_bytes(BLOCK_HEADER_LEN + bits.div_ceil(8))?;
        buf.append_byte(GfxOp::COMPRESSED_WORDS.bits())?;
        buf.append_address(addr)?;
        buf.append_byte(count as u8)?;

        let mut prev = 0u16;
        for &px in &pixels[..count] {
            let code = table.code_for(px.wrapping_sub(prev) as i16);
            buf.append_bits(code.bits, code.len)?;
            prev = px;
        }
        buf.align_to_byte();
        Ok(count)
    }

    /// Compress a whole run into consecutive blocks. Returns the block count.
    pub fn compress_run(
        &self,
        buf: &mut CommandBuffer,
        addr: DeviceAddress,
        pixels: &[u16],
        blocksize: usize,
    ) -> Result<usize, TubeError> {
        let mut addr = addr;
        let mut offset = 0;
        let mut blocks = 0;
        while offset < pixels.len() {
            let consumed = self.compress(buf, addr, &pixels[offset..], blocksize)?;
            offset += consumed;
            blocks += 1;
            if offset < pixels.len() {
                addr = addr.offset_pixels(consumed)?;
            }
        }
        debug!(pixels = pixels.len(), blocks, "compressed run");
        Ok(blocks)
    }

    /// Decode one compressed block from the start of `bytes`.
    pub fn decode_block(&self, bytes: &[u8]) -> Result<DecodedBlock, TubeError> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return Err(TubeError::InvalidBlock("shorter than a block header"));
        }
        if bytes[0] != GfxOp::COMPRESSED_WORDS.bits() {
            return Err(TubeError::InvalidBlock("not a compressed write"));
        }
        let addr = DeviceAddress::new(u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]))?;
        let count = bytes[4] as usize;
        if count == 0 {
            return Err(TubeError::InvalidBlock("zero pixel count"));
        }

        let mut reader = BitReader::new(&bytes[BLOCK_HEADER_LEN..]);
        let mut pixels = Vec::with_capacity(count);
        let mut prev = 0u16;
        for _ in 0..count {
            let delta = self
                .active
                .decode_with(|| reader.next_bit())
                .ok_or(TubeError::InvalidBlock("payload ends inside a code or uses an unassigned code"))?;
            prev = prev.wrapping_add(delta as u16);
            pixels.push(prev);
        }

        Ok(DecodedBlock {
            addr,
            pixels,
            len: BLOCK_HEADER_LEN + reader.bytes_consumed(),
        })
    }
}

/// Append `START HUFFMAN magic size image` for `table`.
pub fn upload_device_table(buf: &mut CommandBuffer, table: &HuffmanTable) -> Result<(), TubeError> {
    upload_device_table_raw(buf, &table.device_image()?)
}

/// Append `START HUFFMAN magic size image` for an on-device table image
/// supplied as-is, such as one captured from a vendor driver.
pub fn upload_device_table_raw(buf: &mut CommandBuffer, image: &[u8]) -> Result<(), TubeError> {
    let size = u32::try_from(image.len()).map_err(|_| TubeError::BufferOverflow {
        needed: image.len(),
        capacity: u32::MAX as usize,
    })?;
    buf.reserve_bytes(2 + 4 + 4 + image.len())?;
    buf.append_byte(CMD_START)?;
    buf.append_byte(CMD_HUFFMAN)?;
    buf.append_dword(HUFFMAN_MAGIC)?;
    buf.append_dword(size)?;
    buf.append_bytes(image)?;
    debug!(bytes = image.len(), "queued device Huffman table");
    Ok(())
}
