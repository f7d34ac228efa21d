//! One adapter, end to end.
//!
//! [`DeviceSession`] ties the pieces together:
//!
//! 1. [`init`](DeviceSession::init) runs the bring-up sequence (null key,
//!    status read, unblank, mode registers, plane addresses, sync).
//! 2. Framebuffer writes are encoded into an internal [`CommandBuffer`],
//!    compressed with the active Huffman table or as RLE/raw commands.
//!    The table is uploaded before the first compressed write and again
//!    whenever it changes.
//! 3. [`flush`](DeviceSession::flush) terminates the batch with a sync,
//!    runs the bytes through the keystream of the selected key and hands
//!    them to the transport.
//!
//! The keystream position advances with every byte sent and restarts at
//! zero when a new key is selected.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::{CommandBuffer, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, GrowthPolicy};
use crate::cipher::{CipherCache, CipherTables, KEY_LEN, NULL_KEY};
use crate::control;
use crate::error::TubeError;
use crate::huffman::{BLOCK_HEADER_LEN, DEFAULT_BLOCKSIZE, HuffmanCodec, HuffmanTable, MAX_CODE_LEN};
use crate::protocol::{
    MODE_REGISTER_COUNT, Mode, REG_BLANK_SCREEN, RleRun, graphics_copy, graphics_rle,
    graphics_write, set_address_registers, set_all_registers, set_register, sync,
};
use crate::transport::Transport;
use crate::types::{BYTES_PER_PIXEL, DeviceAddress, MAX_COMMAND_COUNT};

/// Smallest buffer a fixed-capacity session accepts. Large enough for the
/// init sequence, a table upload or one raw 255-pixel write.
pub const MIN_BUFFER_CAPACITY: usize = 1024;

/// Largest uncompressed graphics command: header plus 255 words.
const MAX_RAW_COMMAND: usize = BLOCK_HEADER_LEN + MAX_COMMAND_COUNT * BYTES_PER_PIXEL;

/// Hold, mode registers, resume, then four 3-register addresses.
const MODE_COMMAND_LEN: usize = 3 * (MODE_REGISTER_COUNT + 2) + 4 * 3 * 3;

/// `START HUFFMAN magic size` ahead of the table image.
const UPLOAD_HEADER_LEN: usize = 2 + 4 + 4;

// ── SessionConfig ────────────────────────────────────────────────

/// Configuration for [`DeviceSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bulk endpoint command streams are written to.
    pub endpoint: u8,
    /// Timeout applied to every transfer.
    pub timeout: Duration,
    /// Command buffer size; a full buffer is sent and reused.
    pub buffer_capacity: usize,
    pub growth: GrowthPolicy,
    /// Upper bound for one compressed block.
    pub blocksize: usize,
    /// Mode programmed by [`DeviceSession::init`].
    pub mode: Mode,
    /// Use Huffman compression for framebuffer writes (RLE/raw otherwise).
    pub compress: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT,
            timeout: DEFAULT_TIMEOUT,
            buffer_capacity: 64 * 1024,
            growth: GrowthPolicy::Fixed,
            blocksize: DEFAULT_BLOCKSIZE,
            mode: Mode::default(),
            compress: true,
        }
    }
}

// ── DeviceSession ────────────────────────────────────────────────

/// Encoder state for one opened adapter.
pub struct DeviceSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    buffer: CommandBuffer,
    codec: HuffmanCodec,
    ciphers: CipherCache,
    cipher: Arc<CipherTables>,
    /// Keystream offset of the next byte sent.
    stream_position: usize,
    /// Fingerprint of the table the device currently holds.
    uploaded_table: Option<[u8; 32]>,
    mode: Mode,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a session with the default configuration.
    pub fn new(transport: T) -> Result<Self, TubeError> {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a session with explicit configuration.
    pub fn with_config(transport: T, config: SessionConfig) -> Result<Self, TubeError> {
        let needed = MIN_BUFFER_CAPACITY.max(config.blocksize);
        if config.growth == GrowthPolicy::Fixed && config.buffer_capacity < needed {
            return Err(TubeError::BufferOverflow {
                needed,
                capacity: config.buffer_capacity,
            });
        }

        let mut ciphers = CipherCache::new();
        let cipher = ciphers.get_or_generate(&NULL_KEY);
        Ok(Self {
            transport,
            buffer: CommandBuffer::with_policy(config.buffer_capacity, config.growth),
            codec: HuffmanCodec::default(),
            ciphers,
            cipher,
            stream_position: 0,
            uploaded_table: None,
            mode: config.mode,
            config,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn codec(&self) -> &HuffmanCodec {
        &self.codec
    }

    pub fn cipher(&self) -> &Arc<CipherTables> {
        &self.cipher
    }

    pub fn stream_position(&self) -> usize {
        self.stream_position
    }

    /// Bytes queued but not yet sent.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    // ── Bring-up ─────────────────────────────────────────────────

    /// Run the bring-up sequence and program the configured mode.
    /// Returns the device status word.
    pub fn init(&mut self) -> Result<u32, TubeError> {
        let timeout = self.config.timeout;
        control::set_key(&mut self.transport, &NULL_KEY, timeout)?;
        self.cipher = self.ciphers.get_or_generate(&NULL_KEY);
        self.stream_position = 0;
        self.buffer.clear();

        let status = control::status(&mut self.transport, timeout)?;

        set_register(&mut self.buffer, REG_BLANK_SCREEN, 0x00)?;
        self.queue_mode(self.config.mode)?;
        self.flush()?;

        info!(mode = %self.mode, status, "initialised adapter");
        Ok(status)
    }

    /// Switch to `mode`, re-laying out both colour planes.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), TubeError> {
        self.make_room(MODE_COMMAND_LEN + 1)?;
        self.queue_mode(mode)?;
        self.flush()?;
        info!(%mode, "changed display mode");
        Ok(())
    }

    fn queue_mode(&mut self, mode: Mode) -> Result<(), TubeError> {
        let width = mode.width();
        let plane8 = DeviceAddress::new(mode.pixel_count() as u32 * BYTES_PER_PIXEL as u32)?;
        set_all_registers(&mut self.buffer, mode.registers())?;
        set_address_registers(
            &mut self.buffer,
            DeviceAddress::ZERO,
            DeviceAddress::new(width * BYTES_PER_PIXEL as u32)?,
            plane8,
            DeviceAddress::new(width)?,
        )?;
        self.mode = mode;
        Ok(())
    }

    // ── Keys and tables ──────────────────────────────────────────

    /// Install `key` on the device and encode everything sent afterwards
    /// with it. Pending commands are flushed under the previous key first.
    pub fn select_key(&mut self, key: &[u8; KEY_LEN]) -> Result<(), TubeError> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        control::set_key(&mut self.transport, key, self.config.timeout)?;
        self.cipher = self.ciphers.get_or_generate(key);
        self.stream_position = 0;
        info!(seed = self.cipher.seed(), "selected stream key");
        Ok(())
    }

    /// Use `table` for subsequent compressed writes.
    pub fn set_table(&mut self, table: Arc<HuffmanTable>) {
        self.codec.set_active_table(table);
    }

    /// Load a table file for subsequent compressed writes. On error the
    /// previous table stays active.
    pub fn load_table(&mut self, path: &Path) -> Result<(), TubeError> {
        self.codec.load_table(path).map(|_| ())
    }

    /// Queue a table upload unless the device already holds the active table.
    fn ensure_table_uploaded(&mut self) -> Result<(), TubeError> {
        let fingerprint = self.codec.table().fingerprint();
        if self.uploaded_table == Some(fingerprint) {
            return Ok(());
        }
        let image_len = self.codec.table().device_image()?.len();
        self.make_room(UPLOAD_HEADER_LEN + image_len)?;
        self.codec.upload_device_table(&mut self.buffer)?;
        self.uploaded_table = Some(fingerprint);
        Ok(())
    }

    // ── Framebuffer writes ───────────────────────────────────────

    /// Device address of pixel `(x, y)` in the 16-bit plane.
    pub fn pixel_address(&self, x: u32, y: u32) -> Result<DeviceAddress, TubeError> {
        let index = y as u64 * self.mode.width() as u64 + x as u64;
        let bytes = u32::try_from(index * BYTES_PER_PIXEL as u64).map_err(|_| TubeError::AddressOutOfRange(u32::MAX))?;
        DeviceAddress::new(bytes)
    }

    /// Write a contiguous pixel run starting at `addr`.
    pub fn write_framebuffer(&mut self, addr: DeviceAddress, pixels: &[u16]) -> Result<(), TubeError> {
        if !self.config.compress {
            return self.write_pixels_raw(addr, pixels);
        }
        self.ensure_table_uploaded()?;

        let headroom = self.config.blocksize.max(BLOCK_HEADER_LEN + MAX_CODE_LEN as usize / 8);
        let mut addr = addr;
        let mut offset = 0;
        let mut blocks = 0;
        while offset < pixels.len() {
            self.make_room(headroom)?;
            let consumed = self
                .codec
                .compress(&mut self.buffer, addr, &pixels[offset..], self.config.blocksize)?;
            offset += consumed;
            blocks += 1;
            if offset < pixels.len() {
                addr = addr.offset_pixels(consumed)?;
            }
        }
        debug!(pixels = pixels.len(), blocks, "queued compressed write");
        Ok(())
    }

    /// Write a contiguous pixel run without compression. Each 255-pixel
    /// chunk goes out as RLE or raw, whichever is shorter.
    pub fn write_pixels_raw(&mut self, addr: DeviceAddress, pixels: &[u16]) -> Result<(), TubeError> {
        let mut addr = addr;
        let mut chunks = pixels.chunks(MAX_COMMAND_COUNT).peekable();
        while let Some(chunk) = chunks.next() {
            self.make_room(MAX_RAW_COMMAND)?;
            let runs = RleRun::from_pixels(chunk);
            if 3 * runs.len() < 2 * chunk.len() {
                graphics_rle(&mut self.buffer, addr, &runs)?;
            } else {
                graphics_write(&mut self.buffer, addr, chunk)?;
            }
            if chunks.peek().is_some() {
                addr = addr.offset_pixels(chunk.len())?;
            }
        }
        Ok(())
    }

    /// Write a `width`-pixel wide rectangle whose top-left corner is `(x, y)`.
    pub fn write_rect(&mut self, x: u32, y: u32, width: usize, pixels: &[u16]) -> Result<(), TubeError> {
        if width == 0 {
            return Err(TubeError::ProtocolMisuse("rectangle width must be non-zero"));
        }
        for (row, line) in pixels.chunks(width).enumerate() {
            let row_y = u32::try_from(row)
                .ok()
                .and_then(|r| y.checked_add(r))
                .ok_or(TubeError::AddressOutOfRange(u32::MAX))?;
            let addr = self.pixel_address(x, row_y)?;
            self.write_framebuffer(addr, line)?;
        }
        Ok(())
    }

    /// Copy `count` pixels inside device memory.
    pub fn copy(&mut self, src: DeviceAddress, dst: DeviceAddress, count: usize) -> Result<(), TubeError> {
        let (mut src, mut dst) = (src, dst);
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(MAX_COMMAND_COUNT);
            self.make_room(8)?;
            graphics_copy(&mut self.buffer, src, dst, n)?;
            remaining -= n;
            if remaining > 0 {
                src = src.offset_pixels(n)?;
                dst = dst.offset_pixels(n)?;
            }
        }
        Ok(())
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Terminate the queued commands with a sync and send them.
    /// Returns the number of bytes sent.
    pub fn flush(&mut self) -> Result<usize, TubeError> {
        let mut sent = self.make_room(1)?;
        sync(&mut self.buffer)?;
        sent += self.send_buffer()?;
        Ok(sent)
    }

    /// Send early if fewer than `needed` bytes are left in a fixed buffer.
    fn make_room(&mut self, needed: usize) -> Result<usize, TubeError> {
        if self.buffer.policy() == GrowthPolicy::Fixed && self.buffer.capacity() - self.buffer.len() < needed {
            return self.send_buffer();
        }
        Ok(0)
    }

    /// Encode and send the buffer as-is. The buffer is emptied whether or
    /// not the transfer succeeds; the keystream only advances on success
    /// and a failed send forces the next compressed write to re-upload
    /// the table.
    fn send_buffer(&mut self) -> Result<usize, TubeError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let result = self.encode_and_send();
        self.buffer.clear();
        match result {
            Ok(sent) => {
                self.stream_position += sent;
                Ok(sent)
            }
            Err(e) => {
                // A queued table upload may have been lost with the buffer.
                self.uploaded_table = None;
                warn!(error = %e, "dropped command buffer after failed send");
                Err(e)
            }
        }
    }

    fn encode_and_send(&mut self) -> Result<usize, TubeError> {
        let position = self.stream_position;
        self.cipher.encode_at(self.buffer.as_bytes_mut()?, position);
        self.buffer
            .send(&mut self.transport, self.config.endpoint, self.config.timeout)
    }

    // ── Passthroughs ─────────────────────────────────────────────

    pub fn status(&mut self) -> Result<u32, TubeError> {
        control::status(&mut self.transport, self.config.timeout)
    }

    pub fn read_edid(&mut self) -> Result<[u8; control::EDID_LEN], TubeError> {
        control::get_edid(&mut self.transport, self.config.timeout)
    }
}
