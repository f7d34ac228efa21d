//! Growable byte/bit-addressable command buffer.
//!
//! Every encoder writes through a [`CommandBuffer`]. Byte-level appends
//! (`append_byte`, `append_word`, ...) require the buffer to be aligned;
//! bit-level appends (`append_bits`) pack most-significant-bit first into
//! a pending byte that is flushed once full or on [`align_to_byte`].
//!
//! [`align_to_byte`]: CommandBuffer::align_to_byte

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{TransportError, TubeError};
use crate::transport::Transport;
use crate::types::DeviceAddress;

/// Default bulk endpoint for command streams.
pub const DEFAULT_ENDPOINT: u8 = 1;

/// Default transfer timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

// ── GrowthPolicy ─────────────────────────────────────────────────

/// What happens when an append would exceed the current capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrowthPolicy {
    /// Fail with [`TubeError::BufferOverflow`]. Callers size the buffer.
    #[default]
    Fixed,
    /// Double the capacity (or more, if one append needs it).
    Grow,
}

// ── CommandBuffer ────────────────────────────────────────────────

/// Output buffer for one or more protocol commands.
#[derive(Debug)]
pub struct CommandBuffer {
    data: BytesMut,
    capacity: usize,
    /// Bits accumulated for the byte at position `data.len()`.
    pending: u8,
    /// Number of valid bits in `pending` (0..=7).
    bit_offset: u8,
    policy: GrowthPolicy,
}

impl CommandBuffer {
    /// Create a fixed-capacity buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_policy(capacity, GrowthPolicy::Fixed)
    }

    /// Create a buffer with an explicit growth policy.
    pub fn with_policy(capacity: usize, policy: GrowthPolicy) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            pending: 0,
            bit_offset: 0,
            policy,
        }
    }

    /// Bytes fully written so far (a partial byte is not counted).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.bit_offset == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// Bit position inside the byte currently being filled.
    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_offset == 0
    }

    /// Discard all content, keeping the allocation and the policy.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pending = 0;
        self.bit_offset = 0;
    }

    /// Check up front that `extra` more bytes fit, so a multi-part command
    /// either goes in whole or not at all.
    pub fn reserve_bytes(&mut self, extra: usize) -> Result<(), TubeError> {
        self.reserve_aligned(extra)
    }

    // ── Byte-level appends ───────────────────────────────────────

    pub fn append_byte(&mut self, value: u8) -> Result<(), TubeError> {
        self.reserve_aligned(1)?;
        self.data.extend_from_slice(&[value]);
        Ok(())
    }

    /// Append a 16-bit value, big-endian.
    pub fn append_word(&mut self, value: u16) -> Result<(), TubeError> {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Append a 24-bit device address, big-endian.
    pub fn append_address(&mut self, addr: DeviceAddress) -> Result<(), TubeError> {
        let raw = addr.get().to_be_bytes();
        self.append_bytes(&raw[1..])
    }

    /// Append a 32-bit value, big-endian.
    pub fn append_dword(&mut self, value: u32) -> Result<(), TubeError> {
        self.append_bytes(&value.to_be_bytes())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), TubeError> {
        self.reserve_aligned(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    // ── Bit-level appends ────────────────────────────────────────

    /// Append the low `len` bits of `code`, most significant first.
    pub fn append_bits(&mut self, code: u32, len: u8) -> Result<(), TubeError> {
        if len > 32 {
            return Err(TubeError::ProtocolMisuse("bit sequence longer than 32 bits"));
        }
        let total_bits = self.bit_offset as usize + len as usize;
        self.reserve(self.data.len() + total_bits.div_ceil(8))?;

        for shift in (0..len).rev() {
            let bit = ((code >> shift) & 1) as u8;
            self.pending |= bit << (7 - self.bit_offset);
            self.bit_offset += 1;
            if self.bit_offset == 8 {
                self.data.extend_from_slice(&[self.pending]);
                self.pending = 0;
                self.bit_offset = 0;
            }
        }
        Ok(())
    }

    /// Pad the current byte with zero bits and advance to the next byte.
    ///
    /// A no-op when the buffer is already aligned.
    pub fn align_to_byte(&mut self) {
        if self.bit_offset > 0 {
            // Space for the partial byte was reserved by `append_bits`.
            self.data.extend_from_slice(&[self.pending]);
            self.pending = 0;
            self.bit_offset = 0;
        }
    }

    // ── Access ───────────────────────────────────────────────────

    /// The assembled stream. Fails while a bit sequence is open.
    pub fn as_bytes(&self) -> Result<&[u8], TubeError> {
        self.require_aligned()?;
        Ok(&self.data)
    }

    /// Mutable view used by the final cipher pass.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], TubeError> {
        self.require_aligned()?;
        Ok(&mut self.data)
    }

    /// Consume the buffer into an immutable byte handle.
    pub fn freeze(self) -> Result<Bytes, TubeError> {
        self.require_aligned()?;
        Ok(self.data.freeze())
    }

    /// Push the assembled stream to `endpoint` in a single bulk transfer.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        endpoint: u8,
        timeout: Duration,
    ) -> Result<usize, TubeError> {
        let bytes = self.as_bytes()?;
        let written = transport.bulk_write(endpoint, bytes, timeout)?;
        if written != bytes.len() {
            return Err(TransportError::ShortTransfer {
                expected: bytes.len(),
                actual: written,
            }
            .into());
        }
        debug!(endpoint, bytes = written, "sent command buffer");
        Ok(written)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn require_aligned(&self) -> Result<(), TubeError> {
        if self.bit_offset != 0 {
            return Err(TubeError::ProtocolMisuse(
                "byte-level access while a bit sequence is open; call align_to_byte first",
            ));
        }
        Ok(())
    }

    fn reserve_aligned(&mut self, extra: usize) -> Result<(), TubeError> {
        self.require_aligned()?;
        self.reserve(self.data.len() + extra)
    }

    /// Make sure `needed` total bytes fit, growing if the policy allows.
    fn reserve(&mut self, needed: usize) -> Result<(), TubeError> {
        if needed <= self.capacity {
            return Ok(());
        }
        match self.policy {
            GrowthPolicy::Fixed => Err(TubeError::BufferOverflow {
                needed,
                capacity: self.capacity,
            }),
            GrowthPolicy::Grow => {
                let grown = needed.max(self.capacity.saturating_mul(2)).max(64);
                self.data.reserve(grown - self.data.len());
                self.capacity = grown;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_byte_values_are_big_endian() {
        let mut buf = CommandBuffer::with_capacity(16);
        buf.append_byte(0xAF).unwrap();
        buf.append_word(0x1234).unwrap();
        buf.append_address(DeviceAddress::new(0x123456).unwrap()).unwrap();
        buf.append_dword(0xDEADBEEF).unwrap();
        assert_eq!(
            buf.as_bytes().unwrap(),
            &[0xAF, 0x12, 0x34, 0x12, 0x34, 0x56, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn bits_pack_msb_first_across_bytes() {
        let mut buf = CommandBuffer::with_capacity(4);
        buf.append_bits(0b101, 3).unwrap();
        assert_eq!(buf.bit_offset(), 3);
        buf.append_bits(0b1_1110_0001, 9).unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.bit_offset(), 4);
        buf.align_to_byte();
        assert_eq!(buf.as_bytes().unwrap(), &[0b1011_1110, 0b0001_0000]);
    }

    #[test]
    fn align_is_noop_when_aligned() {
        let mut buf = CommandBuffer::with_capacity(2);
        buf.append_byte(1).unwrap();
        buf.align_to_byte();
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn byte_append_while_unaligned_is_misuse() {
        let mut buf = CommandBuffer::with_capacity(8);
        buf.append_bits(1, 1).unwrap();
        assert!(matches!(buf.append_byte(0), Err(TubeError::ProtocolMisuse(_))));
        assert!(buf.as_bytes().is_err());
        buf.align_to_byte();
        buf.append_byte(0).unwrap();
        assert_eq!(buf.as_bytes().unwrap(), &[0x80, 0x00]);
    }

    #[test]
    fn fixed_policy_overflow_leaves_buffer_intact() {
        let mut buf = CommandBuffer::with_capacity(3);
        buf.append_word(0xAAAA).unwrap();
        let err = buf.append_word(0xBBBB).unwrap_err();
        assert!(matches!(
            err,
            TubeError::BufferOverflow {
                needed: 4,
                capacity: 3
            }
        ));
        assert_eq!(buf.as_bytes().unwrap(), &[0xAA, 0xAA]);
    }

    #[test]
    fn bit_append_counts_partial_byte_against_capacity() {
        let mut buf = CommandBuffer::with_capacity(1);
        buf.append_bits(0x7F, 7).unwrap();
        assert!(buf.append_bits(0b11, 2).is_err());
        buf.append_bits(1, 1).unwrap();
        assert_eq!(buf.as_bytes().unwrap(), &[0xFF]);
    }

    #[test]
    fn grow_policy_expands_capacity() {
        let mut buf = CommandBuffer::with_policy(2, GrowthPolicy::Grow);
        buf.append_bytes(&[0u8; 100]).unwrap();
        assert_eq!(buf.len(), 100);
        assert!(buf.capacity() >= 100);
    }

    #[test]
    fn clear_resets_cursor() {
        let mut buf = CommandBuffer::with_capacity(4);
        buf.append_bits(0b1, 1).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.is_aligned());
    }
}
