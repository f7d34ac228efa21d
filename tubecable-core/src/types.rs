//! Shared value types for the encoder pipeline.
//!
//! Device addresses, byte lengths and pixel counts are all plain integers
//! on the wire. Keeping the address in its own type stops a pixel count
//! from being passed where a 24-bit address is expected.

use std::fmt;

use crate::error::TubeError;

// ── DeviceAddress ────────────────────────────────────────────────

/// A byte address inside the adapter's framebuffer memory (24 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceAddress(u32);

impl DeviceAddress {
    /// Highest addressable byte.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Address zero (start of the 16-bit plane by default).
    pub const ZERO: DeviceAddress = DeviceAddress(0);

    /// Validate and wrap a raw address.
    pub fn new(addr: u32) -> Result<Self, TubeError> {
        if addr > Self::MAX {
            return Err(TubeError::AddressOutOfRange(addr));
        }
        Ok(Self(addr))
    }

    /// Raw 24-bit value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Address `bytes` further into device memory.
    pub fn offset(self, bytes: usize) -> Result<Self, TubeError> {
        let next = u32::try_from(bytes)
            .ok()
            .and_then(|b| self.0.checked_add(b))
            .ok_or(TubeError::AddressOutOfRange(u32::MAX))?;
        Self::new(next)
    }

    /// Address of the pixel `count` 16-bit words further on.
    pub fn offset_pixels(self, count: usize) -> Result<Self, TubeError> {
        self.offset(count * BYTES_PER_PIXEL)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

impl TryFrom<u32> for DeviceAddress {
    type Error = TubeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Device memory occupied by one RGB565 pixel.
pub const BYTES_PER_PIXEL: usize = 2;

/// Largest pixel or run count a single graphics command can carry.
pub const MAX_COMMAND_COUNT: usize = 255;

/// Validate a count against the 8-bit wire field.
pub(crate) fn wire_count(count: usize) -> Result<u8, TubeError> {
    if count == 0 || count > MAX_COMMAND_COUNT {
        return Err(TubeError::CountOutOfRange {
            count,
            max: MAX_COMMAND_COUNT,
        });
    }
    Ok(count as u8)
}
