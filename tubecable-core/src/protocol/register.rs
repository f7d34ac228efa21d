//! Register commands and built-in display modes.
//!
//! A register write is the triple `[SET_REG, reg, value]`. Most of the 29
//! mode registers are undocumented (pixel clock, sync polarity and
//! friends); the per-mode values below are captured from working devices
//! and treated as opaque constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    ADDR_FB8_START, ADDR_FB8_STRIDE, ADDR_FB16_START, ADDR_FB16_STRIDE, CMD_SET_REG,
    MODE_REGISTER_COUNT, REG_SYNC, REG_XRES_LSB, REG_XRES_MSB, REG_YRES_LSB, REG_YRES_MSB,
};
use crate::buffer::CommandBuffer;
use crate::error::TubeError;
use crate::types::DeviceAddress;

/// Set a single register.
pub fn set_register(buf: &mut CommandBuffer, reg: u8, value: u8) -> Result<(), TubeError> {
    buf.append_bytes(&[CMD_SET_REG, reg, value])
}

/// Set all mode registers at once.
///
/// The writes are bracketed by hold/resume on the sync register so the
/// device never runs with a half-applied mode.
pub fn set_all_registers(
    buf: &mut CommandBuffer,
    values: &[u8; MODE_REGISTER_COUNT],
) -> Result<(), TubeError> {
    set_register(buf, REG_SYNC, 0x00)?;
    for (reg, &value) in values.iter().enumerate() {
        set_register(buf, reg as u8, value)?;
    }
    set_register(buf, REG_SYNC, 0xFF)
}

/// Write a 24-bit address into the three registers starting at `reg`.
pub fn set_address_register(
    buf: &mut CommandBuffer,
    reg: u8,
    addr: DeviceAddress,
) -> Result<(), TubeError> {
    let (Some(mid), Some(low)) = (reg.checked_add(1), reg.checked_add(2)) else {
        return Err(TubeError::ProtocolMisuse("address register needs three consecutive registers"));
    };
    let raw = addr.get();
    set_register(buf, reg, (raw >> 16) as u8)?;
    set_register(buf, mid, (raw >> 8) as u8)?;
    set_register(buf, low, raw as u8)
}

/// Configure base addresses and strides of both colour planes.
pub fn set_address_registers(
    buf: &mut CommandBuffer,
    start16: DeviceAddress,
    stride16: DeviceAddress,
    start8: DeviceAddress,
    stride8: DeviceAddress,
) -> Result<(), TubeError> {
    set_address_register(buf, ADDR_FB16_START, start16)?;
    set_address_register(buf, ADDR_FB16_STRIDE, stride16)?;
    set_address_register(buf, ADDR_FB8_START, start8)?;
    set_address_register(buf, ADDR_FB8_STRIDE, stride8)
}

// ── Mode ─────────────────────────────────────────────────────────

/// Register sets for standard 60 Hz resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    // DL-120
    Mode640x480,
    Mode800x480,
    Mode800x600,
    Mode1024x768,
    Mode1280x1024,
    Mode1360x768,
    Mode1366x768,
    Mode1400x1050,
    // DL-160
    Mode1600x1200,
    Mode1920x1080,
}

type Registers = [u8; MODE_REGISTER_COUNT];

#[rustfmt::skip]
const MODE_640X480_60: Registers = [0x00, 0x99, 0x30, 0x26, 0x94, 0x60, 0xa9, 0xce, 0x60, 0x07, 0xb3, 0x0f, 0x79, 0xff, 0xff, 0x02, 0x80, 0x83, 0xbc, 0xff, 0xfc, 0xff, 0xff, 0x01, 0xe0, 0x01, 0x02, 0xab, 0x13];
#[rustfmt::skip]
const MODE_800X480_60: Registers = [0x00, 0x20, 0x3c, 0x7a, 0xc9, 0xf2, 0x6c, 0x48, 0xf9, 0x70, 0x53, 0xff, 0xff, 0x21, 0x27, 0x03, 0x20, 0x91, 0xf3, 0xff, 0xff, 0xff, 0xf9, 0x01, 0xe0, 0x01, 0x02, 0xc8, 0x19];
#[rustfmt::skip]
const MODE_800X600_60: Registers = [0x00, 0x20, 0x3c, 0x7a, 0xc9, 0x93, 0x60, 0xc8, 0xc7, 0x70, 0x53, 0xff, 0xff, 0x21, 0x27, 0x03, 0x20, 0x91, 0x8f, 0xff, 0xff, 0xff, 0xf2, 0x02, 0x58, 0x01, 0x02, 0x40, 0x1f];
#[rustfmt::skip]
const MODE_1024X768_60: Registers = [0x00, 0x36, 0x18, 0xd5, 0x10, 0x60, 0xa9, 0x7b, 0x33, 0xa1, 0x2b, 0x27, 0x32, 0xff, 0xff, 0x04, 0x00, 0xd9, 0x9a, 0xff, 0xca, 0xff, 0xff, 0x03, 0x00, 0x04, 0x03, 0xc8, 0x32];
#[rustfmt::skip]
const MODE_1280X1024_60: Registers = [0x00, 0x98, 0xf8, 0x0d, 0x57, 0x2a, 0x55, 0x4d, 0x54, 0xca, 0x0d, 0xff, 0xff, 0x94, 0x43, 0x05, 0x00, 0x9a, 0xa8, 0xff, 0xff, 0xff, 0xf9, 0x04, 0x00, 0x04, 0x02, 0x60, 0x54];
#[rustfmt::skip]
const MODE_1360X768_60: Registers = [0x01, 0xf8, 0x42, 0x9e, 0x64, 0xf2, 0x6c, 0x28, 0x0f, 0xe8, 0x61, 0xff, 0xff, 0x94, 0x43, 0x05, 0x50, 0x40, 0x7b, 0xff, 0xff, 0xff, 0xca, 0x03, 0x00, 0x04, 0x02, 0xcc, 0x42];
#[rustfmt::skip]
const MODE_1366X768_60: Registers = [0x01, 0x19, 0x1e, 0x1f, 0xb0, 0x93, 0x60, 0x40, 0x7b, 0x36, 0xe8, 0x27, 0x32, 0xff, 0xff, 0x05, 0x56, 0x03, 0xd9, 0xff, 0xff, 0xfc, 0xa7, 0x03, 0x00, 0x04, 0x02, 0x9a, 0x42];
#[rustfmt::skip]
const MODE_1400X1050_60: Registers = [0x01, 0x42, 0x24, 0x38, 0x36, 0xc1, 0x52, 0xd9, 0x29, 0xea, 0xb8, 0x32, 0x60, 0xff, 0xff, 0x05, 0x78, 0xc9, 0x4e, 0xff, 0xff, 0xff, 0xf2, 0x04, 0x1a, 0x04, 0x02, 0x1e, 0x5f];
#[rustfmt::skip]
const MODE_1600X1200_60: Registers = [0x01, 0xcf, 0xa4, 0x3c, 0x4e, 0x55, 0x73, 0x71, 0x2b, 0x71, 0x52, 0xff, 0xff, 0xee, 0xca, 0x06, 0x40, 0xe2, 0x57, 0xff, 0xff, 0xff, 0xf9, 0x04, 0xb0, 0x04, 0x02, 0x90, 0x7e];
#[rustfmt::skip]
const MODE_1920X1080_60: Registers = [0x01, 0x73, 0xa6, 0x28, 0xb3, 0x54, 0xaa, 0x41, 0x5d, 0x0d, 0x9f, 0x32, 0x60, 0xff, 0xff, 0x07, 0x80, 0x0a, 0xea, 0xff, 0xf9, 0xff, 0xff, 0x04, 0x38, 0x04, 0x02, 0xe0, 0x7c];

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Mode640x480,
        Mode::Mode800x480,
        Mode::Mode800x600,
        Mode::Mode1024x768,
        Mode::Mode1280x1024,
        Mode::Mode1360x768,
        Mode::Mode1366x768,
        Mode::Mode1400x1050,
        Mode::Mode1600x1200,
        Mode::Mode1920x1080,
    ];

    /// The 29 register values for this mode.
    pub const fn registers(self) -> &'static Registers {
        match self {
            Mode::Mode640x480 => &MODE_640X480_60,
            Mode::Mode800x480 => &MODE_800X480_60,
            Mode::Mode800x600 => &MODE_800X600_60,
            Mode::Mode1024x768 => &MODE_1024X768_60,
            Mode::Mode1280x1024 => &MODE_1280X1024_60,
            Mode::Mode1360x768 => &MODE_1360X768_60,
            Mode::Mode1366x768 => &MODE_1366X768_60,
            Mode::Mode1400x1050 => &MODE_1400X1050_60,
            Mode::Mode1600x1200 => &MODE_1600X1200_60,
            Mode::Mode1920x1080 => &MODE_1920X1080_60,
        }
    }

    /// Horizontal resolution, read back from the XRES registers.
    pub fn width(self) -> u32 {
        let r = self.registers();
        u32::from(u16::from_be_bytes([r[REG_XRES_MSB as usize], r[REG_XRES_LSB as usize]]))
    }

    /// Vertical resolution, read back from the YRES registers.
    pub fn height(self) -> u32 {
        let r = self.registers();
        u32::from(u16::from_be_bytes([r[REG_YRES_MSB as usize], r[REG_YRES_LSB as usize]]))
    }

    /// Pixels on screen.
    pub fn pixel_count(self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Mode1024x768
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width(), self.height())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.to_string() == wanted)
            .ok_or_else(|| format!("unsupported mode {s:?}"))
    }
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_register_emits_triple() {
        let mut buf = CommandBuffer::with_capacity(3);
        set_register(&mut buf, 0x1F, 0x01).unwrap();
        assert_eq!(buf.as_bytes().unwrap(), &[0x20, 0x1F, 0x01]);
    }

    #[test]
    fn set_all_registers_brackets_with_hold_and_resume() {
        let mut buf = CommandBuffer::with_capacity(93);
        set_all_registers(&mut buf, Mode::Mode640x480.registers()).unwrap();
        let bytes = buf.as_bytes().unwrap();
        assert_eq!(bytes.len(), 93);

        let triples: Vec<&[u8]> = bytes.chunks(3).collect();
        assert_eq!(triples.len(), 31);
        assert_eq!(triples[0], &[0x20, 0xFF, 0x00]);
        assert_eq!(triples[30], &[0x20, 0xFF, 0xFF]);
        for (reg, triple) in triples[1..30].iter().enumerate() {
            assert_eq!(triple[0], 0x20);
            assert_eq!(triple[1], reg as u8);
            assert_eq!(triple[2], MODE_640X480_60[reg]);
        }
    }

    #[test]
    fn set_all_registers_overflows_small_buffer() {
        let mut buf = CommandBuffer::with_capacity(92);
        assert!(set_all_registers(&mut buf, Mode::Mode640x480.registers()).is_err());
    }

    #[test]
    fn address_registers_cover_both_planes() {
        let mut buf = CommandBuffer::with_capacity(36);
        let a = |v| DeviceAddress::new(v).unwrap();
        set_address_registers(&mut buf, a(0), a(2048), a(0x180000), a(1024)).unwrap();
        let bytes = buf.as_bytes().unwrap();
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[9..18], &[0x20, 0x23, 0x00, 0x20, 0x24, 0x08, 0x20, 0x25, 0x00]);
        assert_eq!(&bytes[18..21], &[0x20, 0x26, 0x18]);
        assert_eq!(&bytes[33..36], &[0x20, 0x2B, 0x00]);
    }

    #[test]
    fn address_register_rejects_last_two_registers() {
        let mut buf = CommandBuffer::with_capacity(16);
        let addr = DeviceAddress::new(0x123456).unwrap();
        for reg in [0xFE, 0xFF] {
            assert!(matches!(
                set_address_register(&mut buf, reg, addr),
                Err(TubeError::ProtocolMisuse(_))
            ));
        }
        assert!(buf.is_empty());
        set_address_register(&mut buf, 0xFD, addr).unwrap();
        assert_eq!(
            buf.as_bytes().unwrap(),
            &[0x20, 0xFD, 0x12, 0x20, 0xFE, 0x34, 0x20, 0xFF, 0x56]
        );
    }

    #[test]
    fn modes_report_their_resolution() {
        assert_eq!((Mode::Mode640x480.width(), Mode::Mode640x480.height()), (640, 480));
        assert_eq!((Mode::Mode1366x768.width(), Mode::Mode1366x768.height()), (1366, 768));
        assert_eq!((Mode::Mode1920x1080.width(), Mode::Mode1920x1080.height()), (1920, 1080));
    }

    #[test]
    fn mode_parses_from_string() {
        assert_eq!("1024x768".parse::<Mode>().unwrap(), Mode::Mode1024x768);
        assert_eq!(" 800X600 ".parse::<Mode>().unwrap(), Mode::Mode800x600);
        assert!("123x45".parse::<Mode>().is_err());
        for mode in Mode::ALL {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }
}
