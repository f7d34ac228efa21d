//! Pixel format helpers.

use std::io::Read;

use crate::error::TubeError;

/// Bytes per packed RGB888 pixel.
pub const RGB24_BYTES: usize = 3;

/// Pack one RGB888 pixel into RGB565.
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

/// Convert packed `R G B` triples to RGB565 words. A trailing partial
/// triple is ignored.
pub fn rgb24_to_rgb565(rgb24: &[u8]) -> Vec<u16> {
    rgb24
        .chunks_exact(RGB24_BYTES)
        .map(|px| rgb565(px[0], px[1], px[2]))
        .collect()
}

/// Read exactly `count` RGB888 pixels from `reader` and convert them.
pub fn read_rgb24<R: Read>(mut reader: R, count: usize) -> Result<Vec<u16>, TubeError> {
    let mut raw = vec![0u8; count * RGB24_BYTES];
    reader.read_exact(&mut raw)?;
    Ok(rgb24_to_rgb565(&raw))
}
