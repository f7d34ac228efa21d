//! Vendor control requests.
//!
//! Each helper is a single control transfer with a fixed request code.
//! They are used during bring-up (status, key, EDID) and for poking at
//! device memory while debugging.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::cipher::KEY_LEN;
use crate::error::{TransportError, TubeError};
use crate::transport::Transport;

pub const REQ_GET_EDID: u8 = 0x02;
pub const REQ_POKE: u8 = 0x03;
pub const REQ_PEEK: u8 = 0x04;
/// Observed during vendor driver bring-up; effect undocumented.
pub const REQ_UNKNOWN: u8 = 0x05;
pub const REQ_STATUS: u8 = 0x06;
pub const REQ_SET_KEY: u8 = 0x12;

/// Size of a base EDID block.
pub const EDID_LEN: usize = 128;

/// Index value that selects the display's DDC channel for EDID reads.
const EDID_INDEX: u16 = 0x00A1;

/// Memory reachable through peek/poke; addresses wrap at this size.
pub const PEEK_WINDOW: usize = 0x1_0000;

fn expect_len(expected: usize, actual: usize) -> Result<(), TubeError> {
    if actual < expected {
        return Err(TransportError::ShortTransfer { expected, actual }.into());
    }
    Ok(())
}

/// Read one byte of device memory.
pub fn peek<T: Transport + ?Sized>(transport: &mut T, addr: u16, timeout: Duration) -> Result<u8, TubeError> {
    let mut data = [0u8; 1];
    let n = transport.control_in(REQ_PEEK, addr, 0, &mut data, timeout)?;
    expect_len(1, n)?;
    Ok(data[0])
}

/// Write one byte of device memory.
pub fn poke<T: Transport + ?Sized>(
    transport: &mut T,
    addr: u16,
    value: u8,
    timeout: Duration,
) -> Result<(), TubeError> {
    let n = transport.control_out(REQ_POKE, addr, 0, &[value], timeout)?;
    expect_len(1, n)
}

/// Device status word (little-endian on the wire).
pub fn status<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<u32, TubeError> {
    let mut data = [0u8; 4];
    let n = transport.control_in(REQ_STATUS, 0, 0, &mut data, timeout)?;
    expect_len(4, n)?;
    let word = u32::from_le_bytes(data);
    debug!(status = word, "read device status");
    Ok(word)
}

/// Install a stream key. Every bulk byte sent afterwards must be encoded
/// with the tables derived from the same key.
pub fn set_key<T: Transport + ?Sized>(
    transport: &mut T,
    key: &[u8; KEY_LEN],
    timeout: Duration,
) -> Result<(), TubeError> {
    let n = transport.control_out(REQ_SET_KEY, 0, 0, key, timeout)?;
    expect_len(KEY_LEN, n)
}

/// The undocumented 0x05 read. Returns the four bytes the device replies with.
pub fn unknown<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<[u8; 4], TubeError> {
    let mut data = [0u8; 4];
    let n = transport.control_in(REQ_UNKNOWN, 0, 0, &mut data, timeout)?;
    expect_len(4, n)?;
    Ok(data)
}

/// Read the attached display's EDID.
///
/// The adapter relays one DDC byte per request: the byte offset goes in
/// the high half of `value`, and the reply is a status byte followed by
/// the EDID byte.
pub fn get_edid<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<[u8; EDID_LEN], TubeError> {
    let mut edid = [0u8; EDID_LEN];
    for (offset, byte) in edid.iter_mut().enumerate() {
        let mut reply = [0u8; 2];
        let n = transport.control_in(REQ_GET_EDID, (offset as u16) << 8, EDID_INDEX, &mut reply, timeout)?;
        expect_len(2, n)?;
        *byte = reply[1];
    }
    Ok(edid)
}

/// Copy the whole peekable window into `out`, one byte per request.
pub fn dump_memory<T: Transport + ?Sized, W: Write>(
    transport: &mut T,
    out: &mut W,
    timeout: Duration,
) -> Result<usize, TubeError> {
    let mut page = [0u8; 256];
    for base in (0..PEEK_WINDOW).step_by(page.len()) {
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = peek(transport, (base + i) as u16, timeout)?;
        }
        out.write_all(&page)?;
    }
    debug!(bytes = PEEK_WINDOW, "dumped device memory");
    Ok(PEEK_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DEFAULT_TIMEOUT;
    use crate::transport::{CaptureTransport, Direction};

    #[test]
    fn peek_and_poke_use_fixed_requests() {
        let mut t = CaptureTransport::new(Vec::new());
        t.push_response(vec![0x5A]);
        assert_eq!(peek(&mut t, 0x1234, DEFAULT_TIMEOUT).unwrap(), 0x5A);
        poke(&mut t, 0x1234, 0x77, DEFAULT_TIMEOUT).unwrap();

        let c = t.controls();
        assert_eq!((c[0].direction, c[0].request, c[0].value), (Direction::In, 0x04, 0x1234));
        assert_eq!((c[1].direction, c[1].request, c[1].value), (Direction::Out, 0x03, 0x1234));
        assert_eq!(c[1].data, vec![0x77]);
    }

    #[test]
    fn status_is_little_endian() {
        let mut t = CaptureTransport::new(Vec::new());
        t.push_response(vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(status(&mut t, DEFAULT_TIMEOUT).unwrap(), 0x0403_0201);
        assert_eq!(t.controls()[0].request, REQ_STATUS);
    }

    #[test]
    fn set_key_sends_raw_key() {
        let mut t = CaptureTransport::new(Vec::new());
        set_key(&mut t, &[0xAB; KEY_LEN], DEFAULT_TIMEOUT).unwrap();
        let rec = &t.controls()[0];
        assert_eq!(rec.request, 0x12);
        assert_eq!(rec.data, vec![0xAB; KEY_LEN]);
    }

    #[test]
    fn edid_takes_second_reply_byte() {
        let mut t = CaptureTransport::new(Vec::new());
        for i in 0..EDID_LEN as u8 {
            t.push_response(vec![0x00, i ^ 0xFF]);
        }
        let edid = get_edid(&mut t, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(edid[0], 0xFF);
        assert_eq!(edid[127], 127 ^ 0xFF);
        assert_eq!(t.controls().len(), EDID_LEN);
        assert_eq!(t.controls()[3].value, 3 << 8);
        assert_eq!(t.controls()[3].index, 0xA1);
    }

    #[test]
    fn unknown_request_reads_four_bytes() {
        let mut t = CaptureTransport::new(Vec::new());
        t.push_response(vec![9, 8, 7, 6]);
        assert_eq!(unknown(&mut t, DEFAULT_TIMEOUT).unwrap(), [9, 8, 7, 6]);
        assert_eq!(t.controls()[0].request, REQ_UNKNOWN);
    }

    #[test]
    fn dump_reads_full_window() {
        let mut t = CaptureTransport::new(Vec::new());
        let mut out = Vec::new();
        assert_eq!(dump_memory(&mut t, &mut out, DEFAULT_TIMEOUT).unwrap(), PEEK_WINDOW);
        assert_eq!(out.len(), PEEK_WINDOW);
        assert_eq!(t.controls().last().unwrap().value, 0xFFFF);
    }
}
