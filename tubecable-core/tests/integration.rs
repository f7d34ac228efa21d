//! Integration tests: full encode pipeline from pixels to captured
//! stream, table files on disk, and keyed streams.

use std::fs;
use std::sync::Arc;

use tubecable_core::huffman::BLOCK_HEADER_LEN;
use tubecable_core::protocol::{graphics_rle, set_all_registers, sync};
use tubecable_core::{
    CaptureTransport, CipherTables, CommandBuffer, DeviceAddress, DeviceSession, GrowthPolicy,
    HuffmanCodec, HuffmanTable, Mode, NULL_KEY, RleRun, SessionConfig, TubeError,
    rgb24_to_rgb565,
};

// ── Helpers ──────────────────────────────────────────────────────

/// A horizontal gradient with a few hard edges, as RGB888.
fn test_image(width: usize, height: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let edge = if (x / 16 + y / 16) % 2 == 0 { 0 } else { 0x80 };
            rgb.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, edge]);
        }
    }
    rgb
}

/// Walk a stream of compressed blocks and the trailing sync.
fn decode_stream(codec: &HuffmanCodec, bytes: &[u8]) -> Vec<(u32, Vec<u16>)> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while bytes[pos] != 0xA0 {
        let block = codec.decode_block(&bytes[pos..]).unwrap();
        pos += block.len;
        blocks.push((block.addr.get(), block.pixels));
    }
    assert_eq!(pos, bytes.len() - 1);
    blocks
}

// ── Compression pipeline ─────────────────────────────────────────

#[test]
fn test_image_round_trips_through_compressed_stream() {
    let (width, height) = (64, 8);
    let pixels = rgb24_to_rgb565(&test_image(width, height));

    let mut session = DeviceSession::new(CaptureTransport::new(Vec::new())).unwrap();
    session.write_framebuffer(DeviceAddress::ZERO, &pixels).unwrap();
    session.flush().unwrap();

    let out = session.transport().sink().clone();
    // START HUFFMAN magic size image
    assert_eq!(&out[..2], &[0xAF, 0xE0]);
    let image_len = u32::from_be_bytes(out[6..10].try_into().unwrap()) as usize;
    let stream = &out[10 + image_len..];

    let codec = HuffmanCodec::default();
    let blocks = decode_stream(&codec, stream);
    let mut expected_addr = 0;
    let mut decoded = Vec::new();
    for (addr, block) in blocks {
        assert_eq!(addr, expected_addr);
        expected_addr += 2 * block.len() as u32;
        decoded.extend(block);
    }
    assert_eq!(decoded, pixels);
}

#[test]
fn test_compress_bounds_hold_for_every_blocksize() {
    let pixels = rgb24_to_rgb565(&test_image(300, 2));
    let codec = HuffmanCodec::default();
    for blocksize in 1..=64 {
        let mut buf = CommandBuffer::with_policy(0, GrowthPolicy::Grow);
        let n = codec
            .compress(&mut buf, DeviceAddress::ZERO, &pixels, blocksize)
            .unwrap();
        assert!(n >= 1);
        let header_and_first = BLOCK_HEADER_LEN + 4;
        assert!(buf.len() <= blocksize.max(header_and_first));
        if n > 1 {
            assert!(buf.len() <= blocksize);
        }
    }
}

// ── Table files ──────────────────────────────────────────────────

#[test]
fn test_exported_table_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.tbl");
    fs::write(&path, HuffmanTable::default_table().to_text()).unwrap();

    let mut codec = HuffmanCodec::new(Arc::new(HuffmanTable::default_table()));
    let loaded = codec.load_table(&path).unwrap();
    assert_eq!(loaded.as_ref(), HuffmanTable::shared_default().as_ref());
    assert!(loaded.is_canonical());
}

#[test]
fn test_failed_load_keeps_previous_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.tbl");

    // Everything but the last entry.
    let text = HuffmanTable::default_table().to_text();
    let truncated: Vec<&str> = text.lines().collect();
    fs::write(&path, truncated[..truncated.len() - 1].join("\n")).unwrap();

    let mut codec = HuffmanCodec::default();
    let before = Arc::clone(codec.table());
    let err = codec.load_table(&path).unwrap_err();
    assert!(matches!(err, TubeError::IncompleteTable { missing: 1, .. }));
    assert!(Arc::ptr_eq(&before, codec.table()));

    let missing = dir.path().join("nope.tbl");
    assert!(matches!(codec.load_table(&missing), Err(TubeError::Io(_))));
    assert!(Arc::ptr_eq(&before, codec.table()));
}

// ── Protocol ─────────────────────────────────────────────────────

#[test]
fn test_mode_burst_is_93_bytes() {
    let mut buf = CommandBuffer::with_capacity(93);
    set_all_registers(&mut buf, Mode::Mode640x480.registers()).unwrap();
    let bytes = buf.as_bytes().unwrap();
    assert_eq!(bytes.len(), 93);
    assert_eq!(&bytes[..3], &[0x20, 0xFF, 0x00]);
    assert_eq!(&bytes[90..], &[0x20, 0xFF, 0xFF]);
    for (i, triple) in bytes[3..90].chunks(3).enumerate() {
        assert_eq!(triple[0], 0x20);
        assert_eq!(triple[1], i as u8);
        assert_eq!(triple[2], Mode::Mode640x480.registers()[i]);
    }
}

#[test]
fn test_rle_and_sync_in_one_buffer() {
    let mut buf = CommandBuffer::with_capacity(9);
    let runs = RleRun::from_pixels(&[0x1234; 100]);
    graphics_rle(&mut buf, DeviceAddress::new(0x123456).unwrap(), &runs).unwrap();
    sync(&mut buf).unwrap();
    assert_eq!(
        buf.as_bytes().unwrap(),
        &[0x69, 0x12, 0x34, 0x56, 1, 100, 0x12, 0x34, 0xA0]
    );
}

// ── Keyed sessions ───────────────────────────────────────────────

#[test]
fn test_full_session_into_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.bin");
    let file = fs::File::create(&path).unwrap();

    let config = SessionConfig {
        mode: Mode::Mode800x600,
        ..SessionConfig::default()
    };
    let key = *b"sixteen byte key";
    let mut session = DeviceSession::with_config(CaptureTransport::new(file), config).unwrap();
    session.init().unwrap();
    let init_len = session.stream_position();
    session.select_key(&key).unwrap();

    let pixels = rgb24_to_rgb565(&test_image(800, 4));
    session.write_rect(0, 0, 800, &pixels).unwrap();
    session.flush().unwrap();
    let keyed_len = session.stream_position();
    drop(session);

    let mut captured = fs::read(&path).unwrap();
    assert_eq!(captured.len(), init_len + keyed_len);
    assert_eq!(captured[init_len - 1], 0xA0);

    // Everything after the key change decodes to a plain stream.
    CipherTables::generate(&key).decode(&mut captured[init_len..]);
    assert_eq!(&captured[init_len..init_len + 2], &[0xAF, 0xE0]);
    assert_eq!(*captured.last().unwrap(), 0xA0);
}

#[test]
fn test_null_key_session_is_plaintext() {
    let mut a = DeviceSession::new(CaptureTransport::new(Vec::new())).unwrap();
    let mut b = DeviceSession::new(CaptureTransport::new(Vec::new())).unwrap();
    b.select_key(&NULL_KEY).unwrap();

    for s in [&mut a, &mut b] {
        s.write_framebuffer(DeviceAddress::ZERO, &[1, 2, 3, 4]).unwrap();
        s.flush().unwrap();
    }
    assert_eq!(a.transport().sink(), b.transport().sink());
}
