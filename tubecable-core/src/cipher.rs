//! Keystream obfuscation of the outgoing command stream.
//!
//! Once a key has been installed with [`control::set_key`], the adapter
//! expects every bulk byte XORed with a keystream derived from that key.
//! The derivation is a fixed function of the key:
//!
//! * `seed = crc12(key) ^ crc12(NULL_KEY)` (CRC-12/DECT)
//! * an offset map: a 12-bit LFSR sequence XORed with the seed, which
//!   orders the 4096 windows of the substitution table
//! * a 69632-byte substitution table of 4096 windows of 17 bytes, filled
//!   from a second LFSR started at the seed
//!
//! The null key has seed 0. Zero is a fixed point of the LFSR, so its
//! windows are all zero and a session that has not selected a key sends
//! plaintext through the same transform.
//!
//! [`control::set_key`]: crate::control::set_key

use std::collections::HashMap;
use std::sync::Arc;

use crc::{CRC_12_DECT, Crc};
use tracing::debug;

use crate::error::TubeError;

/// Length of a cipher key.
pub const KEY_LEN: usize = 16;

/// Entries in the offset map.
pub const OFFSET_ENTRIES: usize = 4096;

/// Bytes per substitution window.
pub const WINDOW_LEN: usize = 17;

/// Total substitution table size (`0x11000`).
pub const SUBSTITUTION_LEN: usize = OFFSET_ENTRIES * WINDOW_LEN;

/// Key that leaves the stream unchanged.
pub const NULL_KEY: [u8; KEY_LEN] = [
    0x57, 0xCD, 0xDC, 0xA7, 0x1C, 0x88, 0x5E, 0x15, 0x60, 0xFE, 0xC6, 0x97, 0x16, 0x3D, 0x47, 0xF2,
];

const CRC12: Crc<u16> = Crc::<u16>::new(&CRC_12_DECT);

/// Feedback taps of the 12-bit LFSR.
const LFSR_TAPS: u16 = 0x0829;
const LFSR_MASK: u16 = 0x0FFF;

/// CRC-12 over `data` (polynomial `0x80F`, init 0, no reflection).
pub fn crc12(data: &[u8]) -> u16 {
    CRC12.checksum(data)
}

fn lfsr_step(state: u16) -> u16 {
    let feedback = ((state & LFSR_TAPS).count_ones() & 1) as u16;
    ((state << 1) | feedback) & LFSR_MASK
}

/// Parse a key written as 32 hex digits. Spaces, `:` and `-` between
/// digits are ignored.
pub fn parse_key(text: &str) -> Result<[u8; KEY_LEN], TubeError> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !matches!(b, b' ' | b':' | b'-'))
        .collect();
    if digits.len() != KEY_LEN * 2 {
        return Err(TubeError::InvalidKey(format!(
            "expected {} hex digits, got {}",
            KEY_LEN * 2,
            digits.len()
        )));
    }

    let mut key = [0u8; KEY_LEN];
    for (byte, pair) in key.iter_mut().zip(digits.chunks_exact(2)) {
        let pair = std::str::from_utf8(pair).map_err(|_| TubeError::InvalidKey(text.to_string()))?;
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| TubeError::InvalidKey(format!("bad hex pair {pair:?}")))?;
    }
    Ok(key)
}

// ── CipherTables ─────────────────────────────────────────────────

/// Derived keystream tables for one key. Immutable once generated.
pub struct CipherTables {
    key: [u8; KEY_LEN],
    seed: u16,
    offsets: Box<[u16; OFFSET_ENTRIES]>,
    substitution: Box<[u8]>,
}

impl std::fmt::Debug for CipherTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherTables")
            .field("seed", &format_args!("{:#05x}", self.seed))
            .field("null", &self.is_null())
            .finish_non_exhaustive()
    }
}

impl CipherTables {
    /// Derive the tables for `key`.
    pub fn generate(key: &[u8; KEY_LEN]) -> Self {
        let seed = crc12(key) ^ crc12(&NULL_KEY);

        let mut offsets = Box::new([0u16; OFFSET_ENTRIES]);
        offsets[0] = seed;
        let mut state = 1u16;
        for slot in offsets.iter_mut().skip(1) {
            *slot = state ^ seed;
            state = lfsr_step(state);
        }

        let mut substitution = vec![0u8; SUBSTITUTION_LEN].into_boxed_slice();
        let mut state = seed;
        for &offset in offsets.iter() {
            let start = offset as usize * WINDOW_LEN;
            for byte in &mut substitution[start..start + WINDOW_LEN] {
                for _ in 0..8 {
                    state = lfsr_step(state);
                }
                *byte = state as u8;
            }
        }

        debug!(seed, "generated cipher tables");
        Self {
            key: *key,
            seed,
            offsets,
            substitution,
        }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// `crc12(key) ^ crc12(NULL_KEY)`; zero for the null key.
    pub fn seed(&self) -> u16 {
        self.seed
    }

    pub fn offsets(&self) -> &[u16; OFFSET_ENTRIES] {
        &self.offsets
    }

    pub fn substitution(&self) -> &[u8] {
        &self.substitution
    }

    /// True when encoding is the identity.
    pub fn is_null(&self) -> bool {
        self.substitution.iter().all(|&b| b == 0)
    }

    /// Keystream byte for absolute stream position `pos`.
    fn keystream(&self, pos: usize) -> u8 {
        let window = self.offsets[pos % OFFSET_ENTRIES] as usize * WINDOW_LEN;
        self.substitution[window + (pos / OFFSET_ENTRIES) % WINDOW_LEN]
    }

    /// Encode `data` in place as the start of a stream.
    pub fn encode(&self, data: &mut [u8]) {
        self.encode_at(data, 0);
    }

    /// Encode `data` in place as the bytes starting at stream `position`.
    pub fn encode_at(&self, data: &mut [u8], position: usize) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.keystream(position + i);
        }
    }

    /// Inverse of [`encode`](Self::encode); the transform is an XOR.
    pub fn decode(&self, data: &mut [u8]) {
        self.encode_at(data, 0);
    }

    pub fn decode_at(&self, data: &mut [u8], position: usize) {
        self.encode_at(data, position);
    }
}

// ── CipherCache ──────────────────────────────────────────────────

/// Generated tables by key. Generation touches 68 KiB, so sessions that
/// switch between a few keys keep them here.
#[derive(Debug, Default)]
pub struct CipherCache {
    tables: HashMap<[u8; KEY_LEN], Arc<CipherTables>>,
}

impl CipherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables for `key`, generating them on first use.
    pub fn get_or_generate(&mut self, key: &[u8; KEY_LEN]) -> Arc<CipherTables> {
        Arc::clone(
            self.tables
                .entry(*key)
                .or_insert_with(|| Arc::new(CipherTables::generate(key))),
        )
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = *b"0123456789abcdef";

    #[test]
    fn crc12_check_value() {
        assert_eq!(crc12(b"123456789"), 0xF5B);
        assert_eq!(crc12(b""), 0);
    }

    #[test]
    fn lfsr_has_full_period() {
        let mut state = 1u16;
        let mut steps = 0;
        loop {
            state = lfsr_step(state);
            steps += 1;
            if state == 1 {
                break;
            }
        }
        assert_eq!(steps, 4095);
    }

    #[test]
    fn offset_map_is_a_permutation() {
        let tables = CipherTables::generate(&KEY);
        let mut seen = vec![false; OFFSET_ENTRIES];
        for &o in tables.offsets().iter() {
            assert!(!seen[o as usize], "offset {o} repeated");
            seen[o as usize] = true;
        }
        assert_eq!(tables.offsets()[0], tables.seed());
    }

    #[test]
    fn reference_vectors() {
        let tables = CipherTables::generate(&KEY);
        assert_eq!(crc12(&NULL_KEY), 0x511);
        assert_eq!(tables.seed(), 0x8B3);
        assert_eq!(&tables.offsets()[..4], &[0x8B3, 0x8B2, 0x8B0, 0x8B4]);
        assert_eq!(&tables.substitution()[..4], &[0x77, 0x30, 0xD6, 0x25]);

        let mut stream = [0u8; 8];
        tables.encode(&mut stream);
        assert_eq!(stream, [0xAA, 0x92, 0x5E, 0x62, 0x0D, 0xAB, 0xE9, 0xE9]);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = CipherTables::generate(&KEY);
        let b = CipherTables::generate(&KEY);
        assert_eq!(a.substitution(), b.substitution());
        assert_eq!(a.offsets(), b.offsets());
        assert_eq!(a.substitution().len(), 0x11000);
    }

    #[test]
    fn null_key_is_identity() {
        let tables = CipherTables::generate(&NULL_KEY);
        assert_eq!(tables.seed(), 0);
        assert!(tables.is_null());
        // Still a full permutation, just with nothing to XOR in.
        assert_eq!(tables.offsets()[1], 1);
        let mut data = vec![0xAF, 0x20, 0xFF, 0x00, 0xA0];
        tables.encode_at(&mut data, 12345);
        assert_eq!(data, vec![0xAF, 0x20, 0xFF, 0x00, 0xA0]);
    }

    #[test]
    fn encode_then_decode_restores_data() {
        let tables = CipherTables::generate(&KEY);
        assert!(!tables.is_null());
        let original: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();
        let mut data = original.clone();
        tables.encode(&mut data);
        assert_ne!(data, original);
        tables.decode(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn split_encoding_matches_whole() {
        let tables = CipherTables::generate(&KEY);
        let mut whole = vec![0x55u8; 9000];
        tables.encode(&mut whole);

        let mut parts = vec![0x55u8; 9000];
        let (head, tail) = parts.split_at_mut(4100);
        tables.encode_at(head, 0);
        tables.encode_at(tail, 4100);
        assert_eq!(whole, parts);
    }

    #[test]
    fn different_keys_give_different_streams() {
        let mut other = KEY;
        other[15] ^= 1;
        let a = CipherTables::generate(&KEY);
        let b = CipherTables::generate(&other);
        assert_ne!(a.seed(), b.seed());
        assert_ne!(a.substitution(), b.substitution());
    }

    #[test]
    fn cache_reuses_tables() {
        let mut cache = CipherCache::new();
        let a = cache.get_or_generate(&KEY);
        let b = cache.get_or_generate(&KEY);
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_generate(&NULL_KEY);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn key_parsing() {
        assert_eq!(parse_key("57CDDCA71C885E1560FEC697163D47F2").unwrap(), NULL_KEY);
        assert_eq!(
            parse_key("57:cd:dc:a7:1c:88:5e:15:60:fe:c6:97:16:3d:47:f2").unwrap(),
            NULL_KEY
        );
        assert!(matches!(parse_key("abcd"), Err(TubeError::InvalidKey(_))));
        assert!(parse_key(&"zz".repeat(16)).is_err());
    }
}
