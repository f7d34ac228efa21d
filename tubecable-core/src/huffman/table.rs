//! Pixel-delta code table.
//!
//! A table maps every delta in `-32768..=32768` (65537 symbols, indexed by
//! `delta + 32768`) to a variable-length bit code. Tables are total and
//! prefix-free; both are checked when a table is built, so a table that
//! exists is always safe to encode with.
//!
//! ## Text format
//!
//! ```text
//! # delta  bits  pattern
//! 0        1     0
//! -2       4     1000
//! ```
//!
//! One entry per line, `#` starts a comment. Every delta must appear
//! exactly once and the pattern must be exactly `bits` characters long.
//!
//! ## Device image
//!
//! The device rebuilds canonical codes from code lengths alone, so the
//! uploaded image is the length of every symbol in index order,
//! run-length coded as `(len: u8, run: u16 BE)` records.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::TubeError;

/// Smallest encodable delta.
pub const DELTA_MIN: i32 = -32768;
/// Largest encodable delta.
pub const DELTA_MAX: i32 = 32768;
/// Number of table entries.
pub const TABLE_SIZE: usize = (DELTA_MAX - DELTA_MIN + 1) as usize;
/// Longest code the bit writer accepts.
pub const MAX_CODE_LEN: u8 = 32;

/// Bytes per run record in the device image.
const IMAGE_RECORD_LEN: usize = 3;

// ── Code ─────────────────────────────────────────────────────────

/// A bit pattern of `len` bits, stored in the low bits of `bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code {
    pub len: u8,
    pub bits: u32,
}

impl Code {
    pub const fn new(len: u8, bits: u32) -> Self {
        Self { len, bits }
    }
}

/// Table index of a delta.
pub const fn index_of(delta: i32) -> usize {
    (delta - DELTA_MIN) as usize
}

/// Delta stored at a table index.
pub const fn delta_at(index: usize) -> i32 {
    index as i32 + DELTA_MIN
}

// ── Decode tree ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Node {
    /// Child indices for bit 0 / bit 1; 0 means "no child" (the root is
    /// never anybody's child).
    Internal([u32; 2]),
    Leaf(u32),
}

/// Why a code could not be inserted into the tree.
enum Collision {
    /// Symbol with this index shares a prefix relation with the new code.
    With(usize),
    /// The new code is a prefix of some longer code.
    Prefix,
}

fn build_tree(codes: &[Code]) -> Result<Vec<Node>, (usize, String)> {
    let mut nodes = Vec::with_capacity(codes.len() * 2);
    nodes.push(Node::Internal([0, 0]));

    for (index, code) in codes.iter().enumerate() {
        insert_code(&mut nodes, index, *code).map_err(|c| {
            let reason = match c {
                Collision::With(other) => format!(
                    "code for delta {} collides with code for delta {}",
                    delta_at(index),
                    delta_at(other)
                ),
                Collision::Prefix => format!(
                    "code for delta {} is a prefix of another code",
                    delta_at(index)
                ),
            };
            (index, reason)
        })?;
    }
    Ok(nodes)
}

fn insert_code(nodes: &mut Vec<Node>, index: usize, code: Code) -> Result<(), Collision> {
    let mut node = 0usize;
    for shift in (0..code.len).rev() {
        let bit = ((code.bits >> shift) & 1) as usize;
        let mut children = match nodes[node] {
            Node::Internal(children) => children,
            Node::Leaf(other) => return Err(Collision::With(other as usize)),
        };
        let child = children[bit] as usize;

        if shift == 0 {
            if child != 0 {
                return match nodes[child] {
                    Node::Leaf(other) => Err(Collision::With(other as usize)),
                    Node::Internal(_) => Err(Collision::Prefix),
                };
            }
            children[bit] = nodes.len() as u32;
            nodes[node] = Node::Internal(children);
            nodes.push(Node::Leaf(index as u32));
        } else if child == 0 {
            children[bit] = nodes.len() as u32;
            nodes[node] = Node::Internal(children);
            node = nodes.len();
            nodes.push(Node::Internal([0, 0]));
        } else {
            node = child;
        }
    }
    Ok(())
}

// ── HuffmanTable ─────────────────────────────────────────────────

/// Immutable, validated delta code table.
pub struct HuffmanTable {
    codes: Box<[Code]>,
    tree: Vec<Node>,
    canonical: bool,
    fingerprint: [u8; 32],
}

impl std::fmt::Debug for HuffmanTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuffmanTable")
            .field("entries", &self.codes.len())
            .field("canonical", &self.canonical)
            .field("fingerprint", &blake3::Hash::from(self.fingerprint).to_hex().as_str())
            .finish()
    }
}

impl PartialEq for HuffmanTable {
    fn eq(&self, other: &Self) -> bool {
        self.codes == other.codes
    }
}

impl Eq for HuffmanTable {}

impl HuffmanTable {
    /// Build a table from one code per index.
    pub fn from_codes(codes: Vec<Code>) -> Result<Self, TubeError> {
        Self::build(codes, |index| index + 1)
    }

    /// Assign canonical codes to per-symbol lengths (DEFLATE order:
    /// shorter codes first, ties broken by index).
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, TubeError> {
        Self::from_codes(canonical_codes(lengths)?)
    }

    /// Built-in table.
    ///
    /// Delta 0 gets the single bit `0`. Every other delta is `1` followed by
    /// the order-2 exp-Golomb code of its zigzag rank, which keeps small
    /// changes short and caps the longest code at 32 bits.
    pub fn default_table() -> Self {
        let lengths: Vec<u8> = (0..TABLE_SIZE).map(|i| default_code_len(delta_at(i))).collect();
        // The default lengths satisfy Kraft's inequality by construction.
        Self::from_lengths(&lengths).expect("built-in code lengths are valid")
    }

    /// Process-wide shared instance of [`default_table`](Self::default_table).
    pub fn shared_default() -> Arc<HuffmanTable> {
        static DEFAULT: OnceLock<Arc<HuffmanTable>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(Self::default_table())))
    }

    /// Parse the text format.
    pub fn parse(text: &str) -> Result<Self, TubeError> {
        let mut slots: Vec<Option<(Code, usize)>> = vec![None; TABLE_SIZE];

        for (lineno, raw) in text.lines().enumerate() {
            let line_no = lineno + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: String| TubeError::MalformedTableFile {
                line: line_no,
                reason,
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [delta, len, pattern] = fields[..] else {
                return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
            };

            let delta: i32 = delta
                .parse()
                .map_err(|_| malformed(format!("invalid delta {delta:?}")))?;
            if !(DELTA_MIN..=DELTA_MAX).contains(&delta) {
                return Err(malformed(format!("delta {delta} out of range")));
            }
            let len: u8 = len
                .parse()
                .map_err(|_| malformed(format!("invalid bit length {len:?}")))?;
            if len == 0 || len > MAX_CODE_LEN {
                return Err(malformed(format!("bit length {len} out of range 1..={MAX_CODE_LEN}")));
            }
            if pattern.len() != len as usize {
                return Err(malformed(format!(
                    "pattern {pattern:?} has {} bits, expected {len}",
                    pattern.len()
                )));
            }
            if !pattern.bytes().all(|b| b == b'0' || b == b'1') {
                return Err(malformed(format!("pattern {pattern:?} is not binary")));
            }
            let bits = u32::from_str_radix(pattern, 2)
                .map_err(|_| malformed(format!("pattern {pattern:?} is not binary")))?;

            let slot = &mut slots[index_of(delta)];
            if let Some((_, first)) = slot {
                return Err(malformed(format!("duplicate delta {delta} (first at line {first})")));
            }
            *slot = Some((Code::new(len, bits), line_no));
        }

        let missing = slots.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            let first = slots.iter().position(Option::is_none).map_or(DELTA_MIN, delta_at);
            return Err(TubeError::IncompleteTable { missing, first });
        }

        let (codes, lines): (Vec<Code>, Vec<usize>) = slots.into_iter().flatten().unzip();
        Self::build(codes, |index| lines[index])
    }

    /// Read and parse a table file.
    pub fn load(path: &Path) -> Result<Self, TubeError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Render the table in the text format accepted by [`parse`](Self::parse).
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.codes.len() * 48);
        out.push_str("# delta bits pattern\n");
        for (delta, code) in self.iter() {
            let width = code.len as usize;
            let _ = writeln!(out, "{delta} {} {:0width$b}", code.len, code.bits);
        }
        out
    }

    /// Code for a 16-bit pixel difference.
    pub fn code_for(&self, delta: i16) -> Code {
        self.codes[index_of(i32::from(delta))]
    }

    /// Code for any delta in the table's domain.
    pub fn get(&self, delta: i32) -> Option<Code> {
        if (DELTA_MIN..=DELTA_MAX).contains(&delta) {
            Some(self.codes[index_of(delta)])
        } else {
            None
        }
    }

    /// `(delta, code)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, Code)> + '_ {
        self.codes.iter().enumerate().map(|(i, c)| (delta_at(i), *c))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Whether codes equal the canonical assignment of their lengths.
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// BLAKE3 digest over every `(len, bits)` pair.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Run-length coded code lengths, as uploaded to the device.
    pub fn device_image(&self) -> Result<Vec<u8>, TubeError> {
        if !self.canonical {
            return Err(TubeError::NonCanonicalTable);
        }
        let mut image = Vec::new();
        let mut iter = self.codes.iter().map(|c| c.len).peekable();
        while let Some(len) = iter.next() {
            let mut run: u16 = 1;
            while run < u16::MAX && iter.peek() == Some(&len) {
                iter.next();
                run += 1;
            }
            image.push(len);
            image.extend_from_slice(&run.to_be_bytes());
        }
        Ok(image)
    }

    /// Rebuild a table from a device image.
    pub fn from_device_image(image: &[u8]) -> Result<Self, TubeError> {
        if image.len() % IMAGE_RECORD_LEN != 0 {
            return Err(TubeError::InvalidDeviceImage("truncated run record"));
        }
        let mut lengths = Vec::with_capacity(TABLE_SIZE);
        for record in image.chunks_exact(IMAGE_RECORD_LEN) {
            let run = u16::from_be_bytes([record[1], record[2]]) as usize;
            if run == 0 {
                return Err(TubeError::InvalidDeviceImage("empty run"));
            }
            if lengths.len() + run > TABLE_SIZE {
                return Err(TubeError::InvalidDeviceImage("too many symbols"));
            }
            lengths.extend(std::iter::repeat_n(record[0], run));
        }
        if lengths.len() != TABLE_SIZE {
            return Err(TubeError::InvalidDeviceImage("too few symbols"));
        }
        let codes = canonical_codes(&lengths)
            .map_err(|_| TubeError::InvalidDeviceImage("code lengths do not form a prefix code"))?;
        Self::from_codes(codes)
    }

    /// Walk the decode tree, pulling one bit at a time. Returns the delta,
    /// or `None` when bits run out or the path hits an unassigned code.
    pub(crate) fn decode_with(&self, mut next_bit: impl FnMut() -> Option<u8>) -> Option<i32> {
        let mut node = 0usize;
        loop {
            let Node::Internal(children) = self.tree[node] else {
                return None;
            };
            let child = children[next_bit()? as usize] as usize;
            if child == 0 {
                return None;
            }
            if let Node::Leaf(index) = self.tree[child] {
                return Some(delta_at(index as usize));
            }
            node = child;
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn build(codes: Vec<Code>, line_of: impl Fn(usize) -> usize) -> Result<Self, TubeError> {
        if codes.len() != TABLE_SIZE {
            return Err(TubeError::IncompleteTable {
                missing: TABLE_SIZE.saturating_sub(codes.len()),
                first: delta_at(codes.len().min(TABLE_SIZE - 1)),
            });
        }
        for (index, code) in codes.iter().enumerate() {
            let oversized = code.len < MAX_CODE_LEN && code.bits >> code.len != 0;
            if code.len == 0 || code.len > MAX_CODE_LEN || oversized {
                return Err(TubeError::MalformedTableFile {
                    line: line_of(index),
                    reason: format!(
                        "invalid code ({} bits, pattern {:#x}) for delta {}",
                        code.len,
                        code.bits,
                        delta_at(index)
                    ),
                });
            }
        }

        let tree = build_tree(&codes).map_err(|(index, reason)| TubeError::MalformedTableFile {
            line: line_of(index),
            reason,
        })?;

        let lengths: Vec<u8> = codes.iter().map(|c| c.len).collect();
        let canonical = canonical_codes(&lengths).is_ok_and(|c| c == codes);

        let mut raw = Vec::with_capacity(codes.len() * 5);
        for code in &codes {
            raw.push(code.len);
            raw.extend_from_slice(&code.bits.to_be_bytes());
        }
        let fingerprint = *blake3::hash(&raw).as_bytes();

        Ok(Self {
            codes: codes.into_boxed_slice(),
            tree,
            canonical,
            fingerprint,
        })
    }
}

impl Default for HuffmanTable {
    fn default() -> Self {
        Self::default_table()
    }
}

/// Code length of the built-in table for `delta`.
fn default_code_len(delta: i32) -> u8 {
    if delta == 0 {
        return 1;
    }
    let zigzag = if delta > 0 { 2 * delta - 1 } else { -2 * delta } as u32;
    // Order-2 exp-Golomb: `m + 4` written in `n` bits, preceded by `n - 3` zeros.
    let n = u32::BITS - (zigzag - 1 + 4).leading_zeros();
    (1 + 2 * n - 3) as u8
}

/// Canonical code assignment for the given lengths.
pub fn canonical_codes(lengths: &[u8]) -> Result<Vec<Code>, TubeError> {
    let mut bl_count = [0u64; MAX_CODE_LEN as usize + 1];
    for &len in lengths {
        if len == 0 || len > MAX_CODE_LEN {
            return Err(TubeError::InvalidDeviceImage("code length out of range"));
        }
        bl_count[len as usize] += 1;
    }

    let mut next_code = [0u64; MAX_CODE_LEN as usize + 1];
    let mut code = 0u64;
    for len in 1..=MAX_CODE_LEN as usize {
        code = (code + bl_count[len - 1]) << 1;
        if code + bl_count[len] > 1u64 << len {
            return Err(TubeError::InvalidDeviceImage("oversubscribed code lengths"));
        }
        next_code[len] = code;
    }

    Ok(lengths
        .iter()
        .map(|&len| {
            let bits = next_code[len as usize];
            next_code[len as usize] += 1;
            Code::new(len, bits as u32)
        })
        .collect())
}
