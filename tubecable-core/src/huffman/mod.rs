//! Huffman pixel-delta compression.
//!
//! | Module  | Purpose                                                   |
//! |---------|-----------------------------------------------------------|
//! | `table` | code table, text format, device image, decode tree         |
//! | `codec` | block compressor, table upload command, reference decoder  |

pub mod codec;
pub mod table;

pub use codec::{
    BLOCK_HEADER_LEN, DEFAULT_BLOCKSIZE, DecodedBlock, HuffmanCodec, decode_deltas, upload_device_table,
    upload_device_table_raw,
};
pub use table::{Code, DELTA_MAX, DELTA_MIN, HuffmanTable, MAX_CODE_LEN, TABLE_SIZE};
