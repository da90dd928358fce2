//! `chronicle-wire`: the self-describing "BinaryWire" field codec used for
//! directory-listing and queuefile-header metadata records.
//!
//! A length/tag byte stream: small control bytes introduce typed fields,
//! `0x82` introduces a 32-bit-length nested block. [`reader::parse`] drives a
//! [`reader::WireVisitor`] over a byte slice; [`writer::WirePad`] is the
//! matching growable-buffer writer.

mod control;
mod reader;
mod writer;

pub use control::{
    HD_EOF, HD_MASK_LENGTH, HD_MASK_META, HD_METADATA, HD_UNALLOCATED, HD_WORKING,
    SHORT_TEXT_MAX_LEN, read_stop_bit_len, write_stop_bit_len,
};
pub use reader::{MAX_NESTING_DEPTH, WireError, WireVisitor, parse};
pub use writer::{NestMark, RecordMark, WirePad};
