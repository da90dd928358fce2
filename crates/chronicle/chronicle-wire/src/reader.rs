//! Parser for the BinaryWire self-describing field stream.
//!
//! The reference implementation drives a struct of C function pointers; here
//! a single [`WireVisitor`] trait with no-op defaults plays the same role,
//! so callers only implement the handlers they care about (the directory
//! listing reader only needs `field_u64_cell`, the queuefile header reader
//! only needs the small-integer and text handlers).

use crate::control::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("wire buffer truncated at offset {0}")]
    Truncated(usize),
    #[error("wire text at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("wire nesting exceeded maximum depth of {0}")]
    NestingTooDeep(usize),
}

/// Maximum nesting depth the parser tracks, per §4.1 ("bounded depth, >= 10").
pub const MAX_NESTING_DEPTH: usize = 16;

/// Callback sink for a parsed BinaryWire field stream.
///
/// All methods are no-ops by default; implement only the ones relevant to
/// the record being parsed.
pub trait WireVisitor {
    fn event_name(&mut self, _name: &str) {}
    fn type_prefix(&mut self, _name: &str) {}
    fn field_name(&mut self, _name: &str) {}
    fn uint8(&mut self, _v: u8) {}
    fn int16(&mut self, _v: i16) {}
    fn int32(&mut self, _v: i32) {}
    fn int64(&mut self, _v: i64) {}
    fn float32(&mut self, _v: f32) {}
    fn text(&mut self, _v: &str) {}
    fn int64_array(&mut self, _used: u64, _values: &[i64]) {}
    /// Raw-pointer access: offset of an 8-byte-aligned `int64` field's
    /// payload, relative to the start of the buffer the parser was given.
    /// Callers that need to poll or CAS this cell later (directory-listing
    /// cells) record the offset here; `int64` still fires with the decoded
    /// value for callers that only want to read it once.
    fn ptr_u64(&mut self, _offset: usize) {}
    fn nest_enter(&mut self) {}
    fn nest_exit(&mut self) {}
}

/// Parses a BinaryWire field stream in `buf`, dispatching to `visitor`.
pub fn parse(buf: &[u8], visitor: &mut impl WireVisitor) -> Result<(), WireError> {
    parse_inner(buf, visitor, 0)
}

fn parse_inner(buf: &[u8], visitor: &mut impl WireVisitor, depth: usize) -> Result<(), WireError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    let mut pos = 0usize;
    while pos < buf.len() {
        let control = buf[pos];
        pos += 1;
        match control {
            0x00..=INLINE_UINT8_MAX => visitor.uint8(control),
            NESTED_BLOCK => {
                let len = read_u32_le(buf, pos)? as usize;
                pos += 4;
                let end = pos.checked_add(len).ok_or(WireError::Truncated(pos))?;
                let child = buf.get(pos..end).ok_or(WireError::Truncated(pos))?;
                visitor.nest_enter();
                parse_inner(child, visitor, depth + 1)?;
                visitor.nest_exit();
                pos = end;
            }
            INT64_ARRAY => {
                let len = read_u64_le(buf, pos)? as usize;
                pos += 8;
                let used = read_u64_le(buf, pos)?;
                pos += 8;
                let byte_len = len
                    .checked_mul(8)
                    .ok_or(WireError::Truncated(pos))?;
                let end = pos.checked_add(byte_len).ok_or(WireError::Truncated(pos))?;
                let raw = buf.get(pos..end).ok_or(WireError::Truncated(pos))?;
                let values: Vec<i64> = raw
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                visitor.int64_array(used, &values);
                pos = end;
            }
            PADDING_32 => {
                let count = read_u32_le(buf, pos)? as usize;
                pos += 4;
                pos = pos.checked_add(count).ok_or(WireError::Truncated(pos))?;
            }
            PADDING_8 => {}
            FLOAT32 => {
                let bytes = read_exact::<4>(buf, pos)?;
                pos += 4;
                visitor.float32(f32::from_le_bytes(bytes));
            }
            INT16 => {
                let bytes = read_exact::<2>(buf, pos)?;
                pos += 2;
                visitor.int16(i16::from_le_bytes(bytes));
            }
            INT32 => {
                let bytes = read_exact::<4>(buf, pos)?;
                pos += 4;
                visitor.int32(i32::from_le_bytes(bytes));
            }
            INT64 => {
                let bytes = read_exact::<8>(buf, pos)?;
                visitor.ptr_u64(pos);
                pos += 8;
                visitor.int64(i64::from_le_bytes(bytes));
            }
            TYPE_PREFIX => {
                let (text, next) = read_stop_bit_text(buf, pos)?;
                pos = next;
                visitor.type_prefix(text);
            }
            LONG_TEXT => {
                let (text, next) = read_stop_bit_text(buf, pos)?;
                pos = next;
                visitor.text(text);
            }
            EVENT_NAME => {
                let (text, next) = read_stop_bit_text(buf, pos)?;
                pos = next;
                visitor.event_name(text);
            }
            SHORT_FIELD_NAME_LO..=SHORT_FIELD_NAME_HI => {
                let len = (control - SHORT_FIELD_NAME_LO) as usize;
                let (text, next) = read_fixed_text(buf, pos, len)?;
                pos = next;
                visitor.field_name(text);
            }
            SHORT_TEXT_LO..=SHORT_TEXT_HI => {
                let len = (control - SHORT_TEXT_LO) as usize;
                let (text, next) = read_fixed_text(buf, pos, len)?;
                pos = next;
                visitor.text(text);
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_exact<const N: usize>(buf: &[u8], pos: usize) -> Result<[u8; N], WireError> {
    buf.get(pos..pos + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(WireError::Truncated(pos))
}

fn read_u32_le(buf: &[u8], pos: usize) -> Result<u32, WireError> {
    Ok(u32::from_le_bytes(read_exact::<4>(buf, pos)?))
}

fn read_u64_le(buf: &[u8], pos: usize) -> Result<u64, WireError> {
    Ok(u64::from_le_bytes(read_exact::<8>(buf, pos)?))
}

fn read_fixed_text(buf: &[u8], pos: usize, len: usize) -> Result<(&str, usize), WireError> {
    let end = pos.checked_add(len).ok_or(WireError::Truncated(pos))?;
    let raw = buf.get(pos..end).ok_or(WireError::Truncated(pos))?;
    let text = std::str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8(pos))?;
    Ok((text, end))
}

fn read_stop_bit_text(buf: &[u8], pos: usize) -> Result<(&str, usize), WireError> {
    let (len, body_start) = read_stop_bit_len(buf, pos).ok_or(WireError::Truncated(pos))?;
    read_fixed_text(buf, body_start, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        event_names: Vec<String>,
        field_names: Vec<String>,
        texts: Vec<String>,
        int64s: Vec<i64>,
        ptr_offsets: Vec<usize>,
    }

    impl WireVisitor for Capture {
        fn event_name(&mut self, name: &str) {
            self.event_names.push(name.to_string());
        }
        fn field_name(&mut self, name: &str) {
            self.field_names.push(name.to_string());
        }
        fn text(&mut self, v: &str) {
            self.texts.push(v.to_string());
        }
        fn int64(&mut self, v: i64) {
            self.int64s.push(v);
        }
        fn ptr_u64(&mut self, offset: usize) {
            self.ptr_offsets.push(offset);
        }
    }

    #[test]
    fn short_text_value_decodes_length_from_control_byte() {
        let mut buf = vec![SHORT_TEXT_LO + 5];
        buf.extend_from_slice(b"hello");
        let mut cap = Capture::default();
        parse(&buf, &mut cap).unwrap();
        assert_eq!(cap.texts, vec!["hello"]);
    }

    #[test]
    fn long_text_uses_stop_bit_length_not_c0_offset() {
        let long = "a much longer item that will need encoding as variable length text";
        let mut buf = vec![LONG_TEXT];
        write_stop_bit_len(&mut buf, long.len());
        buf.extend_from_slice(long.as_bytes());
        let mut cap = Capture::default();
        parse(&buf, &mut cap).unwrap();
        assert_eq!(cap.texts, vec![long]);
    }

    #[test]
    fn event_name_and_field_name_round_trip() {
        let mut buf = vec![EVENT_NAME];
        write_stop_bit_len(&mut buf, "listing.highestCycle".len());
        buf.extend_from_slice(b"listing.highestCycle");
        buf.push(SHORT_FIELD_NAME_LO + 3);
        buf.extend_from_slice(b"foo");
        let mut cap = Capture::default();
        parse(&buf, &mut cap).unwrap();
        assert_eq!(cap.event_names, vec!["listing.highestCycle"]);
        assert_eq!(cap.field_names, vec!["foo"]);
    }

    #[test]
    fn int64_reports_both_value_and_byte_offset() {
        let mut buf = vec![INT64];
        buf.extend_from_slice(&42i64.to_le_bytes());
        let mut cap = Capture::default();
        parse(&buf, &mut cap).unwrap();
        assert_eq!(cap.int64s, vec![42]);
        assert_eq!(cap.ptr_offsets, vec![1]);
    }

    #[test]
    fn nested_block_recurses_and_bounds_to_its_length() {
        let mut inner = Vec::new();
        inner.push(SHORT_TEXT_LO + 2);
        inner.extend_from_slice(b"hi");

        let mut buf = vec![NESTED_BLOCK];
        buf.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        buf.extend_from_slice(&inner);
        buf.push(SHORT_TEXT_LO + 1);
        buf.push(b'x');

        let mut cap = Capture::default();
        parse(&buf, &mut cap).unwrap();
        assert_eq!(cap.texts, vec!["hi", "x"]);
    }

    #[test]
    fn truncated_buffer_is_an_error_not_a_panic() {
        let buf = vec![INT64, 1, 2, 3];
        let mut cap = Capture::default();
        assert!(parse(&buf, &mut cap).is_err());
    }
}
