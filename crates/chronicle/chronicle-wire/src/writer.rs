//! Growable byte-buffer writer ("pad") for the BinaryWire format.
//!
//! Mirrors the reference `wirepad_*` family: explicit methods for each wire
//! construct, with record/nest framing recording a backpatch position on
//! enter and filling it in on exit.

use crate::control::*;

/// Position of a record header placeholder written by [`WirePad::record_start`],
/// to be completed by [`WirePad::record_finish_metadata`] or
/// [`WirePad::record_finish_eof`].
#[derive(Debug, Clone, Copy)]
pub struct RecordMark(usize);

/// Position of a nested-block length placeholder written by
/// [`WirePad::nest_enter`], to be completed by [`WirePad::nest_exit`].
#[derive(Debug, Clone, Copy)]
pub struct NestMark(usize);

#[derive(Default)]
pub struct WirePad {
    buf: Vec<u8>,
}

impl WirePad {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Begins a record: reserves the 4-byte header, initially marked
    /// `Working` so a concurrent reader peeking mid-construction sees `Busy`
    /// rather than an unallocated or garbage header.
    pub fn record_start(&mut self) -> RecordMark {
        let pos = self.buf.len();
        self.buf.extend_from_slice(&HD_WORKING.to_le_bytes());
        RecordMark(pos)
    }

    /// Finishes a record started with [`Self::record_start`] as a metadata
    /// record: back-patches the header with the Metadata pattern and the
    /// number of bytes written since `mark`.
    pub fn record_finish_metadata(&mut self, mark: RecordMark) {
        self.finish_record(mark, HD_METADATA);
    }

    /// Finishes a record as a data record.
    pub fn record_finish_data(&mut self, mark: RecordMark) {
        self.finish_record(mark, HD_UNALLOCATED);
    }

    fn finish_record(&mut self, mark: RecordMark, pattern: u32) {
        let body_start = mark.0 + 4;
        let len = (self.buf.len() - body_start) as u32;
        let header = pattern | (len & HD_MASK_LENGTH);
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&header.to_le_bytes());
    }

    /// Appends a standalone EOF marker record (no body).
    pub fn record_eof(&mut self) {
        self.buf.extend_from_slice(&HD_EOF.to_le_bytes());
    }

    pub fn event_name(&mut self, name: &str) {
        self.buf.push(EVENT_NAME);
        write_stop_bit_len(&mut self.buf, name.len());
        self.buf.extend_from_slice(name.as_bytes());
    }

    pub fn type_prefix(&mut self, name: &str) {
        self.buf.push(TYPE_PREFIX);
        write_stop_bit_len(&mut self.buf, name.len());
        self.buf.extend_from_slice(name.as_bytes());
    }

    pub fn field_name(&mut self, name: &str) {
        assert!(
            name.len() <= SHORT_TEXT_MAX_LEN,
            "field name {name:?} exceeds {SHORT_TEXT_MAX_LEN} bytes"
        );
        self.buf.push(SHORT_FIELD_NAME_LO + name.len() as u8);
        self.buf.extend_from_slice(name.as_bytes());
    }

    /// Writes a text value, choosing the short inline form when it fits and
    /// falling back to the stop-bit-length-prefixed long form otherwise.
    pub fn text(&mut self, value: &str) {
        if value.len() <= SHORT_TEXT_MAX_LEN {
            self.buf.push(SHORT_TEXT_LO + value.len() as u8);
            self.buf.extend_from_slice(value.as_bytes());
        } else {
            self.buf.push(LONG_TEXT);
            write_stop_bit_len(&mut self.buf, value.len());
            self.buf.extend_from_slice(value.as_bytes());
        }
    }

    pub fn field_text(&mut self, field: &str, value: &str) {
        self.field_name(field);
        self.text(value);
    }

    /// Writes the smallest representation of `v` from
    /// {inline uint8, int16, int32, int64}.
    pub fn varint_i64(&mut self, v: i64) {
        if (0..=INLINE_UINT8_MAX as i64).contains(&v) {
            self.buf.push(v as u8);
        } else if let Ok(v16) = i16::try_from(v) {
            self.buf.push(INT16);
            self.buf.extend_from_slice(&v16.to_le_bytes());
        } else if let Ok(v32) = i32::try_from(v) {
            self.buf.push(INT32);
            self.buf.extend_from_slice(&v32.to_le_bytes());
        } else {
            self.buf.push(INT64);
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn field_varint(&mut self, field: &str, v: i64) {
        self.field_name(field);
        self.varint_i64(v);
    }

    /// Writes an 8-byte-aligned `int64` field: pads so the 8 payload bytes
    /// following the `0xA7` control byte land on an 8-byte boundary within
    /// the buffer, then writes the tag and value.
    ///
    /// Returns the byte offset (within this pad) of the 8-byte payload, so
    /// callers that need raw pointer access to the cell later (directory
    /// listing polled cells) can record it.
    pub fn uint64_aligned(&mut self, v: u64) -> usize {
        self.pad_to_x8();
        let tag_pos = self.buf.len();
        self.buf.push(INT64);
        let payload_pos = self.buf.len();
        debug_assert_eq!(payload_pos % 8, 0);
        self.buf.extend_from_slice(&v.to_le_bytes());
        let _ = tag_pos;
        payload_pos
    }

    pub fn field_uint64_aligned(&mut self, field: &str, v: u64) -> usize {
        self.field_name(field);
        self.uint64_aligned(v)
    }

    /// Pads the buffer so that the *next* byte written at `len() + 1` (i.e.
    /// after one more control byte) lands on an 8-byte boundary.
    fn pad_to_x8(&mut self) {
        let target = (self.buf.len() + 1).div_ceil(8) * 8 - 1;
        let gap = target - self.buf.len();
        if gap == 0 {
            return;
        }
        if gap <= 4 {
            // 0x8F is a single self-contained byte; cheaper than 0x8E's
            // 5-byte minimum overhead for small gaps.
            for _ in 0..gap {
                self.buf.push(PADDING_8);
            }
        } else {
            // 1 byte for the 0x8E tag + 4 bytes for the count + `skip` bytes.
            let skip = gap - 5;
            self.buf.push(PADDING_32);
            self.buf.extend_from_slice(&(skip as u32).to_le_bytes());
            self.buf.resize(self.buf.len() + skip, 0);
        }
    }

    /// Begins a nested `0x82` block.
    pub fn nest_enter(&mut self) -> NestMark {
        self.buf.push(NESTED_BLOCK);
        let pos = self.buf.len();
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        NestMark(pos)
    }

    /// Back-patches the length of a nested block started with [`Self::nest_enter`].
    pub fn nest_exit(&mut self, mark: NestMark) {
        let len = (self.buf.len() - (mark.0 + 4)) as u32;
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&len.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{WireVisitor, parse};

    #[derive(Default)]
    struct Capture {
        texts: Vec<String>,
        int64s: Vec<i64>,
        ptr_offsets: Vec<usize>,
        field_names: Vec<String>,
    }

    impl WireVisitor for Capture {
        fn text(&mut self, v: &str) {
            self.texts.push(v.to_string());
        }
        fn int64(&mut self, v: i64) {
            self.int64s.push(v);
        }
        fn ptr_u64(&mut self, offset: usize) {
            self.ptr_offsets.push(offset);
        }
        fn field_name(&mut self, name: &str) {
            self.field_names.push(name.to_string());
        }
    }

    #[test]
    fn text_round_trips_through_reader_short_and_long() {
        let mut pad = WirePad::new();
        pad.text("short");
        pad.text("a much longer item that will need encoding as variable length text");
        let mut cap = Capture::default();
        parse(pad.bytes(), &mut cap).unwrap();
        assert_eq!(
            cap.texts,
            vec![
                "short".to_string(),
                "a much longer item that will need encoding as variable length text".to_string()
            ]
        );
    }

    #[test]
    fn uint64_aligned_cell_lands_on_8_byte_boundary() {
        let mut pad = WirePad::new();
        pad.field_name("x"); // shift the buffer off an 8-byte boundary
        let offset = pad.uint64_aligned(0xABCD);
        assert_eq!(offset % 8, 0);
        let mut cap = Capture::default();
        parse(pad.bytes(), &mut cap).unwrap();
        assert_eq!(cap.int64s, vec![0xABCD]);
        assert_eq!(cap.ptr_offsets, vec![offset]);
    }

    #[test]
    fn record_finish_metadata_backpatches_length_and_pattern() {
        let mut pad = WirePad::new();
        let mark = pad.record_start();
        pad.field_text("greeting", "hello");
        pad.record_finish_metadata(mark);

        let header = u32::from_le_bytes(pad.bytes()[0..4].try_into().unwrap());
        assert_eq!(header & HD_MASK_META, HD_METADATA);
        let len = (header & HD_MASK_LENGTH) as usize;
        assert_eq!(len, pad.len() - 4);
    }

    #[test]
    fn varint_picks_smallest_representation() {
        let mut pad = WirePad::new();
        pad.varint_i64(5);
        pad.varint_i64(1000);
        pad.varint_i64(100_000);
        pad.varint_i64(10_000_000_000);
        assert_eq!(pad.bytes()[0], 5);
        assert_eq!(pad.bytes()[1], INT16);
    }
}
