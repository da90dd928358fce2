//! Control byte constants for the BinaryWire self-describing field format, and
//! the stop-bit length encoding shared by the variable-length text/name fields.

pub const INLINE_UINT8_MAX: u8 = 0x7F;
pub const NESTED_BLOCK: u8 = 0x82;
pub const INT64_ARRAY: u8 = 0x8D;
pub const PADDING_32: u8 = 0x8E;
pub const PADDING_8: u8 = 0x8F;
pub const FLOAT32: u8 = 0x90;
pub const INT16: u8 = 0xA5;
pub const INT32: u8 = 0xA6;
pub const INT64: u8 = 0xA7;
pub const TYPE_PREFIX: u8 = 0xB6;
pub const LONG_TEXT: u8 = 0xB8;
pub const EVENT_NAME: u8 = 0xB9;
pub const SHORT_FIELD_NAME_LO: u8 = 0xC0;
pub const SHORT_FIELD_NAME_HI: u8 = 0xDF;
pub const SHORT_TEXT_LO: u8 = 0xE0;
pub const SHORT_TEXT_HI: u8 = 0xFF;

/// Longest text/name a short-form (`0xC0..=0xDF` / `0xE0..=0xFF`) control byte can carry.
pub const SHORT_TEXT_MAX_LEN: usize = 31;

// Record header bit layout (§3). These live alongside the wire codec because
// the writer's "queue container" framing (§4.1) builds these headers directly.
pub const HD_UNALLOCATED: u32 = 0x0000_0000;
pub const HD_WORKING: u32 = 0x8000_0000;
pub const HD_METADATA: u32 = 0x4000_0000;
pub const HD_EOF: u32 = 0xC000_0000;
pub const HD_MASK_LENGTH: u32 = 0x3FFF_FFFF;
pub const HD_MASK_META: u32 = 0xC000_0000;

/// Appends a stop-bit-encoded length: 7 bits per byte, high bit set on every
/// byte but the last.
pub fn write_stop_bit_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
}

/// Reads a stop-bit-encoded length starting at `buf[pos]`, returning the
/// decoded length and the position of the first byte after it.
pub fn read_stop_bit_len(buf: &[u8], mut pos: usize) -> Option<(usize, usize)> {
    let mut len = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(pos)?;
        pos += 1;
        len |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Some((len, pos));
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_bit_round_trips_small_and_large_lengths() {
        for len in [0usize, 1, 31, 127, 128, 300, 16384, 2_000_000] {
            let mut buf = Vec::new();
            write_stop_bit_len(&mut buf, len);
            let (decoded, next) = read_stop_bit_len(&buf, 0).unwrap();
            assert_eq!(decoded, len);
            assert_eq!(next, buf.len());
        }
    }
}
