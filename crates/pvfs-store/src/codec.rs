//! Variable-length integer encoding for children and roots attributes.
//!
//! Unsigned values use 7-bit groups, least significant first, with the high
//! bit marking continuation. Signed deltas are zig-zag mapped first so that
//! small negative steps stay short.
//!
//! | Value Range          | Bytes |
//! |----------------------|-------|
//! | 0 - 127              | 1     |
//! | 128 - 16383          | 2     |
//! | 16384 - 2097151      | 3     |
//! | ...                  | ...   |
//! | up to u64::MAX       | 10    |

/// Longest encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_signed(out: &mut Vec<u8>, value: i64) {
    write_varint(out, zigzag_encode(value));
}

/// Decode one varint; returns the value and the bytes consumed.
///
/// `None` for an empty, truncated or overlong encoding.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        let group = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return None;
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Cursor over an encoded buffer
pub struct VarintReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> VarintReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn next_unsigned(&mut self) -> Option<u64> {
        let (value, read) = read_varint(&self.buf[self.pos..])?;
        self.pos += read;
        Some(value)
    }

    pub fn next_signed(&mut self) -> Option<i64> {
        self.next_unsigned().map(zigzag_decode)
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_small_magnitudes_stay_small() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MAX)), i64::MAX);
    }

    #[test]
    fn varint_boundaries() {
        for (value, len) in [(0u64, 1), (127, 1), (128, 2), (16383, 2), (16384, 3), (u64::MAX, 10)] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            assert_eq!(out.len(), len, "value {}", value);
            assert_eq!(varint_len(value), len);
            assert_eq!(read_varint(&out), Some((value, len)));
        }
    }

    #[test]
    fn truncated_and_overlong_rejected() {
        assert_eq!(read_varint(&[]), None);
        assert_eq!(read_varint(&[0x80]), None);
        assert_eq!(read_varint(&[0xFF; 11]), None);
        let mut overflow = vec![0xFF; 9];
        overflow.push(0x02);
        assert_eq!(read_varint(&overflow), None);
    }

    #[test]
    fn reader_walks_mixed_values() {
        let mut out = Vec::new();
        write_varint(&mut out, 3);
        write_signed(&mut out, -5);
        write_signed(&mut out, 300);
        let mut reader = VarintReader::new(&out);
        assert_eq!(reader.next_unsigned(), Some(3));
        assert_eq!(reader.next_signed(), Some(-5));
        assert_eq!(reader.next_signed(), Some(300));
        assert!(reader.is_exhausted());
        assert_eq!(reader.next_unsigned(), None);
    }
}
