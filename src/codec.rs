//! Term codec: id encoding, record framing, marker escaping
//!
//! Each dictionary record is framed as `ID MARK_ID1 TEXT MARK_TXT ID MARK_ID2`
//! so it can be delimited scanning in either direction. Ids are encoded 6 bits
//! per byte into a printable alphabet disjoint from the marker band; payload
//! bytes that would collide with the markers are escaped.

use crate::error::{Result, TermdexError};

/// Escape prefix byte. Together with the three framing markers this is the
/// reserved low band that never appears raw inside a payload.
pub const ESC: u8 = 0x00;
/// Marker after the leading id copy.
pub const MARK_ID1: u8 = 0x01;
/// Marker after the text.
pub const MARK_TXT: u8 = 0x02;
/// Record terminator, after the trailing id copy.
pub const MARK_ID2: u8 = 0x03;

/// Payload bytes below this limit are escaped.
const ESCAPE_LIMIT: u8 = 0x08;
/// Shift applied to an escaped byte; `ESC` itself maps to the shift value.
const ESCAPE_SHIFT: u8 = 0x08;

/// First byte of the id alphabet (`':'`). The alphabet spans 64 printable
/// bytes, `0x3A..0x7A`.
pub const ID_BYTE_BASE: u8 = 0x3A;
const ID_BITS_PER_BYTE: u32 = 6;
/// Maximum encoded id length in bytes.
pub const ID_MAX_BYTES: usize = 6;
/// Largest encodable id value (36 bits).
pub const MAX_ID_VALUE: u64 = (1 << (ID_BITS_PER_BYTE as u64 * ID_MAX_BYTES as u64)) - 1;

/// Check whether a byte belongs to the id-encoding alphabet.
pub fn is_id_byte(b: u8) -> bool {
    (ID_BYTE_BASE..ID_BYTE_BASE + 64).contains(&b)
}

/// Number of bytes `id_encode` produces for a value.
pub fn id_encoded_len(value: u64) -> usize {
    let mut len = 1;
    let mut rest = value >> ID_BITS_PER_BYTE;
    while rest != 0 {
        len += 1;
        rest >>= ID_BITS_PER_BYTE;
    }
    len
}

/// Encode a non-negative integer into 1-6 alphabet bytes, big-endian.
///
/// Returns the number of bytes written.
pub fn id_encode(value: u64, dst: &mut [u8]) -> Result<usize> {
    if value > MAX_ID_VALUE {
        return Err(TermdexError::ValueTooLarge(value));
    }
    let len = id_encoded_len(value);
    if dst.len() < len {
        return Err(TermdexError::BufferTooSmall {
            needed: len,
            available: dst.len(),
        });
    }
    for (i, slot) in dst.iter_mut().take(len).enumerate() {
        let shift = ID_BITS_PER_BYTE as usize * (len - 1 - i);
        *slot = ID_BYTE_BASE + ((value >> shift) & 0x3F) as u8;
    }
    Ok(len)
}

/// Exact inverse of [`id_encode`].
pub fn id_decode(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() || bytes.len() > ID_MAX_BYTES {
        return Err(TermdexError::InvalidEncoding(format!(
            "length {} outside 1-{}",
            bytes.len(),
            ID_MAX_BYTES
        )));
    }
    let mut value = 0u64;
    for &b in bytes {
        if !is_id_byte(b) {
            return Err(TermdexError::InvalidEncoding(format!(
                "byte {:#04x} outside id alphabet",
                b
            )));
        }
        value = (value << ID_BITS_PER_BYTE) | (b - ID_BYTE_BASE) as u64;
    }
    Ok(value)
}

/// Total on-disk length of a framed record for an already-escaped text.
pub fn framed_len(escaped_len: usize, id: u64) -> usize {
    2 * id_encoded_len(id) + escaped_len + 3
}

/// Frame an `(escaped text, id)` pair as `ID MARK_ID1 TEXT MARK_TXT ID MARK_ID2`.
///
/// Returns the number of bytes written. The text must already be escaped.
pub fn term_encode(dst: &mut [u8], escaped_text: &[u8], id: u64) -> Result<usize> {
    let needed = framed_len(escaped_text.len(), id);
    if dst.len() < needed {
        return Err(TermdexError::BufferTooSmall {
            needed,
            available: dst.len(),
        });
    }
    let mut pos = id_encode(id, dst)?;
    dst[pos] = MARK_ID1;
    pos += 1;
    dst[pos..pos + escaped_text.len()].copy_from_slice(escaped_text);
    pos += escaped_text.len();
    dst[pos] = MARK_TXT;
    pos += 1;
    pos += id_encode(id, &mut dst[pos..])?;
    dst[pos] = MARK_ID2;
    pos += 1;
    debug_assert_eq!(pos, needed);
    Ok(pos)
}

/// Escape every payload byte in the reserved low band.
///
/// Bytes in `[ESC, ESCAPE_LIMIT)` become the pair `(ESC, byte + ESCAPE_SHIFT)`;
/// the literal `ESC` byte maps to the reserved code `ESCAPE_SHIFT` itself.
pub fn escape(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    for &b in src {
        if b == ESC {
            out.push(ESC);
            out.push(ESCAPE_SHIFT);
        } else if b < ESCAPE_LIMIT {
            out.push(ESC);
            out.push(b + ESCAPE_SHIFT);
        } else {
            out.push(b);
        }
    }
    out
}

/// Exact inverse of [`escape`].
pub fn unescape(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut iter = src.iter();
    while let Some(&b) = iter.next() {
        if b != ESC {
            out.push(b);
            continue;
        }
        let shifted = *iter.next().ok_or_else(|| {
            TermdexError::InvalidEncoding("dangling escape at end of payload".to_string())
        })?;
        if shifted == ESCAPE_SHIFT {
            out.push(ESC);
        } else if shifted > ESCAPE_SHIFT && shifted < ESCAPE_LIMIT + ESCAPE_SHIFT {
            out.push(shifted - ESCAPE_SHIFT);
        } else {
            return Err(TermdexError::InvalidEncoding(format!(
                "invalid escape code {:#04x}",
                shifted
            )));
        }
    }
    Ok(out)
}

/// FNV-1a over a byte iterator.
///
/// Taking an iterator lets the compact segment hash a reversed span
/// back-to-front and land on the same value the write segment computed for
/// the forward bytes.
pub fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        for value in [0u64, 1, 63, 64, 4095, 4096, 1 << 18, MAX_ID_VALUE] {
            let mut buf = [0u8; ID_MAX_BYTES];
            let len = id_encode(value, &mut buf).unwrap();
            assert_eq!(len, id_encoded_len(value));
            assert_eq!(id_decode(&buf[..len]).unwrap(), value);
        }
    }

    #[test]
    fn test_id_bytes_printable_and_disjoint_from_markers() {
        let mut buf = [0u8; ID_MAX_BYTES];
        let len = id_encode(MAX_ID_VALUE, &mut buf).unwrap();
        for &b in &buf[..len] {
            assert!(is_id_byte(b));
            assert!(b >= 0x20 && b < 0x7F);
            assert!(b > MARK_ID2);
        }
    }

    #[test]
    fn test_id_encode_too_large() {
        let mut buf = [0u8; ID_MAX_BYTES];
        assert!(matches!(
            id_encode(MAX_ID_VALUE + 1, &mut buf),
            Err(TermdexError::ValueTooLarge(_))
        ));
    }

    #[test]
    fn test_id_decode_bad_length() {
        assert!(id_decode(&[]).is_err());
        assert!(id_decode(&[ID_BYTE_BASE; 7]).is_err());
    }

    #[test]
    fn test_id_decode_bad_byte() {
        assert!(id_decode(&[MARK_ID1]).is_err());
        assert!(id_decode(&[0x7B]).is_err());
    }

    #[test]
    fn test_escape_roundtrip() {
        let cases: &[&[u8]] = &[
            b"",
            b"plain text",
            &[0x00],
            &[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07],
            &[0x07, 0x08, 0x09, 0xFF],
            b"mixed\x00\x01payload\x03",
        ];
        for case in cases {
            let escaped = escape(case);
            assert!(!escaped.contains(&MARK_ID1));
            assert!(!escaped.contains(&MARK_TXT));
            assert!(!escaped.contains(&MARK_ID2));
            assert_eq!(unescape(&escaped).unwrap().as_slice(), *case);
        }
    }

    #[test]
    fn test_unescape_dangling() {
        assert!(unescape(&[b'a', ESC]).is_err());
        assert!(unescape(&[ESC, 0xFF]).is_err());
    }

    #[test]
    fn test_term_encode_frame() {
        let escaped = escape(b"hello");
        let mut buf = vec![0u8; framed_len(escaped.len(), 42)];
        let len = term_encode(&mut buf, &escaped, 42).unwrap();
        assert_eq!(len, buf.len());

        // ID MARK_ID1 TEXT MARK_TXT ID MARK_ID2
        let id_len = id_encoded_len(42);
        assert_eq!(id_decode(&buf[..id_len]).unwrap(), 42);
        assert_eq!(buf[id_len], MARK_ID1);
        assert_eq!(&buf[id_len + 1..id_len + 1 + escaped.len()], &escaped[..]);
        assert_eq!(buf[id_len + 1 + escaped.len()], MARK_TXT);
        assert_eq!(*buf.last().unwrap(), MARK_ID2);
    }

    #[test]
    fn test_term_encode_buffer_too_small() {
        let escaped = escape(b"hello");
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            term_encode(&mut buf, &escaped, 42),
            Err(TermdexError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_fnv1a_reverse_iteration_matches_forward() {
        let data = b"some term bytes";
        let forward = fnv1a(data.iter().copied());
        let reversed: Vec<u8> = data.iter().rev().copied().collect();
        let back = fnv1a(reversed.iter().rev().copied());
        assert_eq!(forward, back);
    }
}
