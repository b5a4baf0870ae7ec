//! L24 sample conversion
//!
//! On the wire L24 is three big-endian bytes per sample (RFC 3190). Inside the
//! relay samples live sign-extended in `i32`.

use bytes::{BufMut, BytesMut};

use crate::constants::L24_BYTES;

pub const L24_MAX: i32 = (1 << 23) - 1;
pub const L24_MIN: i32 = -(1 << 23);

/// Decode big-endian L24 into sign-extended samples. Trailing bytes that do
/// not form a whole sample are ignored.
pub fn decode_l24(payload: &[u8]) -> Vec<i32> {
    payload
        .chunks_exact(L24_BYTES)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8)
        .collect()
}

/// Append samples as big-endian L24, clamping to the 24-bit range
pub fn encode_l24(samples: &[i32], out: &mut BytesMut) {
    out.reserve(samples.len() * L24_BYTES);
    for &s in samples {
        let s = s.clamp(L24_MIN, L24_MAX);
        out.put_slice(&s.to_be_bytes()[1..]);
    }
}

/// Scale a 24-bit sample into `[-1.0, 1.0)`
#[inline]
pub fn l24_to_f32(sample: i32) -> f32 {
    sample as f32 / (1 << 23) as f32
}
