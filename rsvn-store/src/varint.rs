//! Variable-length unsigned integer codec
//!
//! The 7-bit-continuation format shared by the svndiff delta codec: the
//! high bit of each byte is a continuation flag, the low seven bits are
//! data, most-significant group first. Examples:
//!
//! ```text
//!     1 encodes as [0 0000001]
//!    33 encodes as [0 0100001]
//!   129 encodes as [1 0000001] [0 0000001]
//!  2000 encodes as [1 0001111] [0 1010000]
//! ```

use crate::error::{Error, Result};

/// Append the minimal encoding of `val` to `out`. Never emits leading
/// all-zero groups; total function for any u64.
pub fn encode(val: u64, out: &mut Vec<u8>) {
    // Figure out how many bytes we'll need.
    let mut n = 1;
    let mut v = val >> 7;
    while v > 0 {
        v >>= 7;
        n += 1;
    }

    for i in (0..n).rev() {
        let cont = if i > 0 { 0x80 } else { 0x00 };
        out.push((((val >> (i * 7)) & 0x7f) as u8) | cont);
    }
}

/// Convenience wrapper returning the encoding as a fresh buffer.
pub fn encode_to_vec(val: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    encode(val, &mut out);
    out
}

/// Decode one integer from the front of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` on success and `Ok(None)`
/// if the buffer ended before a terminating (flag-clear) byte was seen —
/// a recoverable signal meaning the caller should buffer more input.
/// Fails with `MalformedData` if the accumulator would overflow u64.
pub fn decode(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut val: u64 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if val > (u64::MAX >> 7) {
            return Err(Error::malformed("integer overflow in 7-bit encoding"));
        }
        val = (val << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            return Ok(Some((val, i + 1)));
        }
    }
    Ok(None)
}
