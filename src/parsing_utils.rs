//! Small byte-level helpers shared across the crate.

use crate::errors::ParseError;
use encoding_rs::WINDOWS_1252;

/// Reads a protobuf varint from the front of `data`, returning the value
/// and the number of bytes consumed. More than five bytes means the frame
/// is corrupt; running out of bytes mid-number means the stream was cut.
pub(crate) fn read_var_u32(data: &[u8]) -> Result<(u32, usize), ParseError> {
    let mut result: u32 = 0;
    let mut count = 0;
    loop {
        if count == 5 {
            return Err(ParseError::Corrupted("oversized varint".to_string()));
        }
        let Some(&b) = data.get(count) else {
            return Err(ParseError::UnexpectedEof);
        };
        result |= ((b & 0x7F) as u32) << (7 * count);
        count += 1;
        if b & 0x80 == 0 {
            return Ok((result, count));
        }
    }
}

/// Engine strings are not guaranteed UTF-8; decode them the way the
/// client does, as Windows-1252.
pub(crate) fn decode_windows1252(bytes: &[u8]) -> String {
    WINDOWS_1252.decode(bytes).0.into_owned()
}

/// `ceil(log2(n))`: the bit width the wire uses for values in `[0, n)`.
pub(crate) fn log2_ceil(n: u32) -> usize {
    if n <= 1 {
        0
    } else {
        (32 - (n - 1).leading_zeros()) as usize
    }
}
