//! RunLength stream decoder.

use super::{DecodeFailure, DecodeResult};

/// Decode RunLength-encoded data.
///
/// Format:
/// - Length byte 0-127: Copy next (length + 1) bytes literally
/// - Length byte 128: End of data (EOD marker)
/// - Length byte 129-255: Repeat next byte (257 - length) times
///
/// A missing EOD is accepted. A run cut short by the end of input keeps the
/// bytes that are present and reports the truncation.
pub fn rldecode(data: &[u8]) -> DecodeResult {
    let mut result = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;

        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let end = i + count;
                if end > data.len() {
                    result.extend_from_slice(&data[i..]);
                    return Err(DecodeFailure::new(result, "literal run truncated"));
                }
                result.extend_from_slice(&data[i..end]);
                i = end;
            }
            129..=255 => {
                let Some(&byte) = data.get(i) else {
                    return Err(DecodeFailure::new(result, "repeat run missing its byte"));
                };
                i += 1;
                result.extend(std::iter::repeat_n(byte, 257 - length as usize));
            }
        }
    }

    Ok(result)
}
