//! ASCII85 and ASCIIHex stream decoders.

use super::{DecodeFailure, DecodeResult};

/// Decode ASCII85-encoded data (PDF variant).
/// Handles: z-encoding, <~ ~> markers, whitespace, missing EOD.
pub fn ascii85decode(data: &[u8]) -> DecodeResult {
    let data = data.strip_prefix(b"<~").unwrap_or(data);
    let mut out = Vec::with_capacity(data.len() / 5 * 4 + 4);
    let mut group = [0u8; 5];
    let mut n = 0usize;

    for &byte in data {
        match byte {
            b'~' => break,
            b' ' | b'\t' | b'\n' | b'\r' | b'\x00' | b'\x0c' => continue,
            b'z' if n == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'z' => {
                return Err(DecodeFailure::new(out, "'z' inside a group"));
            }
            b'!'..=b'u' => {
                group[n] = byte - b'!';
                n += 1;
                if n == 5 {
                    match group_value(&group) {
                        Some(v) => out.extend_from_slice(&v.to_be_bytes()),
                        None => return Err(DecodeFailure::new(out, "group overflows 32 bits")),
                    }
                    n = 0;
                }
            }
            _ => {
                return Err(DecodeFailure::new(
                    out,
                    format!("invalid character 0x{:02x}", byte),
                ));
            }
        }
    }

    // Final partial group: pad with 'u' and keep n - 1 bytes.
    match n {
        0 => {}
        1 => return Err(DecodeFailure::new(out, "dangling single character")),
        _ => {
            for slot in group.iter_mut().skip(n) {
                *slot = 84;
            }
            match group_value(&group) {
                Some(v) => out.extend_from_slice(&v.to_be_bytes()[..n - 1]),
                None => return Err(DecodeFailure::new(out, "group overflows 32 bits")),
            }
        }
    }
    Ok(out)
}

fn group_value(group: &[u8; 5]) -> Option<u32> {
    let v = group.iter().fold(0u64, |acc, &d| acc * 85 + u64::from(d));
    u32::try_from(v).ok()
}

/// Decode ASCIIHex-encoded data.
///
/// Whitespace is skipped, `>` ends the data, and an odd final digit is
/// completed with a zero nibble.
pub fn asciihexdecode(data: &[u8]) -> DecodeResult {
    let mut out = Vec::with_capacity(data.len() / 2 + 1);
    let mut pending: Option<u8> = None;

    for &byte in data {
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b'>' => break,
            b' ' | b'\t' | b'\n' | b'\r' | b'\x00' | b'\x0c' => continue,
            _ => {
                if let Some(high) = pending {
                    out.push(high << 4);
                }
                return Err(DecodeFailure::new(
                    out,
                    format!("invalid hex digit 0x{:02x}", byte),
                ));
            }
        };

        match pending.take() {
            Some(high) => out.push((high << 4) | nibble),
            None => pending = Some(nibble),
        }
    }

    if let Some(high) = pending {
        out.push(high << 4);
    }
    Ok(out)
}
