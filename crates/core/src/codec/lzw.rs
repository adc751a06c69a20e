//! LZW stream decoder using weezl crate.

use super::{DecodeFailure, DecodeResult};
use weezl::{BitOrder, LzwStatus, decode::Decoder};

const CHUNK: usize = 16 * 1024;

/// Decode LZW-encoded data (MSB first, 8-bit alphabet).
///
/// `early_change` follows `/EarlyChange`: 1 (the default) widens codes one
/// entry early, which is what weezl calls the TIFF size switch. Output stops
/// at `max_output` bytes. Data that ends without an EOD code is accepted.
pub fn lzwdecode(data: &[u8], early_change: i64, max_output: usize) -> DecodeResult {
    let mut decoder = if early_change != 0 {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };

    let mut output = Vec::new();
    let mut buf = vec![0u8; CHUNK];
    let mut input = data;
    loop {
        let res = decoder.decode_bytes(input, &mut buf);
        input = &input[res.consumed_in..];
        output.extend_from_slice(&buf[..res.consumed_out]);
        if output.len() > max_output {
            output.truncate(max_output);
            return Err(DecodeFailure::new(output, "output exceeds size limit"));
        }
        match res.status {
            Ok(LzwStatus::Done) | Ok(LzwStatus::NoProgress) => break,
            Ok(LzwStatus::Ok) => {}
            Err(e) => return Err(DecodeFailure::new(output, e.to_string())),
        }
    }
    Ok(output)
}
