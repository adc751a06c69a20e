//! Flate (zlib/deflate) stream decoder.
//!
//! Streams through `flate2::Decompress` so a corrupt or truncated body still
//! yields everything inflated before the fault.

use super::{DecodeFailure, DecodeResult};
use flate2::{Decompress, FlushDecompress, Status};
use tracing::debug;

const CHUNK: usize = 32 * 1024;

/// Inflate `data`, falling back to raw deflate when the zlib header is bad.
pub fn flatedecode(data: &[u8], max_output: usize) -> DecodeResult {
    match inflate(data, true, max_output) {
        Err(failure) if failure.partial.is_empty() => {
            debug!(reason = %failure.reason, "zlib inflate failed, retrying as raw deflate");
            match inflate(data, false, max_output) {
                Ok(out) => Ok(out),
                Err(raw) if !raw.partial.is_empty() => Err(raw),
                Err(_) => Err(failure),
            }
        }
        other => other,
    }
}

fn inflate(data: &[u8], zlib_header: bool, max_output: usize) -> DecodeResult {
    let mut d = Decompress::new(zlib_header);
    let mut out: Vec<u8> = Vec::with_capacity(data.len().saturating_mul(2).min(max_output).max(64));

    loop {
        if out.capacity() - out.len() < CHUNK / 4 {
            out.reserve(CHUNK);
        }
        let consumed = d.total_in() as usize;
        let before_out = out.len();
        let status = d.decompress_vec(&data[consumed..], &mut out, FlushDecompress::None);

        if out.len() > max_output {
            out.truncate(max_output);
            return Err(DecodeFailure::new(out, "output exceeds size limit"));
        }

        match status {
            Ok(Status::StreamEnd) => return Ok(out),
            Ok(Status::Ok) | Ok(Status::BufError) => {
                let progressed = d.total_in() as usize != consumed || out.len() != before_out;
                if !progressed {
                    return Err(DecodeFailure::new(out, "unexpected end of deflate stream"));
                }
            }
            Err(e) => return Err(DecodeFailure::new(out, e.to_string())),
        }
    }
}
