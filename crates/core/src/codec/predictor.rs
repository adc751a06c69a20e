//! PNG and TIFF predictor un-filtering for Flate and LZW output.

use super::{DecodeFailure, DecodeResult};
use crate::model::objects::Dict;
use tracing::warn;

/// `/DecodeParms` entries that drive prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    pub fn from_dict(parms: &Dict) -> Self {
        let d = Self::default();
        let positive = |key: &str, default: usize| {
            parms
                .get_int(key)
                .filter(|&v| v > 0)
                .map_or(default, |v| v as usize)
        };
        Self {
            predictor: parms.get_int("Predictor").unwrap_or(d.predictor),
            colors: positive("Colors", d.colors),
            bits_per_component: positive("BitsPerComponent", d.bits_per_component),
            columns: positive("Columns", d.columns),
        }
    }

    /// Bytes per complete pixel, at least one.
    fn bpp(&self) -> usize {
        self.colors
            .saturating_mul(self.bits_per_component)
            .div_ceil(8)
            .max(1)
    }

    /// `None` when `/Columns`, `/Colors` and `/BitsPerComponent` overflow.
    fn row_bytes(&self) -> Option<usize> {
        let bits = self
            .columns
            .checked_mul(self.colors)?
            .checked_mul(self.bits_per_component)?;
        Some(bits.div_ceil(8))
    }
}

/// Reverse the predictor described by `params`.
pub fn unpredict(data: Vec<u8>, params: &PredictorParams) -> DecodeResult {
    if params.predictor <= 1 {
        return Ok(data);
    }
    let Some(row_bytes) = params.row_bytes() else {
        return Err(DecodeFailure::new(data, "predictor row size overflows"));
    };
    // A row longer than the data is one short row; never allocate past it.
    let row_bytes = row_bytes.min(data.len());
    match params.predictor {
        2 => Ok(tiff_unpredict(data, row_bytes, params)),
        p @ 3..=9 => {
            warn!(predictor = p, "unknown predictor, data left as is");
            Ok(data)
        }
        _ => png_unpredict(&data, row_bytes, params.bpp()),
    }
}

fn png_unpredict(data: &[u8], row_bytes: usize, bpp: usize) -> DecodeResult {
    if row_bytes == 0 {
        return Ok(Vec::new());
    }

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];
    let mut current_row = vec![0u8; row_bytes];

    for chunk in data.chunks(row_bytes + 1) {
        let filter_type = chunk[0];
        let row_data = &chunk[1..];
        // A short final row is decoded as far as it goes.
        let n = row_data.len();

        match filter_type {
            0 => current_row[..n].copy_from_slice(row_data),
            1 => {
                for i in 0..n {
                    let left = if i >= bpp { current_row[i - bpp] } else { 0 };
                    current_row[i] = row_data[i].wrapping_add(left);
                }
            }
            2 => {
                for i in 0..n {
                    current_row[i] = row_data[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                for i in 0..n {
                    let left = if i >= bpp { current_row[i - bpp] as u16 } else { 0 };
                    let above = prev_row[i] as u16;
                    current_row[i] = row_data[i].wrapping_add(((left + above) / 2) as u8);
                }
            }
            4 => {
                for i in 0..n {
                    let left = if i >= bpp { current_row[i - bpp] } else { 0 };
                    let above = prev_row[i];
                    let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                    current_row[i] = row_data[i].wrapping_add(paeth(left, above, upper_left));
                }
            }
            other => {
                return Err(DecodeFailure::new(
                    result,
                    format!("invalid PNG row filter {}", other),
                ));
            }
        }

        result.extend_from_slice(&current_row[..n]);
        std::mem::swap(&mut prev_row, &mut current_row);
    }

    Ok(result)
}

const fn paeth(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}

/// TIFF predictor 2: each sample is stored as the difference from the sample
/// of the same component one pixel to the left.
fn tiff_unpredict(mut data: Vec<u8>, row_bytes: usize, params: &PredictorParams) -> Vec<u8> {
    if row_bytes == 0 {
        return data;
    }
    let colors = params.colors;
    let bpc = params.bits_per_component;

    for row in data.chunks_mut(row_bytes) {
        match bpc {
            8 => {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
            16 => {
                let stride = colors.saturating_mul(2);
                let mut i = stride;
                while i + 1 < row.len() {
                    let left = u16::from_be_bytes([row[i - stride], row[i - stride + 1]]);
                    let cur = u16::from_be_bytes([row[i], row[i + 1]]);
                    let [hi, lo] = cur.wrapping_add(left).to_be_bytes();
                    row[i] = hi;
                    row[i + 1] = lo;
                    i += 2;
                }
            }
            1 | 2 | 4 => {
                let mask = (1u16 << bpc) - 1;
                let samples = (row.len() * 8 / bpc).min(params.columns.saturating_mul(colors));
                let mut values: Vec<u16> = (0..samples)
                    .map(|s| read_bits(row, s * bpc, bpc))
                    .collect();
                for s in colors..samples {
                    values[s] = (values[s] + values[s - colors]) & mask;
                }
                for (s, v) in values.into_iter().enumerate() {
                    write_bits(row, s * bpc, bpc, v);
                }
            }
            other => {
                warn!(bits = other, "TIFF predictor with unsupported bit depth");
                break;
            }
        }
    }
    data
}

fn read_bits(row: &[u8], bit: usize, width: usize) -> u16 {
    let Some(&byte) = row.get(bit / 8) else {
        return 0;
    };
    let shift = 8 - width - bit % 8;
    ((byte >> shift) as u16) & ((1 << width) - 1)
}

fn write_bits(row: &mut [u8], bit: usize, width: usize, value: u16) {
    let Some(byte) = row.get_mut(bit / 8) else {
        return;
    };
    let shift = 8 - width - bit % 8;
    let mask = (((1u16 << width) - 1) as u8) << shift;
    *byte = (*byte & !mask) | (((value as u8) << shift) & mask);
}
