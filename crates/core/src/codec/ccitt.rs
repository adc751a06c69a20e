//! CCITT Group 3 and Group 4 fax decoder (ITU-T T.4 / T.6).
//!
//! Scanlines are tracked as lists of changing elements: the column index of
//! every pixel whose colour differs from the pixel to its left, with the
//! imaginary pixel before column 0 being white. Even entries switch to black,
//! odd entries back to white.

use super::{DecodeFailure, DecodeResult};
use crate::model::objects::Dict;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// `/DecodeParms` for `CCITTFaxDecode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcittParams {
    /// <0 pure 2D (G4), 0 pure 1D (G3), >0 mixed with a tag bit per line.
    pub k: i64,
    pub columns: usize,
    /// 0 means unknown; decode until the data runs out.
    pub rows: usize,
    pub end_of_block: bool,
    pub black_is_1: bool,
    pub encoded_byte_align: bool,
    pub end_of_line: bool,
}

impl Default for CcittParams {
    fn default() -> Self {
        Self {
            k: 0,
            columns: 1728,
            rows: 0,
            end_of_block: true,
            black_is_1: false,
            encoded_byte_align: false,
            end_of_line: false,
        }
    }
}

impl CcittParams {
    pub fn from_dict(parms: &Dict) -> Self {
        let d = Self::default();
        let flag = |key: &str, default: bool| {
            parms
                .get(key)
                .and_then(|v| v.as_bool().ok())
                .unwrap_or(default)
        };
        Self {
            k: parms.get_int("K").unwrap_or(d.k),
            columns: parms
                .get_int("Columns")
                .filter(|&c| c > 0)
                .map_or(d.columns, |c| c as usize),
            rows: parms
                .get_int("Rows")
                .filter(|&r| r > 0)
                .map_or(d.rows, |r| r as usize),
            end_of_block: flag("EndOfBlock", d.end_of_block),
            black_is_1: flag("BlackIs1", d.black_is_1),
            encoded_byte_align: flag("EncodedByteAlign", d.encoded_byte_align),
            end_of_line: flag("EndOfLine", d.end_of_line),
        }
    }
}

#[rustfmt::skip]
const WHITE_CODES: &[(&str, u16)] = &[
    ("00110101", 0), ("000111", 1), ("0111", 2), ("1000", 3), ("1011", 4), ("1100", 5), ("1110", 6),
    ("1111", 7), ("10011", 8), ("10100", 9), ("00111", 10), ("01000", 11), ("001000", 12),
    ("000011", 13), ("110100", 14), ("110101", 15), ("101010", 16), ("101011", 17), ("0100111", 18),
    ("0001100", 19), ("0001000", 20), ("0010111", 21), ("0000011", 22), ("0000100", 23),
    ("0101000", 24), ("0101011", 25), ("0010011", 26), ("0100100", 27), ("0011000", 28),
    ("00000010", 29), ("00000011", 30), ("00011010", 31), ("00011011", 32), ("00010010", 33),
    ("00010011", 34), ("00010100", 35), ("00010101", 36), ("00010110", 37), ("00010111", 38),
    ("00101000", 39), ("00101001", 40), ("00101010", 41), ("00101011", 42), ("00101100", 43),
    ("00101101", 44), ("00000100", 45), ("00000101", 46), ("00001010", 47), ("00001011", 48),
    ("01010010", 49), ("01010011", 50), ("01010100", 51), ("01010101", 52), ("00100100", 53),
    ("00100101", 54), ("01011000", 55), ("01011001", 56), ("01011010", 57), ("01011011", 58),
    ("01001010", 59), ("01001011", 60), ("00110010", 61), ("00110011", 62), ("00110100", 63),
    ("11011", 64), ("10010", 128), ("010111", 192), ("0110111", 256), ("00110110", 320),
    ("00110111", 384), ("01100100", 448), ("01100101", 512), ("01101000", 576), ("01100111", 640),
    ("011001100", 704), ("011001101", 768), ("011010010", 832), ("011010011", 896),
    ("011010100", 960), ("011010101", 1024), ("011010110", 1088), ("011010111", 1152),
    ("011011000", 1216), ("011011001", 1280), ("011011010", 1344), ("011011011", 1408),
    ("010011000", 1472), ("010011001", 1536), ("010011010", 1600), ("011000", 1664),
    ("010011011", 1728), ("00000001000", 1792), ("00000001100", 1856), ("00000001101", 1920),
    ("000000010010", 1984), ("000000010011", 2048), ("000000010100", 2112), ("000000010101", 2176),
    ("000000010110", 2240), ("000000010111", 2304), ("000000011100", 2368), ("000000011101", 2432),
    ("000000011110", 2496), ("000000011111", 2560),
];

#[rustfmt::skip]
const BLACK_CODES: &[(&str, u16)] = &[
    ("0000110111", 0), ("010", 1), ("11", 2), ("10", 3), ("011", 4), ("0011", 5), ("0010", 6),
    ("00011", 7), ("000101", 8), ("000100", 9), ("0000100", 10), ("0000101", 11), ("0000111", 12),
    ("00000100", 13), ("00000111", 14), ("000011000", 15), ("0000010111", 16), ("0000011000", 17),
    ("0000001000", 18), ("00001100111", 19), ("00001101000", 20), ("00001101100", 21),
    ("00000110111", 22), ("00000101000", 23), ("00000010111", 24), ("00000011000", 25),
    ("000011001010", 26), ("000011001011", 27), ("000011001100", 28), ("000011001101", 29),
    ("000001101000", 30), ("000001101001", 31), ("000001101010", 32), ("000001101011", 33),
    ("000011010010", 34), ("000011010011", 35), ("000011010100", 36), ("000011010101", 37),
    ("000011010110", 38), ("000011010111", 39), ("000001101100", 40), ("000001101101", 41),
    ("000011011010", 42), ("000011011011", 43), ("000001010100", 44), ("000001010101", 45),
    ("000001010110", 46), ("000001010111", 47), ("000001100100", 48), ("000001100101", 49),
    ("000001010010", 50), ("000001010011", 51), ("000000100100", 52), ("000000110111", 53),
    ("000000111000", 54), ("000000100111", 55), ("000000101000", 56), ("000001011000", 57),
    ("000001011001", 58), ("000000101011", 59), ("000000101100", 60), ("000001011010", 61),
    ("000001100110", 62), ("000001100111", 63), ("0000001111", 64), ("000011001000", 128),
    ("000011001001", 192), ("000001011011", 256), ("000000110011", 320), ("000000110100", 384),
    ("000000110101", 448), ("0000001101100", 512), ("0000001101101", 576), ("0000001001010", 640),
    ("0000001001011", 704), ("0000001001100", 768), ("0000001001101", 832), ("0000001110010", 896),
    ("0000001110011", 960), ("0000001110100", 1024), ("0000001110101", 1088),
    ("0000001110110", 1152), ("0000001110111", 1216), ("0000001010010", 1280),
    ("0000001010011", 1344), ("0000001010100", 1408), ("0000001010101", 1472),
    ("0000001011010", 1536), ("0000001011011", 1600), ("0000001100100", 1664),
    ("0000001100101", 1728), ("00000001000", 1792), ("00000001100", 1856), ("00000001101", 1920),
    ("000000010010", 1984), ("000000010011", 2048), ("000000010100", 2112), ("000000010101", 2176),
    ("000000010110", 2240), ("000000010111", 2304), ("000000011100", 2368), ("000000011101", 2432),
    ("000000011110", 2496), ("000000011111", 2560),
];
type CodeMap = FxHashMap<(u8, u16), u16>;

fn build_codes(table: &[(&str, u16)]) -> CodeMap {
    table
        .iter()
        .map(|&(bits, run)| {
            let code = bits
                .bytes()
                .fold(0u16, |acc, b| (acc << 1) | u16::from(b == b'1'));
            ((bits.len() as u8, code), run)
        })
        .collect()
}

static WHITE: Lazy<CodeMap> = Lazy::new(|| build_codes(WHITE_CODES));
static BLACK: Lazy<CodeMap> = Lazy::new(|| build_codes(BLACK_CODES));

const MAX_CODE_LEN: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Pass,
    Horizontal,
    Vertical(isize),
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bit_at(&self, pos: usize) -> Option<u8> {
        let byte = *self.data.get(pos / 8)?;
        Some((byte >> (7 - pos % 8)) & 1)
    }

    fn read_bit(&mut self) -> Option<u8> {
        let bit = self.bit_at(self.pos)?;
        self.pos += 1;
        Some(bit)
    }

    fn align(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    /// True when nothing but zero fill is left.
    fn exhausted(&self) -> bool {
        let mut p = self.pos;
        while let Some(bit) = self.bit_at(p) {
            if bit != 0 {
                return false;
            }
            p += 1;
        }
        true
    }

    /// Consume an EOL code (eleven or more zeros then a one) if one is next.
    fn skip_eol(&mut self) -> bool {
        let mut p = self.pos;
        let mut zeros = 0;
        while self.bit_at(p) == Some(0) {
            zeros += 1;
            p += 1;
        }
        if zeros >= 11 && self.bit_at(p) == Some(1) {
            self.pos = p + 1;
            true
        } else {
            false
        }
    }

    fn read_mode(&mut self) -> Result<Mode, String> {
        let mut zeros = 0;
        loop {
            match self.read_bit() {
                Some(1) => break,
                Some(_) => zeros += 1,
                None => return Err("data ended inside a mode code".into()),
            }
            if zeros >= 7 {
                return Err("unexpected EOL inside a line".into());
            }
        }
        let next = |r: &mut Self| {
            r.read_bit()
                .ok_or_else(|| "data ended inside a mode code".to_string())
        };
        Ok(match zeros {
            0 => Mode::Vertical(0),
            1 => {
                if next(self)? == 1 {
                    Mode::Vertical(1)
                } else {
                    Mode::Vertical(-1)
                }
            }
            2 => Mode::Horizontal,
            3 => Mode::Pass,
            4 => {
                if next(self)? == 1 {
                    Mode::Vertical(2)
                } else {
                    Mode::Vertical(-2)
                }
            }
            5 => {
                if next(self)? == 1 {
                    Mode::Vertical(3)
                } else {
                    Mode::Vertical(-3)
                }
            }
            _ => return Err("uncompressed mode is not supported".into()),
        })
    }

    fn read_code(&mut self, codes: &CodeMap) -> Result<u16, String> {
        let mut code = 0u16;
        for len in 1..=MAX_CODE_LEN {
            let bit = self
                .read_bit()
                .ok_or_else(|| "data ended inside a run code".to_string())?;
            code = (code << 1) | u16::from(bit);
            if let Some(&run) = codes.get(&(len, code)) {
                return Ok(run);
            }
        }
        Err("invalid run-length code".into())
    }

    /// A full run: make-up codes followed by one terminating code.
    fn read_run(&mut self, white: bool) -> Result<usize, String> {
        let codes: &CodeMap = if white { &WHITE } else { &BLACK };
        let mut total = 0usize;
        loop {
            let run = self.read_code(codes)?;
            total += run as usize;
            if run < 64 {
                return Ok(total);
            }
        }
    }
}

/// First changing element on `reference` right of `a0` whose colour is the
/// opposite of `white`, and the one after it.
fn find_b1_b2(reference: &[usize], a0: isize, white: bool, columns: usize) -> (usize, usize) {
    let parity = if white { 0 } else { 1 };
    let found = reference
        .iter()
        .enumerate()
        .find(|&(i, &x)| x as isize > a0 && i % 2 == parity);
    match found {
        Some((i, &b1)) => (b1, reference.get(i + 1).copied().unwrap_or(columns)),
        None => (columns, columns),
    }
}

fn decode_2d(
    reader: &mut BitReader<'_>,
    reference: &[usize],
    columns: usize,
) -> Result<Vec<usize>, String> {
    let mut changes = Vec::new();
    let mut a0: isize = -1;
    let mut white = true;
    let width = columns as isize;

    while a0 < width {
        let (b1, b2) = find_b1_b2(reference, a0, white, columns);
        match reader.read_mode()? {
            Mode::Pass => a0 = b2 as isize,
            Mode::Horizontal => {
                let start = a0.max(0) as usize;
                let a1 = start + reader.read_run(white)?;
                let a2 = a1 + reader.read_run(!white)?;
                changes.push(a1);
                changes.push(a2);
                a0 = a2 as isize;
            }
            Mode::Vertical(dx) => {
                let a1 = (b1 as isize + dx).clamp(a0.max(0), width);
                changes.push(a1 as usize);
                a0 = a1;
                white = !white;
            }
        }
    }
    Ok(normalize(changes, columns))
}

fn decode_1d(reader: &mut BitReader<'_>, columns: usize) -> Result<Vec<usize>, String> {
    let mut changes = Vec::new();
    let mut pos = 0usize;
    let mut white = true;
    while pos < columns {
        pos += reader.read_run(white)?;
        changes.push(pos);
        white = !white;
    }
    Ok(normalize(changes, columns))
}

/// Drop zero-length runs and anything at or past the right edge.
fn normalize(changes: Vec<usize>, columns: usize) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(changes.len());
    for x in changes.into_iter().map(|x| x.min(columns)) {
        if out.last() == Some(&x) {
            out.pop();
        } else {
            out.push(x);
        }
    }
    out.retain(|&x| x < columns);
    out
}

fn pack_row(changes: &[usize], params: &CcittParams, out: &mut Vec<u8>) {
    let columns = params.columns;
    let start = out.len();
    out.resize(start + columns.div_ceil(8), 0);
    let row = &mut out[start..];

    let mut black = false;
    let mut edges = changes.iter().copied().chain(std::iter::once(columns));
    let mut next = edges.next().unwrap_or(columns);
    for x in 0..columns {
        while x >= next {
            black = !black;
            next = edges.next().unwrap_or(usize::MAX);
        }
        // White is 1 unless BlackIs1 flips the sense.
        if black == params.black_is_1 {
            row[x / 8] |= 0x80 >> (x % 8);
        }
    }
}

/// Widest row accepted from `/Columns`.
const MAX_COLUMNS: usize = 1 << 20;

/// Decode CCITT fax data into packed rows, one bit per pixel.
///
/// On a coding error the rows completed so far are returned with the failure.
/// A row that would take the output past `max_output` is not decoded.
pub fn ccittfaxdecode(data: &[u8], params: &CcittParams, max_output: usize) -> DecodeResult {
    let columns = params.columns;
    if columns > MAX_COLUMNS {
        return Err(DecodeFailure::new(
            Vec::new(),
            format!("/Columns {} out of range", columns),
        ));
    }
    let row_len = columns.div_ceil(8);
    let mut reader = BitReader::new(data);
    let mut reference: Vec<usize> = Vec::new();
    let mut out = Vec::new();
    let mut rows = 0usize;

    loop {
        if params.rows > 0 && rows >= params.rows {
            break;
        }
        if params.encoded_byte_align {
            reader.align();
        }

        let mut eols = 0;
        let mut tag = None;
        while reader.skip_eol() {
            eols += 1;
            if params.k > 0 {
                tag = reader.read_bit();
            }
        }
        // EOFB (G4) or RTC (G3).
        if eols >= 2 || reader.exhausted() {
            break;
        }

        let two_d = match params.k {
            k if k < 0 => true,
            0 => false,
            _ => match tag {
                Some(t) => t == 0,
                None => reader.read_bit() == Some(0),
            },
        };

        if out.len() + row_len > max_output {
            return Err(DecodeFailure::new(out, "output exceeds size limit"));
        }

        let line = if two_d {
            decode_2d(&mut reader, &reference, columns)
        } else {
            decode_1d(&mut reader, columns)
        };
        match line {
            Ok(changes) => {
                pack_row(&changes, params, &mut out);
                reference = changes;
                rows += 1;
            }
            Err(reason) => return Err(DecodeFailure::new(out, reason)),
        }
    }
    Ok(out)
}
