//! Password preparation for AES-256 revision 6 (RFC 4013 SASLprep subset).
//!
//! Covers the mapping and normalization steps plus the prohibited-output
//! check. Unassigned code points and the bidirectional rules are not
//! enforced.

use crate::error::{PdfError, Result};
use unicode_normalization::UnicodeNormalization;

/// RFC 3454 B.1: commonly mapped to nothing.
fn mapped_to_nothing(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{1806}'
            | '\u{180B}'..='\u{180D}'
            | '\u{200B}'..='\u{200D}'
            | '\u{2060}'
            | '\u{FE00}'..='\u{FE0F}'
            | '\u{FEFF}'
    )
}

/// RFC 3454 C.1.2: non-ASCII space characters.
fn non_ascii_space(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200B}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
    )
}

/// RFC 3454 C.2 to C.9, collapsed.
fn prohibited(c: char) -> bool {
    non_ascii_space(c)
        || matches!(
            c,
            '\u{0000}'..='\u{001F}'
                | '\u{007F}'..='\u{009F}'
                | '\u{0340}'
                | '\u{0341}'
                | '\u{06DD}'
                | '\u{070F}'
                | '\u{180E}'
                | '\u{200C}'..='\u{200F}'
                | '\u{2028}'..='\u{202E}'
                | '\u{2060}'..='\u{2063}'
                | '\u{206A}'..='\u{206F}'
                | '\u{2FF0}'..='\u{2FFB}'
                | '\u{E000}'..='\u{F8FF}'
                | '\u{FDD0}'..='\u{FDEF}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFF}'
                | '\u{1D173}'..='\u{1D17A}'
                | '\u{E0001}'
                | '\u{E0020}'..='\u{E007F}'
                | '\u{F0000}'..='\u{10FFFF}'
        )
        || (c as u32 & 0xFFFE) == 0xFFFE
}

/// Prepare a password string.
pub fn saslprep(data: &str) -> Result<String> {
    let mapped: String = data
        .chars()
        .filter(|&c| !mapped_to_nothing(c))
        .map(|c| if non_ascii_space(c) { ' ' } else { c })
        .collect();
    let normalized: String = mapped.nfkc().collect();
    match normalized.chars().find(|&c| prohibited(c)) {
        Some(c) => Err(PdfError::EncryptionError(format!(
            "prohibited character U+{:04X} in password",
            c as u32
        ))),
        None => Ok(normalized),
    }
}
