//! Stream filter chain and the ciphers used by the security handler.
//!
//! Every filter is a pure function from input bytes (plus its `/DecodeParms`)
//! to output bytes. [`Filter`] is the closed registry of names this engine
//! knows; [`decode_stream_data`] runs a stream's `/Filter` list left to right.

pub mod aes;
pub mod arcfour;
pub mod ascii85;
pub mod ccitt;
pub mod flate;
pub mod lzw;
pub mod predictor;
pub mod runlength;
pub mod signature;

pub use aes::{aes_cbc_decrypt, aes_cbc_encrypt, unpad_aes};
pub use arcfour::Arcfour;
pub use ascii85::{ascii85decode, asciihexdecode};
pub use ccitt::{CcittParams, ccittfaxdecode};
pub use flate::flatedecode;
pub use lzw::lzwdecode;
pub use predictor::{PredictorParams, unpredict};
pub use runlength::rldecode;

use crate::error::Diagnostic;
use crate::model::name::Name;
use crate::model::objects::{Dict, PDFObject};
use bytes::Bytes;
use tracing::{debug, warn};

/// Output of a filter that gave up part way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    /// Everything decoded before the fault.
    pub partial: Vec<u8>,
    pub reason: String,
}

impl DecodeFailure {
    pub fn new(partial: Vec<u8>, reason: impl Into<String>) -> Self {
        Self {
            partial,
            reason: reason.into(),
        }
    }
}

pub type DecodeResult = std::result::Result<Vec<u8>, DecodeFailure>;

/// Result of running a stream's filter chain.
///
/// `data` is always usable: the full output, the prefix decoded before a
/// failure, or the still-encoded bytes when a filter is unsupported.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStream {
    pub data: Bytes,
    pub diagnostic: Option<Diagnostic>,
}

impl DecodedStream {
    pub const fn complete(data: Bytes) -> Self {
        Self {
            data,
            diagnostic: None,
        }
    }

    pub const fn is_complete(&self) -> bool {
        self.diagnostic.is_none()
    }
}

/// Bounds applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest output any single filter may produce.
    pub max_output: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_output: 256 * 1024 * 1024,
        }
    }
}

/// Stream filters known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    AsciiHex,
    Ascii85,
    Lzw,
    Flate,
    RunLength,
    CcittFax,
    Dct,
    Jpx,
    Jbig2,
    Crypt,
}

impl Filter {
    /// Look up a filter by its full name or inline-image abbreviation.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ASCIIHexDecode" | "AHx" => Self::AsciiHex,
            "ASCII85Decode" | "A85" => Self::Ascii85,
            "LZWDecode" | "LZW" => Self::Lzw,
            "FlateDecode" | "Fl" => Self::Flate,
            "RunLengthDecode" | "RL" => Self::RunLength,
            "CCITTFaxDecode" | "CCF" => Self::CcittFax,
            "DCTDecode" | "DCT" => Self::Dct,
            "JPXDecode" => Self::Jpx,
            "JBIG2Decode" => Self::Jbig2,
            "Crypt" => Self::Crypt,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::AsciiHex => "ASCIIHexDecode",
            Self::Ascii85 => "ASCII85Decode",
            Self::Lzw => "LZWDecode",
            Self::Flate => "FlateDecode",
            Self::RunLength => "RunLengthDecode",
            Self::CcittFax => "CCITTFaxDecode",
            Self::Dct => "DCTDecode",
            Self::Jpx => "JPXDecode",
            Self::Jbig2 => "JBIG2Decode",
            Self::Crypt => "Crypt",
        }
    }

    fn apply(self, data: Vec<u8>, parms: Option<&Dict>, limits: &DecodeLimits) -> Step {
        let empty = Dict::new();
        let parms = parms.unwrap_or(&empty);
        let result = match self {
            Self::AsciiHex => asciihexdecode(&data),
            Self::Ascii85 => ascii85decode(&data),
            Self::RunLength => rldecode(&data),
            Self::Flate => flatedecode(&data, limits.max_output)
                .and_then(|out| unpredict(out, &PredictorParams::from_dict(parms))),
            Self::Lzw => {
                let early_change = parms.get_int("EarlyChange").unwrap_or(1);
                lzwdecode(&data, early_change, limits.max_output)
                    .and_then(|out| unpredict(out, &PredictorParams::from_dict(parms)))
            }
            Self::CcittFax => {
                ccittfaxdecode(&data, &CcittParams::from_dict(parms), limits.max_output)
            }
            Self::Dct | Self::Jpx => {
                let ok = if self == Self::Dct {
                    signature::is_jpeg(&data)
                } else {
                    signature::is_jpx(&data)
                };
                let diagnostic = (!ok).then(|| Diagnostic::DecodeFailed {
                    filter: self.name(),
                    reason: "payload does not carry the expected signature".into(),
                });
                return Step::Stop(data, diagnostic);
            }
            Self::Jbig2 => {
                return Step::Stop(data, Some(Diagnostic::UnsupportedFilter(self.name().into())));
            }
            Self::Crypt => {
                let crypt_name = parms.get_name("Name");
                return match crypt_name {
                    None => Step::Continue(data),
                    Some(n) if n == "Identity" => Step::Continue(data),
                    Some(n) => Step::Stop(
                        data,
                        Some(Diagnostic::UnsupportedFilter(format!("Crypt/{}", n.as_str()))),
                    ),
                };
            }
        };
        match result {
            Ok(out) => Step::Continue(out),
            Err(failure) => Step::Failed(failure),
        }
    }
}

enum Step {
    Continue(Vec<u8>),
    Failed(DecodeFailure),
    Stop(Vec<u8>, Option<Diagnostic>),
}

/// One `/Filter` entry with its matching `/DecodeParms`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub name: Name,
    pub filter: Option<Filter>,
    pub parms: Option<Dict>,
}

impl FilterSpec {
    /// Read the filter list of a stream dictionary.
    ///
    /// Accepts a single name or an array for `/Filter` (or `/F`), and a
    /// dictionary, an aligned array, or `null` entries for `/DecodeParms`
    /// (or `/DP`). Non-name filter entries are ignored.
    pub fn from_dict(dict: &Dict) -> Vec<Self> {
        let names: Vec<Name> = match dict.get_any(&["Filter", "F"]) {
            Some(PDFObject::Name(n)) => vec![*n],
            Some(PDFObject::Array(arr)) => arr.iter().filter_map(|o| o.as_name().ok()).collect(),
            _ => Vec::new(),
        };
        let parms: Vec<Option<Dict>> = match dict.get_any(&["DecodeParms", "DP"]) {
            Some(PDFObject::Dict(d)) => vec![Some(d.clone()); names.len()],
            Some(PDFObject::Array(arr)) => arr.iter().map(|o| o.as_dict().ok().cloned()).collect(),
            _ => Vec::new(),
        };
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Self {
                name,
                filter: Filter::from_name(name.as_str()),
                parms: parms.get(i).cloned().flatten(),
            })
            .collect()
    }
}

/// Run the filter chain described by `dict` over `raw`.
///
/// A failing filter hands its decoded prefix to the next one and the first
/// diagnostic is kept. An unsupported or pass-through filter ends the chain
/// with the data as it stands at that point.
pub fn decode_stream_data(raw: Bytes, dict: &Dict, limits: &DecodeLimits) -> DecodedStream {
    let specs = FilterSpec::from_dict(dict);
    if specs.is_empty() {
        return DecodedStream::complete(raw);
    }

    let mut data = raw.to_vec();
    let mut diagnostic: Option<Diagnostic> = None;

    for spec in &specs {
        let Some(filter) = spec.filter else {
            warn!(filter = spec.name.as_str(), "unsupported filter, data left encoded");
            diagnostic.get_or_insert(Diagnostic::UnsupportedFilter(spec.name.as_str().into()));
            break;
        };
        debug!(filter = filter.name(), input = data.len(), "applying filter");
        match filter.apply(data, spec.parms.as_ref(), limits) {
            Step::Continue(mut out) => {
                if out.len() > limits.max_output {
                    warn!(filter = filter.name(), "output exceeds size limit, truncated");
                    out.truncate(limits.max_output);
                    diagnostic.get_or_insert(Diagnostic::DecodeFailed {
                        filter: filter.name(),
                        reason: "output exceeds size limit".into(),
                    });
                }
                data = out;
            }
            Step::Failed(failure) => {
                warn!(
                    filter = filter.name(),
                    reason = %failure.reason,
                    kept = failure.partial.len(),
                    "filter failed, keeping decoded prefix"
                );
                diagnostic.get_or_insert(Diagnostic::DecodeFailed {
                    filter: filter.name(),
                    reason: failure.reason,
                });
                data = failure.partial;
            }
            Step::Stop(out, diag) => {
                if let Some(d) = diag {
                    warn!(filter = filter.name(), "{}", d);
                    diagnostic.get_or_insert(d);
                }
                data = out;
                break;
            }
        }
    }

    DecodedStream {
        data: Bytes::from(data),
        diagnostic,
    }
}
