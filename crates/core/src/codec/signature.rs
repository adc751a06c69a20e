//! Signature checks for image codecs whose pixel decode happens downstream.

const JP2_BOX: &[u8] = &[0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' '];
const J2K_SOC: &[u8] = &[0xFF, 0x4F];

/// Baseline or progressive JPEG: starts with an SOI marker.
pub fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
}

/// JPEG 2000 as a JP2 file or a raw codestream.
pub fn is_jpx(data: &[u8]) -> bool {
    data.starts_with(JP2_BOX) || data.starts_with(J2K_SOC)
}
