//! Storage-safe path segments.

use data_encoding::BASE32_NOPAD;

/// Encode raw bytes as a path segment: base32, lowercase, no `=` padding.
///
/// The output alphabet is `a-z2-7`, which is safe on every backend we target.
pub fn encode(bytes: &[u8]) -> String {
    let mut encoded = BASE32_NOPAD.encode(bytes);
    encoded.make_ascii_lowercase();
    encoded
}

/// Decode a segment produced by [`encode`]. Returns `None` for anything else.
pub fn decode(segment: &str) -> Option<Vec<u8>> {
    if segment.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    BASE32_NOPAD
        .decode(segment.to_ascii_uppercase().as_bytes())
        .ok()
}
