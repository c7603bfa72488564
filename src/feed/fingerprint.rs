use sha2::{Digest, Sha256};

/// Computes the lowercase hex SHA-256 digest of a raw feed document.
///
/// Used purely as a cheap equality test between two fetches of the same
/// term, so it is taken over the exact bytes received.
pub fn digest(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}
