/// Refresh token digests
///
/// Sessions store only the SHA-256 hex digest of their current refresh token.

use sha2::{Digest, Sha256};

/// Hash a refresh token using SHA-256 (lowercase hex)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check `token` against a stored digest without short-circuiting on the
/// first differing byte. Empty inputs never match.
pub fn token_matches(stored_hash: &str, token: &str) -> bool {
    if stored_hash.is_empty() || token.is_empty() {
        return false;
    }
    constant_time_eq(stored_hash.as_bytes(), hash_token(token).as_bytes())
}

/// Compare two stored digests in constant time.
pub fn digests_match(a: &str, b: &str) -> bool {
    !a.is_empty() && constant_time_eq(a.as_bytes(), b.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
