//! Official-account callback signature verification.
//!
//! The platform signs every callback by sorting the shared token, the
//! `timestamp` and the `nonce` query parameters lexicographically,
//! concatenating them and taking the SHA-1 digest. The digest arrives as
//! lowercase hex in the `signature` query parameter.

use sha1::{Digest, Sha1};

/// Computes the hex signature for a callback.
///
/// # Examples
///
/// ```
/// use bookkeeper_bot::wechat::{compute_signature, verify_signature};
///
/// let sig = compute_signature("token", "1700000000", "nonce");
/// assert_eq!(sig.len(), 40);
/// assert!(verify_signature("token", "1700000000", "nonce", &sig));
/// assert!(!verify_signature("other", "1700000000", "nonce", &sig));
/// ```
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    hex::encode(digest(token, timestamp, nonce))
}

/// Checks a callback signature.
///
/// Returns `false` for anything that is not well-formed hex of the right
/// length. Never panics.
pub fn verify_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    let Ok(given) = hex::decode(signature) else {
        return false;
    };
    let expected = digest(token, timestamp, nonce);
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn digest(token: &str, timestamp: &str, nonce: &str) -> [u8; 20] {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hasher.finalize().into()
}
