//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Content-hash key identifying a request by resource prefix and size
/// constraints.
///
/// Derivation is deterministic: equal inputs always yield equal keys, and
/// varying either dimension changes the key. Keys are always 64 lowercase
/// hex characters, so leading zero bytes in the digest never shorten them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a resource prefix and size constraints.
    ///
    /// A constraint of `(0, 0)` means "no resize" and is hashed like any
    /// other pair, so constrained and unconstrained requests for the same
    /// resource occupy distinct cache entries.
    #[must_use]
    pub fn derive(prefix: &str, max_width: u32, max_height: u32) -> Self {
        let canonical = format!("{prefix}w={max_width}&h={max_height}");
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Returns the hex-encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = CacheKey::derive("https://example.com/a.png", 300, 200);
        let b = CacheKey::derive("https://example.com/a.png", 300, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimensions_change_key() {
        let base = CacheKey::derive("https://example.com/a.png", 300, 200);
        let wider = CacheKey::derive("https://example.com/a.png", 400, 200);
        let taller = CacheKey::derive("https://example.com/a.png", 300, 300);
        assert_ne!(base, wider);
        assert_ne!(base, taller);
        assert_ne!(wider, taller);
    }

    #[test]
    fn test_key_width_is_fixed() {
        // A large sample makes a digest with a leading zero byte all but
        // certain; every key must still be 64 chars.
        for i in 0..512 {
            let key = CacheKey::derive(&format!("https://example.com/{i}"), 0, 0);
            assert_eq!(key.as_str().len(), 64);
        }
    }

    #[test]
    fn test_prefix_changes_key() {
        let a = CacheKey::derive("https://example.com/a.png", 0, 0);
        let b = CacheKey::derive("https://example.com/b.png", 0, 0);
        assert_ne!(a, b);
    }
}
