//! Content key derivation.
//!
//! Every question is identified by the SHA-256 digest of its category tag
//! and text. Cache entries and leases live in distinct namespaces derived
//! from the same key, so a payload entry can never be confused with a lock.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Category;
use crate::{MimirError, Result};

/// Namespace prefix for cached payloads in the shared tier.
pub const PAYLOAD_NAMESPACE: &str = "mimir:payload:";

/// Namespace prefix for generation leases.
pub const LOCK_NAMESPACE: &str = "mimir:lock:";

/// Hex length of a SHA-256 digest.
const KEY_LEN: usize = 64;

/// Deterministic identifier for a question: 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive the key for `text` asked in `category`.
    ///
    /// The category tag is separated from the text by a NUL byte so that
    /// no choice of text can collide with another category's key space.
    pub fn derive(category: Category, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Validate an externally supplied key.
    pub fn parse(hex: &str) -> Result<Self> {
        let valid = hex.len() == KEY_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(hex.to_string()))
        } else {
            Err(MimirError::InvalidInput(format!(
                "content key must be {KEY_LEN} lowercase hex chars, got '{hex}'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared-tier key for the cached payload.
    pub fn payload_key(&self) -> String {
        format!("{PAYLOAD_NAMESPACE}{}", self.0)
    }

    /// Lease key for generation mutual exclusion.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_NAMESPACE}{}", self.0)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = ContentKey::derive(Category::Code, "let x = 1;");
        let b = ContentKey::derive(Category::Code, "let x = 1;");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn derive_separates_categories() {
        let code = ContentKey::derive(Category::Code, "same text");
        let article = ContentKey::derive(Category::Article, "same text");
        assert_ne!(code, article);
    }

    #[test]
    fn derive_is_lowercase_hex() {
        let key = ContentKey::derive(Category::Article, "Hello");
        assert!(ContentKey::parse(key.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(ContentKey::parse("abc").is_err());
        assert!(ContentKey::parse(&"A".repeat(64)).is_err());
        assert!(ContentKey::parse(&"g".repeat(64)).is_err());
    }

    #[test]
    fn namespaces_are_disjoint() {
        let key = ContentKey::derive(Category::Code, "x");
        assert!(key.payload_key().starts_with(PAYLOAD_NAMESPACE));
        assert!(key.lock_key().starts_with(LOCK_NAMESPACE));
        assert_ne!(key.payload_key(), key.lock_key());
        assert!(key.payload_key().ends_with(key.as_str()));
    }
}
