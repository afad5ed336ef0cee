//! Content digests used as the staleness oracle for generated indexes.
//!
//! The digest covers the content block only, so regenerating the index never changes it. Line
//! endings are normalised to `\n` before hashing so a document digests identically whether it
//! was checked out with LF or CRLF endings.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ALGORITHM: &str = "sha256";
/// Shortest stored digest accepted by [`ContentDigest::matches`].
const MIN_PREFIX: usize = 7;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// SHA-256 digest of a content block, rendered as `sha256:<hex>`.
pub struct ContentDigest {
    hex: String,
}

impl ContentDigest {
    #[must_use]
    /// Digests `content_block` with line endings normalised.
    pub fn compute(content_block: &str) -> Self {
        let mut hasher = Sha256::new();
        let bytes = content_block.as_bytes();
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\r' {
                hasher.update(&bytes[start..i]);
                hasher.update(b"\n");
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            i += 1;
        }
        hasher.update(&bytes[start..]);
        Self {
            hex: hex::encode(hasher.finalize()),
        }
    }

    #[must_use]
    /// Lowercase hex digits of the digest.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    #[must_use]
    /// Whether a stored digest refers to this one, accepting abbreviated stored values.
    pub fn matches(&self, stored: &Self) -> bool {
        stored.hex.len() >= MIN_PREFIX && self.hex.starts_with(&stored.hex)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM}:{}", self.hex)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Reason a stored `<algorithm>:<hex>` value was rejected.
pub enum DigestParseError {
    /// No `:` separator.
    #[error("expected <algorithm>:<hex>")]
    MissingAlgorithm,
    /// An algorithm other than sha256.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Empty, too short, or non-hex digits.
    #[error("invalid digest hex")]
    InvalidHex,
}

impl FromStr for ContentDigest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .trim()
            .split_once(':')
            .ok_or(DigestParseError::MissingAlgorithm)?;
        if algo != ALGORITHM {
            return Err(DigestParseError::UnsupportedAlgorithm(algo.to_string()));
        }
        let well_formed = hex.len() >= MIN_PREFIX
            && hex.len() <= 64
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(DigestParseError::InvalidHex);
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "tests/digest.rs"]
mod tests;
