use crate::error::LayoutError;
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;

const SHA256: &str = "sha256";

/// A content digest in `algorithm:hex` form. Only sha256 is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: String,
    pub hash: String,
}

impl Digest {
    pub fn parse(value: &str) -> Result<Self, LayoutError> {
        let (algorithm, hash) = value
            .split_once(':')
            .ok_or_else(|| LayoutError::InvalidDigest(value.to_string()))?;

        if algorithm != SHA256
            || hash.len() != 64
            || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(LayoutError::InvalidDigest(value.to_string()));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hash: hex::encode(hasher.finalize()),
        }
    }

    /// The hex part, used as a file name.
    pub fn encoded(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let value = format!("sha256:{}", "ab".repeat(32));
        let digest = Digest::parse(&value).unwrap();
        assert_eq!(digest.encoded(), "ab".repeat(32));
        assert_eq!(digest.to_string(), value);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse(&format!("sha512:{}", "a".repeat(64))).is_err());
        assert!(Digest::parse(&format!("sha256:{}", "G".repeat(64))).is_err());
        assert!(Digest::parse("nocolon").is_err());
    }

    #[test]
    fn test_of_empty() {
        assert_eq!(
            Digest::of(b"").encoded(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
