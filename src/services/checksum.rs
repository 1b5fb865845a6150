//! Checksum codec for the tus `checksum` extension.
//!
//! Digests are computed over the raw chunk bytes. The two supported algorithms
//! do not share an encoding: `md5` digests are lowercase hex while `sha1`
//! digests are standard base64.

use base64::{Engine as _, engine::general_purpose};
use sha1::{Digest, Sha1};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("checksum algorithm `{0}` is not supported")]
    Unsupported(String),
    #[error("checksum mismatch: client sent `{claimed}`, server computed `{computed}`")]
    Mismatch { claimed: String, computed: String },
    #[error("malformed Upload-Checksum header `{0}`")]
    Malformed(String),
}

/// Digest algorithms the server knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
        }
    }

    /// Encoded digest of `bytes` in this algorithm's wire encoding.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
            ChecksumAlgorithm::Sha1 => general_purpose::STANDARD.encode(Sha1::digest(bytes)),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            other => Err(ChecksumError::Unsupported(other.to_string())),
        }
    }
}

/// Compute the encoded digest for an algorithm given by name.
pub fn digest(algorithm: &str, bytes: &[u8]) -> Result<String, ChecksumError> {
    Ok(algorithm.parse::<ChecksumAlgorithm>()?.digest(bytes))
}

/// Parse a comma separated algorithm list such as `md5,sha1`.
pub fn parse_algorithm_list(value: &str) -> Result<Vec<ChecksumAlgorithm>, ChecksumError> {
    let mut algorithms = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let algorithm = name.parse::<ChecksumAlgorithm>()?;
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }
    Ok(algorithms)
}

/// Render an algorithm list for the `Tus-Checksum-Algorithm` header.
pub fn format_algorithm_list(algorithms: &[ChecksumAlgorithm]) -> String {
    algorithms
        .iter()
        .map(ChecksumAlgorithm::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// A checksum claimed by the client through `Upload-Checksum: <algorithm> <digest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumClaim {
    pub algorithm: String,
    pub digest: String,
}

impl ChecksumClaim {
    pub fn parse(header: &str) -> Result<Self, ChecksumError> {
        let parts: Vec<&str> = header.split(' ').collect();
        match parts.as_slice() {
            [algorithm, digest] if !algorithm.is_empty() && !digest.is_empty() => Ok(Self {
                algorithm: algorithm.to_ascii_lowercase(),
                digest: (*digest).to_string(),
            }),
            _ => Err(ChecksumError::Malformed(header.to_string())),
        }
    }

    /// Resolve the claimed algorithm against the configured allow-list.
    pub fn algorithm_in(
        &self,
        allowed: &[ChecksumAlgorithm],
    ) -> Result<ChecksumAlgorithm, ChecksumError> {
        let algorithm = self.algorithm.parse::<ChecksumAlgorithm>()?;
        if allowed.contains(&algorithm) {
            Ok(algorithm)
        } else {
            Err(ChecksumError::Unsupported(self.algorithm.clone()))
        }
    }

    /// Check `bytes` against the claimed digest.
    pub fn verify(&self, bytes: &[u8]) -> Result<(), ChecksumError> {
        let computed = digest(&self.algorithm, bytes)?;
        if computed == self.digest {
            Ok(())
        } else {
            Err(ChecksumError::Mismatch {
                claimed: self.digest.clone(),
                computed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_is_hex_encoded() {
        assert_eq!(
            digest("md5", b"hello").unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn sha1_is_base64_encoded() {
        assert_eq!(
            digest("SHA1", b"hello").unwrap(),
            "qvTGHdzF6KLavt4PO0gs2a6pQ00="
        );
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert_eq!(
            digest("crc32", b"hello"),
            Err(ChecksumError::Unsupported("crc32".into()))
        );
    }

    #[test]
    fn algorithm_list_roundtrips_through_header_format() {
        let list = parse_algorithm_list(" md5, sha1 ,md5").unwrap();
        assert_eq!(list, vec![ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha1]);
        assert_eq!(format_algorithm_list(&list), "md5,sha1");
        assert!(parse_algorithm_list("md5,sha256").is_err());
    }

    #[test]
    fn claim_requires_two_parts() {
        let claim = ChecksumClaim::parse("MD5 abc").unwrap();
        assert_eq!(claim.algorithm, "md5");
        assert_eq!(claim.digest, "abc");

        assert!(ChecksumClaim::parse("md5").is_err());
        assert!(ChecksumClaim::parse("md5 a b").is_err());
    }

    #[test]
    fn claim_outside_allow_list_is_unsupported() {
        let claim = ChecksumClaim::parse("sha1 qvTGHdzF6KLavt4PO0gs2a6pQ00=").unwrap();
        assert_eq!(
            claim.algorithm_in(&[ChecksumAlgorithm::Md5]),
            Err(ChecksumError::Unsupported("sha1".into()))
        );
        assert_eq!(
            claim.algorithm_in(&[ChecksumAlgorithm::Sha1]),
            Ok(ChecksumAlgorithm::Sha1)
        );
        assert!(claim.verify(b"hello").is_ok());
    }

    #[test]
    fn wrong_digest_reports_mismatch() {
        let claim = ChecksumClaim::parse("md5 00000000000000000000000000000000").unwrap();
        let err = claim.verify(b"hello").unwrap_err();
        assert!(matches!(err, ChecksumError::Mismatch { .. }));
    }
}
