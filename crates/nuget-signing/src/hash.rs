//! Hash algorithm allow-list and digest helpers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::SigningError;

pub const OID_SHA1: &str = "1.3.14.3.2.26";
pub const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
pub const OID_SHA384: &str = "2.16.840.1.101.3.4.2.2";
pub const OID_SHA512: &str = "2.16.840.1.101.3.4.2.3";

/// Hash algorithms accepted for signed content, fingerprints and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashAlgorithmName {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithmName {
    pub const ALL: [HashAlgorithmName; 3] = [Self::Sha256, Self::Sha384, Self::Sha512];

    pub fn oid(&self) -> &'static str {
        match self {
            Self::Sha256 => OID_SHA256,
            Self::Sha384 => OID_SHA384,
            Self::Sha512 => OID_SHA512,
        }
    }

    /// Look up an algorithm by OID. SHA-1 and anything else is unsupported.
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            OID_SHA256 => Some(Self::Sha256),
            OID_SHA384 => Some(Self::Sha384),
            OID_SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithmName {
    type Err = SigningError;

    /// Accepts `SHA256`, `sha-256`, `Sha384` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(SigningError::UnsupportedHashAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// Uppercase hex with no separators.
pub fn to_upper_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Case-insensitive fingerprint comparison.
pub fn fingerprints_equal(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_lookup() {
        assert_eq!(HashAlgorithmName::from_oid(OID_SHA384), Some(HashAlgorithmName::Sha384));
        assert_eq!(HashAlgorithmName::from_oid(OID_SHA1), None);
        for alg in HashAlgorithmName::ALL {
            assert_eq!(HashAlgorithmName::from_oid(alg.oid()), Some(alg));
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("sha-256".parse::<HashAlgorithmName>().unwrap(), HashAlgorithmName::Sha256);
        assert_eq!("SHA512".parse::<HashAlgorithmName>().unwrap(), HashAlgorithmName::Sha512);
        assert!("SHA1".parse::<HashAlgorithmName>().is_err());
    }

    #[test]
    fn test_digest_lengths() {
        for alg in HashAlgorithmName::ALL {
            assert_eq!(alg.digest(b"nuget").len(), alg.output_len());
        }
    }

    #[test]
    fn test_sha256_known_value() {
        let hex = to_upper_hex(&HashAlgorithmName::Sha256.digest(b"hello world"));
        assert_eq!(
            hex,
            "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9"
        );
    }

    #[test]
    fn test_fingerprint_comparison() {
        assert!(fingerprints_equal("abcd", "ABCD"));
        assert!(!fingerprints_equal("ABCD", "ABCE"));
    }
}
