//! Signed content of a NuGet package signature.
//!
//! The content is a small key-value document:
//!
//! ```text
//! Version:1
//!
//! 2.16.840.1.101.3.4.2.1-Hash:<base64 package hash>
//!
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{malformed_signature, SigningResult};
use crate::hash::HashAlgorithmName;

/// Supported signing format version.
pub const SIGNING_SPECIFICATIONS_V1: u32 = 1;

const HASH_SUFFIX: &str = "-Hash";

/// Decoded signature content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContent {
    version: u32,
    hash_algorithm_oid: String,
    hash_value: Vec<u8>,
}

impl SignatureContent {
    /// Content for the current format version.
    pub fn new(algorithm: HashAlgorithmName, hash_value: Vec<u8>) -> Self {
        Self {
            version: SIGNING_SPECIFICATIONS_V1,
            hash_algorithm_oid: algorithm.oid().to_string(),
            hash_value,
        }
    }

    /// Content for a package, hashing `package` with `algorithm`.
    pub fn for_package(algorithm: HashAlgorithmName, package: &[u8]) -> Self {
        Self::new(algorithm, algorithm.digest(package))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn hash_algorithm_oid(&self) -> &str {
        &self.hash_algorithm_oid
    }

    /// `None` when the OID is not in the hash allow-list.
    pub fn hash_algorithm(&self) -> Option<HashAlgorithmName> {
        HashAlgorithmName::from_oid(&self.hash_algorithm_oid)
    }

    pub fn hash_value(&self) -> &[u8] {
        &self.hash_value
    }

    pub fn hash_value_base64(&self) -> String {
        BASE64.encode(&self.hash_value)
    }

    /// Serialize with CRLF line endings.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "Version:{}\r\n\r\n{}{}:{}\r\n\r\n",
            self.version,
            self.hash_algorithm_oid,
            HASH_SUFFIX,
            self.hash_value_base64()
        )
        .into_bytes()
    }

    /// Parse content bytes. Accepts LF or CRLF line endings.
    pub fn from_bytes(bytes: &[u8]) -> SigningResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| malformed_signature("signature content is not UTF-8"))?;

        let mut sections: Vec<Vec<(&str, &str)>> = Vec::new();
        let mut current: Vec<(&str, &str)> = Vec::new();
        for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                if !current.is_empty() {
                    sections.push(std::mem::take(&mut current));
                }
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| malformed_signature(format!("invalid content line: {line}")))?;
            current.push((key.trim(), value.trim()));
        }
        if !current.is_empty() {
            sections.push(current);
        }

        let [header, body] = sections.as_slice() else {
            return Err(malformed_signature(format!(
                "expected 2 content sections, found {}",
                sections.len()
            )));
        };

        let version = match header.as_slice() {
            [("Version", value)] => value
                .parse::<u32>()
                .map_err(|_| malformed_signature(format!("invalid version: {value}")))?,
            _ => return Err(malformed_signature("missing Version header")),
        };

        let (hash_algorithm_oid, encoded) = match body.as_slice() {
            [(key, value)] => match key.strip_suffix(HASH_SUFFIX) {
                Some(oid) if !oid.is_empty() => (oid.to_string(), *value),
                _ => return Err(malformed_signature(format!("invalid hash entry: {key}"))),
            },
            _ => return Err(malformed_signature("expected exactly one hash entry")),
        };

        let hash_value = BASE64
            .decode(encoded)
            .map_err(|e| malformed_signature(format!("invalid hash value: {e}")))?;

        Ok(Self {
            version,
            hash_algorithm_oid,
            hash_value,
        })
    }
}
