//! Signature verification over raw bytes.
//!
//! Dispatches on the signature algorithm OID: RSA PKCS#1 v1.5 with
//! SHA-256/384/512 and ECDSA on P-256/P-384. CMS signers may name plain
//! `rsaEncryption` and carry the digest separately; see
//! [`SignatureAlgorithm::resolve`]. Algorithms that are recognized but not
//! available in this build fail with [`SigningError::NotSupported`].

use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::signature::Verifier as _;
use rsa::traits::PublicKeyParts as _;
use rsa::RsaPublicKey;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{malformed_certificate, not_supported, SigningError, SigningResult};
use crate::hash::HashAlgorithmName;

pub const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
pub const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
pub const OID_SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
pub const OID_SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
pub const OID_SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
pub const OID_SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
pub const OID_RSASSA_PSS: &str = "1.2.840.113549.1.1.10";
pub const OID_ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
pub const OID_ECDSA_SHA384: &str = "1.2.840.10045.4.3.3";
pub const OID_ECDSA_SHA512: &str = "1.2.840.10045.4.3.4";
pub const OID_ED25519: &str = "1.3.101.112";

/// Minimum RSA modulus length accepted for signing certificates.
pub const RSA_PUBLIC_KEY_MIN_BITS: usize = 2048;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
    RsaPkcs1Sha512,
    EcdsaP256Sha256,
    EcdsaP384Sha384,
}

impl SignatureAlgorithm {
    /// Resolve an algorithm OID.
    ///
    /// Returns `Ok(None)` for unknown or deprecated algorithms (a trust
    /// decision) and `Err(NotSupported)` for algorithms this build cannot
    /// verify.
    pub fn from_oid(oid: &str) -> SigningResult<Option<Self>> {
        match oid {
            OID_SHA256_WITH_RSA => Ok(Some(Self::RsaPkcs1Sha256)),
            OID_SHA384_WITH_RSA => Ok(Some(Self::RsaPkcs1Sha384)),
            OID_SHA512_WITH_RSA => Ok(Some(Self::RsaPkcs1Sha512)),
            OID_ECDSA_SHA256 => Ok(Some(Self::EcdsaP256Sha256)),
            OID_ECDSA_SHA384 => Ok(Some(Self::EcdsaP384Sha384)),
            OID_RSASSA_PSS | OID_ECDSA_SHA512 | OID_ED25519 => Err(not_supported(format!(
                "signature algorithm {oid} is not available on this platform"
            ))),
            _ => Ok(None),
        }
    }

    /// Resolve the algorithm of a CMS signer from its signature and digest
    /// algorithm OIDs.
    pub fn resolve(signature_oid: &str, digest_oid: &str) -> SigningResult<Option<Self>> {
        if signature_oid != OID_RSA_ENCRYPTION {
            return Self::from_oid(signature_oid);
        }
        Ok(match HashAlgorithmName::from_oid(digest_oid) {
            Some(HashAlgorithmName::Sha256) => Some(Self::RsaPkcs1Sha256),
            Some(HashAlgorithmName::Sha384) => Some(Self::RsaPkcs1Sha384),
            Some(HashAlgorithmName::Sha512) => Some(Self::RsaPkcs1Sha512),
            None => None,
        })
    }
}

/// Kind and strength of a subject public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyKind {
    Rsa { bits: usize },
    EcP256,
    EcP384,
    Other,
}

impl PublicKeyKind {
    /// Whether the key meets the signing requirements.
    pub fn is_acceptable(&self) -> bool {
        match self {
            Self::Rsa { bits } => *bits >= RSA_PUBLIC_KEY_MIN_BITS,
            Self::EcP256 | Self::EcP384 => true,
            Self::Other => false,
        }
    }
}

/// Inspect a DER SubjectPublicKeyInfo.
pub fn public_key_kind(spki_der: &[u8]) -> PublicKeyKind {
    if let Ok(key) = RsaPublicKey::from_public_key_der(spki_der) {
        return PublicKeyKind::Rsa {
            bits: key.size() * 8,
        };
    }
    if p256::PublicKey::from_public_key_der(spki_der).is_ok() {
        return PublicKeyKind::EcP256;
    }
    if p384::PublicKey::from_public_key_der(spki_der).is_ok() {
        return PublicKeyKind::EcP384;
    }
    PublicKeyKind::Other
}

/// Verify `signature` over `data` with the key in `spki_der`.
///
/// Returns `Ok(false)` when the bytes do not verify, and an error when the
/// key or signature cannot be decoded or the algorithm is unusable.
pub fn verify_signature(
    spki_der: &[u8],
    algorithm_oid: &str,
    data: &[u8],
    signature: &[u8],
) -> SigningResult<bool> {
    let Some(algorithm) = SignatureAlgorithm::from_oid(algorithm_oid)? else {
        return Err(SigningError::SignatureInvalid {
            reason: format!("unsupported signature algorithm OID: {algorithm_oid}"),
        });
    };
    verify_with(spki_der, algorithm, data, signature)
}

/// Verify `signature` over `data` with an already resolved algorithm.
pub fn verify_with(
    spki_der: &[u8],
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> SigningResult<bool> {
    match algorithm {
        SignatureAlgorithm::RsaPkcs1Sha256 => {
            let vk = pkcs1v15::VerifyingKey::<Sha256>::new(rsa_public_key(spki_der)?);
            Ok(vk.verify(data, &rsa_signature(signature)?).is_ok())
        }
        SignatureAlgorithm::RsaPkcs1Sha384 => {
            let vk = pkcs1v15::VerifyingKey::<Sha384>::new(rsa_public_key(spki_der)?);
            Ok(vk.verify(data, &rsa_signature(signature)?).is_ok())
        }
        SignatureAlgorithm::RsaPkcs1Sha512 => {
            let vk = pkcs1v15::VerifyingKey::<Sha512>::new(rsa_public_key(spki_der)?);
            Ok(vk.verify(data, &rsa_signature(signature)?).is_ok())
        }
        SignatureAlgorithm::EcdsaP256Sha256 => {
            let pk = p256::PublicKey::from_public_key_der(spki_der)
                .map_err(|e| malformed_certificate(format!("bad P-256 public key: {e}")))?;
            let ep = pk.to_encoded_point(false);
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes())
                .map_err(|e| malformed_certificate(format!("bad P-256 public key: {e}")))?;
            let Ok(sig) = p256::ecdsa::Signature::from_der(signature) else {
                return Ok(false);
            };
            Ok(vk.verify(data, &sig).is_ok())
        }
        SignatureAlgorithm::EcdsaP384Sha384 => {
            let pk = p384::PublicKey::from_public_key_der(spki_der)
                .map_err(|e| malformed_certificate(format!("bad P-384 public key: {e}")))?;
            let ep = pk.to_encoded_point(false);
            let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes())
                .map_err(|e| malformed_certificate(format!("bad P-384 public key: {e}")))?;
            let Ok(sig) = p384::ecdsa::Signature::from_der(signature) else {
                return Ok(false);
            };
            Ok(vk.verify(data, &sig).is_ok())
        }
    }
}

fn rsa_public_key(spki_der: &[u8]) -> SigningResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| malformed_certificate(format!("bad RSA public key: {e}")))
}

fn rsa_signature(signature: &[u8]) -> SigningResult<pkcs1v15::Signature> {
    pkcs1v15::Signature::try_from(signature).map_err(|e| SigningError::SignatureInvalid {
        reason: format!("bad RSA signature bytes: {e}"),
    })
}
