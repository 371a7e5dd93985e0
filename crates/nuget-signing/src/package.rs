//! Read-only access to a signed package.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::content::SignatureContent;
use crate::error::{SigningError, SigningResult};
use crate::hash::to_upper_hex;
use crate::signature::PrimarySignature;

/// Package accessor consumed by the verifier.
///
/// Implementations must be safe to share across concurrently running
/// providers; nothing in the verification pipeline writes to the package.
#[async_trait]
pub trait SignedPackageReader: Send + Sync {
    async fn is_signed(&self, token: &CancellationToken) -> SigningResult<bool>;

    /// All primary signatures of the package.
    async fn get_signatures(
        &self,
        token: &CancellationToken,
    ) -> SigningResult<Vec<PrimarySignature>>;

    /// The primary signature, `None` when the package is unsigned.
    async fn get_primary_signature(
        &self,
        token: &CancellationToken,
    ) -> SigningResult<Option<PrimarySignature>> {
        Ok(self.get_signatures(token).await?.into_iter().next())
    }

    /// Check that the package content hashes to the signed value.
    ///
    /// Fails with [`SigningError::UnsupportedHashAlgorithm`] or
    /// [`SigningError::IntegrityMismatch`].
    async fn validate_integrity(
        &self,
        content: &SignatureContent,
        token: &CancellationToken,
    ) -> SigningResult<()>;
}

/// A package held in memory.
///
/// `bytes` are the package contents excluding the signature file.
#[derive(Debug, Clone)]
pub struct InMemorySignedPackage {
    bytes: Vec<u8>,
    signed: bool,
    signatures: Vec<PrimarySignature>,
}

impl InMemorySignedPackage {
    pub fn unsigned(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            signed: false,
            signatures: Vec::new(),
        }
    }

    pub fn signed(bytes: Vec<u8>, signatures: Vec<PrimarySignature>) -> Self {
        Self {
            bytes,
            signed: true,
            signatures,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[async_trait]
impl SignedPackageReader for InMemorySignedPackage {
    async fn is_signed(&self, token: &CancellationToken) -> SigningResult<bool> {
        check_cancelled(token)?;
        Ok(self.signed)
    }

    async fn get_signatures(
        &self,
        token: &CancellationToken,
    ) -> SigningResult<Vec<PrimarySignature>> {
        check_cancelled(token)?;
        Ok(self.signatures.clone())
    }

    async fn validate_integrity(
        &self,
        content: &SignatureContent,
        token: &CancellationToken,
    ) -> SigningResult<()> {
        check_cancelled(token)?;
        let algorithm = content
            .hash_algorithm()
            .ok_or_else(|| SigningError::UnsupportedHashAlgorithm {
                algorithm: content.hash_algorithm_oid().to_string(),
            })?;

        let actual = algorithm.digest(&self.bytes);
        if actual != content.hash_value() {
            return Err(SigningError::IntegrityMismatch {
                expected: to_upper_hex(content.hash_value()),
                actual: to_upper_hex(&actual),
            });
        }
        Ok(())
    }
}

fn check_cancelled(token: &CancellationToken) -> SigningResult<()> {
    if token.is_cancelled() {
        return Err(SigningError::Cancelled);
    }
    Ok(())
}
