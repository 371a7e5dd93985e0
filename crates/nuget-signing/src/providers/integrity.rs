//! Package integrity: the content hash must match the signed hash.

use tokio_util::sync::CancellationToken;

use super::recover_malformed;
use crate::error::{SigningError, SigningResult};
use crate::log_code::NuGetLogCode;
use crate::package::SignedPackageReader;
use crate::results::{PackageVerificationResult, SignatureLog, SignatureVerificationStatus};
use crate::signature::PrimarySignature;

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerificationProvider;

impl IntegrityVerificationProvider {
    pub fn new() -> Self {
        Self
    }

    pub async fn get_trust_result(
        &self,
        package: &dyn SignedPackageReader,
        signature: &PrimarySignature,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        let signature_type = signature.signature_type();
        let content = match signature.signature_content() {
            Ok(content) => content,
            Err(e) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3005,
                    "The package signature content is invalid.",
                )
            }
        };

        let (code, message) = match package.validate_integrity(&content, token).await {
            Ok(()) => {
                return Ok(PackageVerificationResult::signed(
                    SignatureVerificationStatus::Valid,
                    signature_type,
                    Vec::new(),
                ))
            }
            Err(SigningError::UnsupportedHashAlgorithm { algorithm }) => (
                NuGetLogCode::NU3016,
                format!("The package hash uses an unsupported hash algorithm: {algorithm}."),
            ),
            Err(e @ SigningError::IntegrityMismatch { .. }) => {
                tracing::warn!(error = %e, "package integrity check failed");
                return Ok(PackageVerificationResult::signed(
                    SignatureVerificationStatus::Suspect,
                    signature_type,
                    vec![
                        SignatureLog::error(
                            NuGetLogCode::NU3008,
                            "The package integrity check failed. The package has changed since \
                             it was signed.",
                        ),
                        SignatureLog::debug(e.to_string()),
                    ],
                ));
            }
            Err(e) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3008,
                    "The package integrity check failed.",
                )
            }
        };

        Ok(PackageVerificationResult::signed(
            SignatureVerificationStatus::Suspect,
            signature_type,
            vec![SignatureLog::error(code, message)],
        ))
    }
}
