//! Verification providers.
//!
//! Each provider inspects one signature and returns one
//! [`PackageVerificationResult`]. Providers never depend on each other's
//! output; the verifier runs them concurrently and combines the results.
//!
//! Malformed input found by a provider becomes a `Suspect` result carrying a
//! debug issue with the underlying error. `NotSupported` and `Cancelled`
//! propagate unchanged.

mod allow_list;
mod header;
mod integrity;
mod timestamp;
mod trust_validity;

use tokio_util::sync::CancellationToken;

use crate::error::{SigningError, SigningResult};
use crate::log_code::NuGetLogCode;
use crate::package::SignedPackageReader;
use crate::results::{PackageVerificationResult, SignatureLog, SignatureVerificationStatus};
use crate::settings::SignedPackageVerifierSettings;
use crate::signature::{PrimarySignature, SignatureType};
use crate::timestamp::TimestampCache;

pub use allow_list::AllowListVerificationProvider;
pub use header::SignatureHeaderVerificationProvider;
pub use integrity::IntegrityVerificationProvider;
pub use timestamp::TimestampVerificationProvider;
pub use trust_validity::SignatureTrustAndValidityVerificationProvider;

/// The statically known provider set.
#[derive(Debug, Clone)]
pub enum VerificationProvider {
    Integrity(IntegrityVerificationProvider),
    SignatureTrustAndValidity(SignatureTrustAndValidityVerificationProvider),
    Timestamp(TimestampVerificationProvider),
    AllowList(AllowListVerificationProvider),
    SignatureHeader(SignatureHeaderVerificationProvider),
}

impl VerificationProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integrity(_) => "integrity",
            Self::SignatureTrustAndValidity(_) => "trust-and-validity",
            Self::Timestamp(_) => "timestamp",
            Self::AllowList(_) => "allow-list",
            Self::SignatureHeader(_) => "signature-header",
        }
    }

    /// Evaluate `signature`.
    pub async fn get_trust_result(
        &self,
        package: &dyn SignedPackageReader,
        signature: &PrimarySignature,
        settings: &SignedPackageVerifierSettings,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        self.evaluate(package, signature, settings, &TimestampCache::new(), token)
            .await
    }

    /// Evaluate `signature`, reading the primary timestamp evaluation from
    /// `timestamps`.
    pub(crate) async fn evaluate(
        &self,
        package: &dyn SignedPackageReader,
        signature: &PrimarySignature,
        settings: &SignedPackageVerifierSettings,
        timestamps: &TimestampCache,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }

        let result = match self {
            Self::Integrity(p) => p.get_trust_result(package, signature, token).await,
            Self::SignatureTrustAndValidity(p) => {
                p.get_trust_result(signature, settings, timestamps, token)
                    .await
            }
            Self::Timestamp(p) => {
                p.get_trust_result(signature, settings, timestamps, token)
                    .await
            }
            Self::AllowList(p) => p.get_trust_result(signature, settings, token).await,
            Self::SignatureHeader(p) => p.get_trust_result(signature),
        }?;

        tracing::debug!(
            provider = self.name(),
            signature_type = ?signature.signature_type(),
            trust = %result.trust(),
            issues = result.issues().len(),
            "provider verdict"
        );
        Ok(result)
    }
}

impl From<IntegrityVerificationProvider> for VerificationProvider {
    fn from(p: IntegrityVerificationProvider) -> Self {
        Self::Integrity(p)
    }
}

impl From<SignatureTrustAndValidityVerificationProvider> for VerificationProvider {
    fn from(p: SignatureTrustAndValidityVerificationProvider) -> Self {
        Self::SignatureTrustAndValidity(p)
    }
}

impl From<TimestampVerificationProvider> for VerificationProvider {
    fn from(p: TimestampVerificationProvider) -> Self {
        Self::Timestamp(p)
    }
}

impl From<AllowListVerificationProvider> for VerificationProvider {
    fn from(p: AllowListVerificationProvider) -> Self {
        Self::AllowList(p)
    }
}

impl From<SignatureHeaderVerificationProvider> for VerificationProvider {
    fn from(p: SignatureHeaderVerificationProvider) -> Self {
        Self::SignatureHeader(p)
    }
}

/// Turn a malformed-input error into a `Suspect` result; other errors
/// propagate.
pub(crate) fn recover_malformed(
    err: SigningError,
    signature_type: SignatureType,
    code: NuGetLogCode,
    message: &str,
) -> SigningResult<PackageVerificationResult> {
    if !err.is_malformed_input() {
        return Err(err);
    }
    tracing::debug!(error = %err, code = %code, "recovered malformed input");
    Ok(PackageVerificationResult::signed(
        SignatureVerificationStatus::Suspect,
        signature_type,
        vec![
            SignatureLog::error(code, message),
            SignatureLog::debug(err.to_string()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_malformed() {
        let recovered = recover_malformed(
            SigningError::MalformedCertificate {
                reason: "truncated".into(),
            },
            SignatureType::Author,
            NuGetLogCode::NU3010,
            "bad certificate",
        )
        .unwrap();
        assert_eq!(recovered.trust(), SignatureVerificationStatus::Suspect);
        assert_eq!(recovered.issues().len(), 2);
        assert!(recovered.issues()[1].message.contains("truncated"));

        let err = recover_malformed(
            SigningError::Cancelled,
            SignatureType::Author,
            NuGetLogCode::NU3010,
            "bad certificate",
        )
        .unwrap_err();
        assert!(matches!(err, SigningError::Cancelled));
    }
}
