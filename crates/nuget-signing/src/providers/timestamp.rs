//! Timestamp verification for the primary signer.

use tokio_util::sync::CancellationToken;

use super::recover_malformed;
use crate::chain::ChainBuilder;
use crate::error::SigningResult;
use crate::log_code::NuGetLogCode;
use crate::results::PackageVerificationResult;
use crate::settings::SignedPackageVerifierSettings;
use crate::signature::PrimarySignature;
use crate::timestamp::{Timestamp, TimestampCache};

#[derive(Debug, Clone)]
pub struct TimestampVerificationProvider {
    builder: ChainBuilder,
}

impl TimestampVerificationProvider {
    pub fn new(builder: ChainBuilder) -> Self {
        Self { builder }
    }

    /// The result carries the earliest valid timestamp's generalized time.
    pub async fn get_trust_result(
        &self,
        signature: &PrimarySignature,
        settings: &SignedPackageVerifierSettings,
        timestamps: &TimestampCache,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        let signer = match signature.signer() {
            Ok(signer) => signer,
            Err(e) => {
                return recover_malformed(
                    e,
                    signature.signature_type(),
                    NuGetLogCode::NU3005,
                    "The package signature is invalid.",
                )
            }
        };
        let evaluation = timestamps
            .primary(signer, settings, &self.builder, token)
            .await?;

        Ok(PackageVerificationResult::timestamped(
            evaluation.status,
            evaluation.timestamp.as_ref().map(Timestamp::generalized_time),
            evaluation.issues.clone(),
        ))
    }
}
