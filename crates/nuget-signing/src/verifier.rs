//! Package signature verifier.
//!
//! Runs every configured provider against every primary signature and
//! folds the results into one [`VerifySignaturesResult`].

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainBuilder;
use crate::config::ClientEnvironment;
use crate::error::{SigningError, SigningResult};
use crate::log_code::NuGetLogCode;
use crate::package::SignedPackageReader;
use crate::providers::{
    AllowListVerificationProvider, IntegrityVerificationProvider,
    SignatureHeaderVerificationProvider, SignatureTrustAndValidityVerificationProvider,
    TimestampVerificationProvider, VerificationProvider,
};
use crate::results::{
    PackageVerificationResult, SignatureLog, SignatureVerificationStatus, VerifySignaturesResult,
};
use crate::settings::SignedPackageVerifierSettings;
use crate::timestamp::TimestampCache;

#[derive(Debug, Clone)]
pub struct PackageSignatureVerifier {
    providers: Vec<VerificationProvider>,
    env: ClientEnvironment,
}

impl PackageSignatureVerifier {
    pub fn new(providers: Vec<VerificationProvider>, env: ClientEnvironment) -> Self {
        Self { providers, env }
    }

    /// Integrity, trust and validity, timestamp, allow list and header.
    pub fn with_default_providers(builder: ChainBuilder, env: ClientEnvironment) -> Self {
        Self::new(
            vec![
                IntegrityVerificationProvider::new().into(),
                SignatureTrustAndValidityVerificationProvider::new(builder.clone()).into(),
                TimestampVerificationProvider::new(builder).into(),
                AllowListVerificationProvider::new().into(),
                SignatureHeaderVerificationProvider::new().into(),
            ],
            env,
        )
    }

    pub fn providers(&self) -> &[VerificationProvider] {
        &self.providers
    }

    pub fn environment(&self) -> &ClientEnvironment {
        &self.env
    }

    /// Verify all signatures of `package` under `settings`.
    pub async fn verify_signatures(
        &self,
        package: &dyn SignedPackageReader,
        settings: &SignedPackageVerifierSettings,
        token: &CancellationToken,
    ) -> SigningResult<VerifySignaturesResult> {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }

        if !package.is_signed(token).await? {
            let valid = settings.allow_unsigned();
            let results = if valid {
                Vec::new()
            } else {
                vec![PackageVerificationResult::unsigned(
                    SignatureVerificationStatus::Suspect,
                    vec![SignatureLog::error(
                        NuGetLogCode::NU3004,
                        "The package is not signed.",
                    )],
                )]
            };
            tracing::info!(
                valid,
                signed = false,
                test_mode = self.env.test_mode(),
                "verified package"
            );
            return Ok(VerifySignaturesResult::new(valid, false, results));
        }

        let signatures = package.get_signatures(token).await?;
        if signatures.is_empty() {
            let result = PackageVerificationResult::unsigned(
                SignatureVerificationStatus::Suspect,
                vec![SignatureLog::error(
                    NuGetLogCode::NU3009,
                    "The package signature file does not contain exactly one primary signature.",
                )],
            );
            tracing::warn!("package is marked signed but carries no signature");
            return Ok(VerifySignaturesResult::new(false, true, vec![result]));
        }

        let mut valid = true;
        let mut results = Vec::with_capacity(signatures.len() * self.providers.len());
        for signature in &signatures {
            let timestamps = TimestampCache::new();
            let verdicts = join_all(
                self.providers
                    .iter()
                    .map(|p| p.evaluate(package, signature, settings, &timestamps, token)),
            )
            .await
            .into_iter()
            .collect::<SigningResult<Vec<_>>>()?;

            valid &= is_signature_valid(&verdicts, settings);
            results.extend(verdicts);
        }

        let outcome = VerifySignaturesResult::new(valid, true, results);
        tracing::info!(
            valid,
            signed = true,
            signatures = signatures.len(),
            issues = outcome.issues().count(),
            test_mode = self.env.test_mode(),
            "verified package"
        );
        Ok(outcome)
    }
}

/// A signature is valid when every provider returned `Valid`, or
/// `Disallowed` while untrusted signers are allowed.
pub fn is_signature_valid(
    results: &[PackageVerificationResult],
    settings: &SignedPackageVerifierSettings,
) -> bool {
    !results.is_empty()
        && results.iter().all(|r| match r.trust() {
            SignatureVerificationStatus::Valid => true,
            SignatureVerificationStatus::Disallowed => settings.allow_untrusted(),
            SignatureVerificationStatus::Suspect | SignatureVerificationStatus::Unknown => false,
        })
}
