//! Client and repository allow lists.
//!
//! A signature passes a list when either its primary signer or its
//! repository countersigner matches an entry in scope. Failures are
//! `Disallowed` errors, or warnings when untrusted signers are allowed.

use tokio_util::sync::CancellationToken;

use super::recover_malformed;
use crate::allow_list::{is_allowed, AllowListCandidate, VerificationAllowListEntry};
use crate::certificate::X509Cert;
use crate::error::{SigningError, SigningResult};
use crate::log_code::NuGetLogCode;
use crate::results::{PackageVerificationResult, SignatureLog, SignatureVerificationStatus};
use crate::settings::{SignaturePlacement, SignedPackageVerifierSettings};
use crate::signature::{PrimarySignature, SignatureType};

const CLIENT_LIST_MISSING: &str =
    "A list of trusted signers is required by the client but none was found.";
const CLIENT_LIST_MISMATCH: &str = "The package signature certificate fingerprint does not \
    match any certificate fingerprint in client allow list.";
const REPOSITORY_LIST_MISSING: &str = "A repository announced that their packages should be \
    signed but an empty list of trusted certificates was found.";
const REPOSITORY_LIST_MISMATCH: &str = "The package signature certificate fingerprint does not \
    match any certificate fingerprint in repository allow list.";

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowListVerificationProvider;

impl AllowListVerificationProvider {
    pub fn new() -> Self {
        Self
    }

    pub async fn get_trust_result(
        &self,
        signature: &PrimarySignature,
        settings: &SignedPackageVerifierSettings,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        let signature_type = signature.signature_type();

        let primary = match signature.signer().and_then(|signer| signer.certificate()) {
            Ok(certificate) => certificate,
            Err(e) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3034,
                    "The signing certificate is invalid.",
                )
            }
        };
        let counter = match signature.countersignature().map(|c| c.signer().certificate()) {
            None => None,
            Some(Ok(certificate)) => certificate,
            Some(Err(e)) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3034,
                    "The repository countersignature certificate is invalid.",
                )
            }
        };

        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }

        let mut candidates = Vec::with_capacity(2);
        if let Some(certificate) = primary.as_ref() {
            candidates.push(candidate(
                signature_type,
                SignaturePlacement::PRIMARY_SIGNATURE,
                certificate,
                signature,
            ));
        }
        if let Some(certificate) = counter.as_ref() {
            candidates.push(candidate(
                SignatureType::Repository,
                SignaturePlacement::COUNTERSIGNATURE,
                certificate,
                signature,
            ));
        }

        let fatal = !settings.allow_untrusted();
        let mut issues = Vec::new();
        let checks = [
            (
                settings.client_allow_list(),
                settings.allow_no_client_certificate_list(),
                CLIENT_LIST_MISSING,
                CLIENT_LIST_MISMATCH,
            ),
            (
                settings.repository_allow_list(),
                settings.allow_no_repository_certificate_list(),
                REPOSITORY_LIST_MISSING,
                REPOSITORY_LIST_MISMATCH,
            ),
        ];
        for (entries, allow_missing, missing, mismatch) in checks {
            let checked = check_list(entries, allow_missing, &candidates, missing, mismatch);
            if let Some(message) = checked {
                issues.push(SignatureLog::issue(fatal, NuGetLogCode::NU3034, message));
            }
        }

        let status = if fatal && !issues.is_empty() {
            SignatureVerificationStatus::Disallowed
        } else {
            SignatureVerificationStatus::Valid
        };
        if !issues.is_empty() {
            tracing::debug!(
                status = %status,
                issues = issues.len(),
                "allow list rejected signer"
            );
        }

        Ok(PackageVerificationResult::signed(status, signature_type, issues))
    }
}

fn candidate<'a>(
    signature_type: SignatureType,
    placement: SignaturePlacement,
    certificate: &'a X509Cert,
    signature: &'a PrimarySignature,
) -> AllowListCandidate<'a> {
    AllowListCandidate {
        signature_type,
        placement,
        certificate,
        owners: signature.owners(),
    }
}

/// The failure message for one list, if it rejects every candidate.
fn check_list(
    entries: &[VerificationAllowListEntry],
    allow_missing: bool,
    candidates: &[AllowListCandidate<'_>],
    missing: &'static str,
    mismatch: &'static str,
) -> Option<&'static str> {
    if entries.is_empty() {
        return (!allow_missing).then_some(missing);
    }
    if candidates.iter().any(|c| is_allowed(entries, c)) {
        None
    } else {
        Some(mismatch)
    }
}
