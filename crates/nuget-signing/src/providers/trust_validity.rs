//! Signer certificate validity, signature bytes and chain trust, for the
//! primary signature and its repository countersignature.

use std::borrow::Cow;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::allow_list::{allows_untrusted_root, AllowListCandidate};
use crate::certificate::{
    certificate_log_messages, is_public_key_valid, is_signature_algorithm_supported, X509Cert,
    OID_CODE_SIGNING_EKU,
};
use crate::chain::{evaluate_chain_trust, ChainBuilder, ChainContext, ChainTrustOptions};
use crate::error::{SigningError, SigningResult};
use crate::hash::HashAlgorithmName;
use crate::log_code::NuGetLogCode;
use crate::results::{PackageVerificationResult, SignatureLog, SignatureVerificationStatus};
use crate::settings::{
    SignaturePlacement, SignatureVerificationBehavior, SignedPackageVerifierSettings,
    VerificationTarget,
};
use crate::signature::{
    PrimarySignature, RepositoryMetadata, SignatureType, SignerInfo, SigningCertificateRequirement,
};
use crate::timestamp::{evaluate_timestamps, TimestampCache};

#[derive(Debug, Clone)]
pub struct SignatureTrustAndValidityVerificationProvider {
    builder: ChainBuilder,
}

/// Verdict for one signer.
struct SignerVerdict {
    status: SignatureVerificationStatus,
    issues: Vec<SignatureLog>,
}

impl SignerVerdict {
    fn failed(code: NuGetLogCode, message: impl Into<String>) -> Self {
        Self {
            status: SignatureVerificationStatus::Suspect,
            issues: vec![SignatureLog::error(code, message)],
        }
    }
}

/// Codes and wording that differ between primary and countersignature.
struct SignerRole {
    context: ChainContext,
    signature_type: SignatureType,
    placement: SignaturePlacement,
    certificate_code: NuGetLogCode,
    signature_code: NuGetLogCode,
    label: &'static str,
}

impl SignerRole {
    fn primary(signature_type: SignatureType) -> Self {
        Self {
            context: ChainContext::PrimarySignature,
            signature_type,
            placement: SignaturePlacement::PRIMARY_SIGNATURE,
            certificate_code: NuGetLogCode::NU3010,
            signature_code: NuGetLogCode::NU3011,
            label: "primary signature",
        }
    }

    fn countersignature() -> Self {
        Self {
            context: ChainContext::RepositoryCountersignature,
            signature_type: SignatureType::Repository,
            placement: SignaturePlacement::COUNTERSIGNATURE,
            certificate_code: NuGetLogCode::NU3034,
            signature_code: NuGetLogCode::NU3031,
            label: "repository countersignature",
        }
    }
}

impl SignatureTrustAndValidityVerificationProvider {
    pub fn new(builder: ChainBuilder) -> Self {
        Self { builder }
    }

    /// `timestamps` holds the primary signer's timestamp evaluation, shared
    /// with the timestamp provider.
    pub async fn get_trust_result(
        &self,
        signature: &PrimarySignature,
        settings: &SignedPackageVerifierSettings,
        timestamps: &TimestampCache,
        token: &CancellationToken,
    ) -> SigningResult<PackageVerificationResult> {
        let signature_type = signature.signature_type();
        let target = settings.verification_target();
        let placement = settings.signature_placement();

        let primary = match signature.signer() {
            Ok(primary) => primary,
            Err(e) => {
                return super::recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3005,
                    "The package signature is invalid.",
                )
            }
        };

        let mut status: Option<SignatureVerificationStatus> = None;
        let mut issues = Vec::new();

        if target.includes(signature_type)
            && placement.contains(SignaturePlacement::PRIMARY_SIGNATURE)
        {
            let payload = match signature.content_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    return super::recover_malformed(
                        e,
                        signature_type,
                        NuGetLogCode::NU3005,
                        "The package signature content is invalid.",
                    )
                }
            };
            let verdict = self
                .verify_signer(
                    primary,
                    payload,
                    SignerRole::primary(signature_type),
                    signature.repository_metadata(),
                    signature.owners(),
                    settings,
                    Some(timestamps),
                    token,
                )
                .await?;
            status = Some(verdict.status);
            issues.extend(verdict.issues);
        }

        let behavior = settings.repository_countersignature_verification_behavior();
        if placement.contains(SignaturePlacement::COUNTERSIGNATURE)
            && target.contains(VerificationTarget::REPOSITORY)
            && behavior != SignatureVerificationBehavior::Never
        {
            match signature.countersignature() {
                None => {
                    if behavior == SignatureVerificationBehavior::Always
                        && signature_type != SignatureType::Repository
                    {
                        status = Some(combine(status, SignatureVerificationStatus::Suspect));
                        issues.push(SignatureLog::error(
                            NuGetLogCode::NU3038,
                            "The repository countersignature is required but was not found.",
                        ));
                    }
                }
                Some(countersignature) => {
                    let needed = behavior != SignatureVerificationBehavior::IfExistsAndIsNecessary
                        || status != Some(SignatureVerificationStatus::Valid);
                    if needed {
                        let verdict = self
                            .verify_signer(
                                countersignature.signer(),
                                primary.signature_value(),
                                SignerRole::countersignature(),
                                countersignature.metadata(),
                                signature.owners(),
                                settings,
                                None,
                                token,
                            )
                            .await?;
                        issues.extend(verdict.issues);
                        status = Some(match (behavior, status) {
                            (
                                SignatureVerificationBehavior::IfExistsAndIsNecessary,
                                Some(primary_status),
                            ) if primary_status != SignatureVerificationStatus::Suspect => {
                                verdict.status
                            }
                            (_, primary_status) => combine(primary_status, verdict.status),
                        });
                    }
                }
            }
        }

        let status = status.unwrap_or_else(|| {
            issues.push(SignatureLog::warning(
                NuGetLogCode::NU3040,
                format!(
                    "The {signature_type:?} signature is not covered by the verification target."
                ),
            ));
            SignatureVerificationStatus::Unknown
        });

        Ok(PackageVerificationResult::signed(status, signature_type, issues))
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_signer(
        &self,
        signer: &SignerInfo,
        payload: &[u8],
        role: SignerRole,
        metadata: Option<&RepositoryMetadata>,
        owners: Option<&[String]>,
        settings: &SignedPackageVerifierSettings,
        shared_timestamps: Option<&TimestampCache>,
        token: &CancellationToken,
    ) -> SigningResult<SignerVerdict> {
        if role.signature_type == SignatureType::Repository {
            if let Some(verdict) = check_service_index(metadata, role.label) {
                return Ok(verdict);
            }
        }

        let certificate = match signer.certificate() {
            Ok(Some(certificate)) => certificate,
            Ok(None) => {
                return Ok(SignerVerdict::failed(
                    role.certificate_code,
                    format!("The {} does not have a signing certificate.", role.label),
                ))
            }
            Err(e) => {
                return recover(e, role.certificate_code, "The signing certificate is invalid.")
            }
        };

        if !is_signature_algorithm_supported(&certificate)?
            || signer.algorithm()?.is_none()
        {
            return Ok(SignerVerdict::failed(
                NuGetLogCode::NU3013,
                format!(
                    "The signing certificate of the {} has an unsupported signature algorithm.",
                    role.label
                ),
            ));
        }
        if !is_public_key_valid(&certificate) {
            return Ok(SignerVerdict::failed(
                NuGetLogCode::NU3014,
                "The signing certificate does not meet a minimum public key length requirement.",
            ));
        }
        if !certificate.is_valid_for_purpose(OID_CODE_SIGNING_EKU) {
            return Ok(SignerVerdict::failed(
                role.certificate_code,
                "The signing certificate is not valid for code signing.",
            ));
        }
        if certificate.has_lifetime_signing_eku() {
            return Ok(SignerVerdict::failed(
                NuGetLogCode::NU3015,
                "The lifetime signing EKU in the signing certificate is not supported.",
            ));
        }

        match signer.verify(&certificate, payload) {
            Ok(true) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Ok(false) | Err(_) => {
                return Ok(SignerVerdict::failed(
                    role.signature_code,
                    format!("The {} signature validation failed.", role.label),
                ))
            }
        }
        if !signer.signing_certificate_matches(&certificate, SigningCertificateRequirement::V2Only)
        {
            return Ok(SignerVerdict::failed(
                role.signature_code,
                format!(
                    "The {} must carry a signing-certificate-v2 attribute naming its certificate \
                     and no signing-certificate attribute.",
                    role.label
                ),
            ));
        }

        let now = Utc::now();
        if certificate.is_validity_period_in_future(now) {
            return Ok(with_certificate(
                SignerVerdict::failed(
                    NuGetLogCode::NU3017,
                    "The signing certificate is not yet valid.",
                ),
                &certificate,
            ));
        }

        let evaluation = match shared_timestamps {
            Some(cache) => cache.primary(signer, settings, &self.builder, token).await?,
            None => Cow::Owned(evaluate_timestamps(signer, settings, &self.builder, token).await?),
        };
        let verification_time = match &evaluation.timestamp {
            Some(ts) if ts.covers_validity_of(&certificate) => ts.generalized_time(),
            Some(_) if certificate.is_expired(now) => {
                return Ok(with_certificate(
                    SignerVerdict::failed(
                        NuGetLogCode::NU3026,
                        "The timestamp's generalized time is outside the signing certificate's \
                         validity period.",
                    ),
                    &certificate,
                ));
            }
            None if certificate.is_expired(now) => {
                return Ok(with_certificate(
                    SignerVerdict::failed(
                        NuGetLogCode::NU3037,
                        format!("The {} validity period has expired.", role.label),
                    ),
                    &certificate,
                ));
            }
            _ => now,
        };

        let extra = match signer.additional_certificates() {
            Ok(extra) => extra,
            Err(e) => {
                return recover(
                    e,
                    role.context.chain_building_code(),
                    "A certificate shipped with the signature is invalid.",
                )
            }
        };

        let candidate = AllowListCandidate {
            signature_type: role.signature_type,
            placement: role.placement,
            certificate: &certificate,
            owners,
        };
        let allow_untrusted_root = settings.allow_untrusted()
            || allows_untrusted_root(settings.client_allow_list(), &candidate)
            || allows_untrusted_root(settings.repository_allow_list(), &candidate);

        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }
        let outcome = evaluate_chain_trust(
            &self.builder,
            &certificate,
            &extra,
            ChainTrustOptions {
                verification_time,
                revocation_mode: settings.revocation_mode(),
                allow_untrusted_root,
                allow_unknown_revocation: settings.allow_unknown_revocation(),
                report_unknown_revocation: settings.report_unknown_revocation(),
            },
            role.context,
            token,
        )
        .await?;

        let verdict = SignerVerdict {
            status: outcome.status,
            issues: outcome.issues,
        };
        if verdict.status == SignatureVerificationStatus::Valid {
            Ok(verdict)
        } else {
            Ok(with_certificate(verdict, &certificate))
        }
    }
}

fn combine(
    current: Option<SignatureVerificationStatus>,
    next: SignatureVerificationStatus,
) -> SignatureVerificationStatus {
    current.map_or(next, |c| c.combine(next))
}

fn recover(err: SigningError, code: NuGetLogCode, message: &str) -> SigningResult<SignerVerdict> {
    if !err.is_malformed_input() {
        return Err(err);
    }
    let mut verdict = SignerVerdict::failed(code, message);
    verdict.issues.push(SignatureLog::debug(err.to_string()));
    Ok(verdict)
}

/// Append the signer certificate description to a failed verdict.
fn with_certificate(mut verdict: SignerVerdict, certificate: &X509Cert) -> SignerVerdict {
    verdict
        .issues
        .extend(certificate_log_messages(certificate, HashAlgorithmName::Sha256, "  "));
    verdict
}

fn check_service_index(
    metadata: Option<&RepositoryMetadata>,
    label: &str,
) -> Option<SignerVerdict> {
    let Some(metadata) = metadata else {
        return Some(SignerVerdict::failed(
            NuGetLogCode::NU3005,
            format!("The {label} does not declare a repository service index."),
        ));
    };
    match url::Url::parse(&metadata.v3_service_index) {
        Ok(url) if url.scheme() == "https" => None,
        _ => Some(SignerVerdict::failed(
            NuGetLogCode::NU3005,
            format!(
                "The {label} service index is not a valid HTTPS URL: {}",
                metadata.v3_service_index
            ),
        )),
    }
}
