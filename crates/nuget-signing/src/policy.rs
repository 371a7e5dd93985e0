//! Client trust policy: maps the policy file to verifier settings.

use crate::allow_list::{
    TrustedCertificate, TrustedSignerAllowListEntry, VerificationAllowListEntry,
};
use crate::config::{
    CertificateConfig, ClientEnvironment, SignatureValidationMode, TrustPolicyConfig,
    TrustedSignerConfig,
};
use crate::error::SigningResult;
use crate::settings::{SignaturePlacement, SignedPackageVerifierSettings, VerificationTarget};

/// Verifier settings and allow list derived from the client trust policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientPolicyContext {
    policy: SignatureValidationMode,
    allow_list: Vec<VerificationAllowListEntry>,
    settings: SignedPackageVerifierSettings,
}

impl ClientPolicyContext {
    /// Build the client policy from a loaded trust policy file.
    pub fn get_client_policy(
        config: &TrustPolicyConfig,
        env: &ClientEnvironment,
    ) -> SigningResult<Self> {
        let allow_list = config
            .trusted_signers
            .iter()
            .map(signer_entries)
            .collect::<SigningResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        let settings = match config.signature_validation_mode {
            SignatureValidationMode::Accept => {
                SignedPackageVerifierSettings::accept_mode_policy(env)
                    .to_builder()
                    .client_allow_list(allow_list.clone())
                    .build()?
            }
            SignatureValidationMode::Require => {
                SignedPackageVerifierSettings::require_mode_policy(env)
                    .to_builder()
                    .client_allow_list(allow_list.clone())
                    .allow_no_client_certificate_list(false)
                    .build()?
            }
        };

        tracing::debug!(
            mode = ?config.signature_validation_mode,
            entries = allow_list.len(),
            "resolved client signing policy"
        );

        Ok(Self {
            policy: config.signature_validation_mode,
            allow_list,
            settings,
        })
    }

    pub fn policy(&self) -> SignatureValidationMode {
        self.policy
    }

    pub fn allow_list(&self) -> &[VerificationAllowListEntry] {
        &self.allow_list
    }

    pub fn verifier_settings(&self) -> &SignedPackageVerifierSettings {
        &self.settings
    }
}

fn signer_entries(signer: &TrustedSignerConfig) -> SigningResult<Vec<VerificationAllowListEntry>> {
    let (target, placement, certificates, owners) = match signer {
        TrustedSignerConfig::Author { certificates, .. } => (
            VerificationTarget::AUTHOR,
            SignaturePlacement::PRIMARY_SIGNATURE,
            certificates,
            None,
        ),
        TrustedSignerConfig::Repository {
            certificates,
            owners,
            ..
        } => (
            VerificationTarget::REPOSITORY,
            SignaturePlacement::ANY,
            certificates,
            owners.clone(),
        ),
    };

    certificates
        .iter()
        .map(|cert| {
            let trusted = trusted_certificate(cert)?;
            TrustedSignerAllowListEntry::new(target, placement, trusted, owners.clone())
                .map(VerificationAllowListEntry::TrustedSigner)
        })
        .collect()
}

fn trusted_certificate(cert: &CertificateConfig) -> SigningResult<TrustedCertificate> {
    TrustedCertificate::new(&cert.fingerprint, cert.hash_algorithm, cert.allow_untrusted_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithmName;
    use crate::revocation::RevocationMode;

    fn cert(fp: &str) -> CertificateConfig {
        CertificateConfig {
            fingerprint: fp.to_string(),
            hash_algorithm: HashAlgorithmName::Sha256,
            allow_untrusted_root: false,
        }
    }

    fn config(mode: SignatureValidationMode) -> TrustPolicyConfig {
        TrustPolicyConfig {
            signature_validation_mode: mode,
            trusted_signers: vec![
                TrustedSignerConfig::Author {
                    name: "contoso".into(),
                    certificates: vec![cert(&"AA".repeat(32)), cert(&"BB".repeat(32))],
                },
                TrustedSignerConfig::Repository {
                    name: "nuget.org".into(),
                    service_index: "https://api.nuget.org/v3/index.json".into(),
                    certificates: vec![cert(&"CC".repeat(32))],
                    owners: Some(vec!["microsoft".into()]),
                },
            ],
        }
    }

    #[test]
    fn test_require_mode() {
        let env = ClientEnvironment::new(false, RevocationMode::Offline);
        let ctx =
            ClientPolicyContext::get_client_policy(&config(SignatureValidationMode::Require), &env)
                .unwrap();

        assert_eq!(ctx.policy(), SignatureValidationMode::Require);
        assert_eq!(ctx.allow_list().len(), 3);
        let settings = ctx.verifier_settings();
        assert!(!settings.allow_unsigned());
        assert!(!settings.allow_no_client_certificate_list());
        assert_eq!(settings.client_allow_list().len(), 3);
        assert_eq!(settings.revocation_mode(), RevocationMode::Offline);

        let repo = &ctx.allow_list()[2];
        assert_eq!(repo.target(), VerificationTarget::REPOSITORY);
        assert_eq!(repo.placement(), SignaturePlacement::ANY);
        assert_eq!(repo.owners(), Some(&["microsoft".to_string()][..]));
    }

    #[test]
    fn test_accept_mode() {
        let env = ClientEnvironment::default();
        let ctx =
            ClientPolicyContext::get_client_policy(&config(SignatureValidationMode::Accept), &env)
                .unwrap();
        assert!(ctx.verifier_settings().allow_unsigned());
        assert!(ctx.verifier_settings().allow_no_client_certificate_list());
    }

    #[test]
    fn test_bad_fingerprint_rejected() {
        let mut bad = config(SignatureValidationMode::Accept);
        bad.trusted_signers.push(TrustedSignerConfig::Author {
            name: "broken".into(),
            certificates: vec![cert("not-hex")],
        });
        let env = ClientEnvironment::default();
        let err = ClientPolicyContext::get_client_policy(&bad, &env).unwrap_err();
        assert!(err.is_contract_violation());
    }
}
