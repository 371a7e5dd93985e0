//! Verifier settings: the active trust policy.
//!
//! Settings are immutable once built. The builder enforces the placement and
//! countersignature invariants eagerly, so an invalid combination never
//! reaches a verification pass.

use std::fmt;
use std::ops::BitOr;

use crate::allow_list::VerificationAllowListEntry;
use crate::config::ClientEnvironment;
use crate::error::{invalid_argument, SigningResult};
use crate::revocation::RevocationMode;
use crate::signature::SignatureType;

/// Set of signature types that verification applies to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerificationTarget(u8);

impl VerificationTarget {
    pub const NONE: Self = Self(0);
    pub const UNKNOWN: Self = Self(1);
    pub const AUTHOR: Self = Self(2);
    pub const REPOSITORY: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether signatures of `signature_type` are in the set.
    pub fn includes(&self, signature_type: SignatureType) -> bool {
        self.contains(Self::from(signature_type))
    }
}

impl From<SignatureType> for VerificationTarget {
    fn from(signature_type: SignatureType) -> Self {
        match signature_type {
            SignatureType::Unknown => Self::UNKNOWN,
            SignatureType::Author => Self::AUTHOR,
            SignatureType::Repository => Self::REPOSITORY,
        }
    }
}

impl BitOr for VerificationTarget {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for VerificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::UNKNOWN) {
            names.push("Unknown");
        }
        if self.contains(Self::AUTHOR) {
            names.push("Author");
        }
        if self.contains(Self::REPOSITORY) {
            names.push("Repository");
        }
        if names.is_empty() {
            names.push("None");
        }
        f.write_str(&names.join(" | "))
    }
}

/// Set of signature positions that verification applies to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignaturePlacement(u8);

impl SignaturePlacement {
    pub const NONE: Self = Self(0);
    pub const PRIMARY_SIGNATURE: Self = Self(1);
    pub const COUNTERSIGNATURE: Self = Self(2);
    pub const ANY: Self = Self(1 | 2);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SignaturePlacement {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SignaturePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "None",
            1 => "PrimarySignature",
            2 => "Countersignature",
            _ => "Any",
        };
        f.write_str(name)
    }
}

/// When a repository countersignature is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureVerificationBehavior {
    /// Never verify.
    Never,
    /// Verify when present.
    IfExists,
    /// Verify when present and the primary signature alone is not enough.
    IfExistsAndIsNecessary,
    /// Require and verify.
    Always,
}

/// The active trust policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPackageVerifierSettings {
    allow_unsigned: bool,
    allow_illegal: bool,
    allow_untrusted: bool,
    allow_ignore_timestamp: bool,
    allow_multiple_timestamps: bool,
    allow_no_timestamp: bool,
    allow_unknown_revocation: bool,
    report_unknown_revocation: bool,
    allow_no_client_certificate_list: bool,
    allow_no_repository_certificate_list: bool,
    verification_target: VerificationTarget,
    signature_placement: SignaturePlacement,
    repository_countersignature_verification_behavior: SignatureVerificationBehavior,
    revocation_mode: RevocationMode,
    client_allow_list: Vec<VerificationAllowListEntry>,
    repository_allow_list: Vec<VerificationAllowListEntry>,
}

impl SignedPackageVerifierSettings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder {
            settings: Self::permissive(RevocationMode::Online),
        }
    }

    /// Start a builder from these settings.
    pub fn to_builder(&self) -> SettingsBuilder {
        SettingsBuilder {
            settings: self.clone(),
        }
    }

    fn permissive(revocation_mode: RevocationMode) -> Self {
        Self {
            allow_unsigned: true,
            allow_illegal: true,
            allow_untrusted: true,
            allow_ignore_timestamp: true,
            allow_multiple_timestamps: true,
            allow_no_timestamp: true,
            allow_unknown_revocation: true,
            report_unknown_revocation: false,
            allow_no_client_certificate_list: true,
            allow_no_repository_certificate_list: true,
            verification_target: VerificationTarget::ALL,
            signature_placement: SignaturePlacement::ANY,
            repository_countersignature_verification_behavior:
                SignatureVerificationBehavior::IfExistsAndIsNecessary,
            revocation_mode,
            client_allow_list: Vec::new(),
            repository_allow_list: Vec::new(),
        }
    }

    /// Default policy: everything is allowed.
    pub fn default_policy(env: &ClientEnvironment) -> Self {
        Self::permissive(env.revocation_mode())
    }

    /// Policy for the `accept` signature validation mode.
    pub fn accept_mode_policy(env: &ClientEnvironment) -> Self {
        Self::permissive(env.revocation_mode())
    }

    /// Policy for the `require` signature validation mode.
    ///
    /// Signed, trusted and legal signatures are mandatory; timestamp laxity
    /// is still allowed.
    pub fn require_mode_policy(env: &ClientEnvironment) -> Self {
        Self {
            allow_unsigned: false,
            allow_illegal: false,
            allow_untrusted: false,
            report_unknown_revocation: true,
            ..Self::permissive(env.revocation_mode())
        }
    }

    /// Policy for the verify command: also requires a valid timestamp.
    pub fn verify_command_policy(env: &ClientEnvironment) -> Self {
        Self {
            allow_unsigned: false,
            allow_illegal: false,
            allow_untrusted: false,
            allow_ignore_timestamp: false,
            allow_no_timestamp: false,
            report_unknown_revocation: true,
            repository_countersignature_verification_behavior:
                SignatureVerificationBehavior::IfExists,
            ..Self::permissive(env.revocation_mode())
        }
    }

    fn validate(&self) -> SigningResult<()> {
        if self.verification_target.is_empty() {
            return Err(invalid_argument(
                "verification_target",
                "at least one signature type must be targeted",
            ));
        }
        if self.signature_placement.is_empty() {
            return Err(invalid_argument(
                "signature_placement",
                "at least one signature placement must be selected",
            ));
        }

        let countersignature = self
            .signature_placement
            .contains(SignaturePlacement::COUNTERSIGNATURE);
        if countersignature
            && !self
                .verification_target
                .contains(VerificationTarget::REPOSITORY)
        {
            return Err(invalid_argument(
                "signature_placement",
                "countersignature placement requires the repository verification target",
            ));
        }

        let never = self.repository_countersignature_verification_behavior
            == SignatureVerificationBehavior::Never;
        if never && countersignature {
            return Err(invalid_argument(
                "repository_countersignature_verification_behavior",
                "behavior `Never` conflicts with countersignature placement",
            ));
        }
        if !never && !countersignature {
            return Err(invalid_argument(
                "repository_countersignature_verification_behavior",
                format!(
                    "behavior `{:?}` requires countersignature placement",
                    self.repository_countersignature_verification_behavior
                ),
            ));
        }
        Ok(())
    }

    pub fn allow_unsigned(&self) -> bool {
        self.allow_unsigned
    }

    pub fn allow_illegal(&self) -> bool {
        self.allow_illegal
    }

    pub fn allow_untrusted(&self) -> bool {
        self.allow_untrusted
    }

    pub fn allow_ignore_timestamp(&self) -> bool {
        self.allow_ignore_timestamp
    }

    pub fn allow_multiple_timestamps(&self) -> bool {
        self.allow_multiple_timestamps
    }

    pub fn allow_no_timestamp(&self) -> bool {
        self.allow_no_timestamp
    }

    pub fn allow_unknown_revocation(&self) -> bool {
        self.allow_unknown_revocation
    }

    pub fn report_unknown_revocation(&self) -> bool {
        self.report_unknown_revocation
    }

    pub fn allow_no_client_certificate_list(&self) -> bool {
        self.allow_no_client_certificate_list
    }

    pub fn allow_no_repository_certificate_list(&self) -> bool {
        self.allow_no_repository_certificate_list
    }

    pub fn verification_target(&self) -> VerificationTarget {
        self.verification_target
    }

    pub fn signature_placement(&self) -> SignaturePlacement {
        self.signature_placement
    }

    pub fn repository_countersignature_verification_behavior(
        &self,
    ) -> SignatureVerificationBehavior {
        self.repository_countersignature_verification_behavior
    }

    pub fn revocation_mode(&self) -> RevocationMode {
        self.revocation_mode
    }

    pub fn client_allow_list(&self) -> &[VerificationAllowListEntry] {
        &self.client_allow_list
    }

    pub fn repository_allow_list(&self) -> &[VerificationAllowListEntry] {
        &self.repository_allow_list
    }
}

/// Builder for [`SignedPackageVerifierSettings`].
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: SignedPackageVerifierSettings,
}

impl SettingsBuilder {
    pub fn allow_unsigned(mut self, allow: bool) -> Self {
        self.settings.allow_unsigned = allow;
        self
    }

    pub fn allow_illegal(mut self, allow: bool) -> Self {
        self.settings.allow_illegal = allow;
        self
    }

    pub fn allow_untrusted(mut self, allow: bool) -> Self {
        self.settings.allow_untrusted = allow;
        self
    }

    pub fn allow_ignore_timestamp(mut self, allow: bool) -> Self {
        self.settings.allow_ignore_timestamp = allow;
        self
    }

    pub fn allow_multiple_timestamps(mut self, allow: bool) -> Self {
        self.settings.allow_multiple_timestamps = allow;
        self
    }

    pub fn allow_no_timestamp(mut self, allow: bool) -> Self {
        self.settings.allow_no_timestamp = allow;
        self
    }

    pub fn allow_unknown_revocation(mut self, allow: bool) -> Self {
        self.settings.allow_unknown_revocation = allow;
        self
    }

    pub fn report_unknown_revocation(mut self, report: bool) -> Self {
        self.settings.report_unknown_revocation = report;
        self
    }

    pub fn allow_no_client_certificate_list(mut self, allow: bool) -> Self {
        self.settings.allow_no_client_certificate_list = allow;
        self
    }

    pub fn allow_no_repository_certificate_list(mut self, allow: bool) -> Self {
        self.settings.allow_no_repository_certificate_list = allow;
        self
    }

    pub fn verification_target(mut self, target: VerificationTarget) -> Self {
        self.settings.verification_target = target;
        self
    }

    pub fn signature_placement(mut self, placement: SignaturePlacement) -> Self {
        self.settings.signature_placement = placement;
        self
    }

    pub fn repository_countersignature_verification_behavior(
        mut self,
        behavior: SignatureVerificationBehavior,
    ) -> Self {
        self.settings
            .repository_countersignature_verification_behavior = behavior;
        self
    }

    pub fn revocation_mode(mut self, mode: RevocationMode) -> Self {
        self.settings.revocation_mode = mode;
        self
    }

    pub fn client_allow_list(mut self, entries: Vec<VerificationAllowListEntry>) -> Self {
        self.settings.client_allow_list = entries;
        self
    }

    pub fn repository_allow_list(mut self, entries: Vec<VerificationAllowListEntry>) -> Self {
        self.settings.repository_allow_list = entries;
        self
    }

    /// Validate and freeze the settings.
    pub fn build(self) -> SigningResult<SignedPackageVerifierSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SigningError;

    fn env() -> ClientEnvironment {
        ClientEnvironment::new(false, RevocationMode::Offline)
    }

    #[test]
    fn test_presets_are_valid() {
        let env = env();
        for preset in [
            SignedPackageVerifierSettings::default_policy(&env),
            SignedPackageVerifierSettings::accept_mode_policy(&env),
            SignedPackageVerifierSettings::require_mode_policy(&env),
            SignedPackageVerifierSettings::verify_command_policy(&env),
        ] {
            preset.validate().unwrap();
            assert_eq!(preset.revocation_mode(), RevocationMode::Offline);
            assert_eq!(preset.verification_target(), VerificationTarget::ALL);
            assert_eq!(preset.signature_placement(), SignaturePlacement::ANY);
        }
    }

    #[test]
    fn test_preset_toggles() {
        let env = env();
        let accept = SignedPackageVerifierSettings::accept_mode_policy(&env);
        assert!(accept.allow_unsigned() && accept.allow_untrusted() && accept.allow_illegal());
        assert!(accept.allow_no_timestamp() && accept.allow_multiple_timestamps());

        let require = SignedPackageVerifierSettings::require_mode_policy(&env);
        assert!(!require.allow_unsigned() && !require.allow_untrusted());
        assert!(!require.allow_illegal());
        assert!(require.allow_no_timestamp() && require.allow_ignore_timestamp());
        assert!(require.report_unknown_revocation());

        let verify = SignedPackageVerifierSettings::verify_command_policy(&env);
        assert!(!verify.allow_no_timestamp());
        assert!(!verify.allow_ignore_timestamp());
        assert_eq!(
            verify.repository_countersignature_verification_behavior(),
            SignatureVerificationBehavior::IfExists
        );
    }

    #[test]
    fn test_countersignature_requires_repository_target() {
        let err = SignedPackageVerifierSettings::builder()
            .verification_target(VerificationTarget::AUTHOR)
            .signature_placement(SignaturePlacement::COUNTERSIGNATURE)
            .repository_countersignature_verification_behavior(
                SignatureVerificationBehavior::IfExists,
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SigningError::InvalidArgument {
                name: "signature_placement",
                ..
            }
        ));
    }

    #[test]
    fn test_behavior_consistency() {
        let never_with_counter = SignedPackageVerifierSettings::builder()
            .repository_countersignature_verification_behavior(
                SignatureVerificationBehavior::Never,
            )
            .build();
        assert!(never_with_counter.unwrap_err().is_contract_violation());

        let always_without_counter = SignedPackageVerifierSettings::builder()
            .signature_placement(SignaturePlacement::PRIMARY_SIGNATURE)
            .repository_countersignature_verification_behavior(
                SignatureVerificationBehavior::Always,
            )
            .build();
        assert!(always_without_counter.unwrap_err().is_contract_violation());

        SignedPackageVerifierSettings::builder()
            .verification_target(VerificationTarget::AUTHOR)
            .signature_placement(SignaturePlacement::PRIMARY_SIGNATURE)
            .repository_countersignature_verification_behavior(
                SignatureVerificationBehavior::Never,
            )
            .build()
            .unwrap();
    }

    #[test]
    fn test_repository_countersignature_only() {
        let settings = SignedPackageVerifierSettings::builder()
            .verification_target(VerificationTarget::REPOSITORY)
            .signature_placement(SignaturePlacement::COUNTERSIGNATURE)
            .repository_countersignature_verification_behavior(
                SignatureVerificationBehavior::IfExists,
            )
            .build()
            .unwrap();
        assert!(!settings.verification_target().includes(SignatureType::Author));
    }

    #[test]
    fn test_empty_sets_rejected() {
        assert!(SignedPackageVerifierSettings::builder()
            .verification_target(VerificationTarget::NONE)
            .build()
            .is_err());
    }

    #[test]
    fn test_flag_debug() {
        assert_eq!(
            format!("{:?}", VerificationTarget::AUTHOR | VerificationTarget::REPOSITORY),
            "Author | Repository"
        );
        assert_eq!(format!("{:?}", SignaturePlacement::ANY), "Any");
    }
}
