//! Trust policy file and process configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SigningError, SigningResult};
use crate::hash::HashAlgorithmName;
use crate::revocation::RevocationMode;

/// Environment variable naming the trust policy file.
pub const POLICY_PATH_ENV: &str = "NUGET_SIGNING_POLICY";

/// Environment variable enabling test mode.
pub const TEST_MODE_ENV: &str = "NUGET_TEST_MODE_ENABLED";

/// Environment variable selecting the revocation mode.
pub const REVOCATION_MODE_ENV: &str = "NUGET_CERT_REVOCATION_MODE";

/// Process-wide client configuration.
///
/// Read once at startup and passed explicitly to the components that need
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientEnvironment {
    test_mode: bool,
    revocation_mode: RevocationMode,
}

impl ClientEnvironment {
    pub fn new(test_mode: bool, revocation_mode: RevocationMode) -> Self {
        Self {
            test_mode,
            revocation_mode,
        }
    }

    /// Read the environment.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `NUGET_TEST_MODE_ENABLED` | `true` or `1` enables test mode |
    /// | `NUGET_CERT_REVOCATION_MODE` | `online`, `offline` or `nocheck` |
    ///
    /// An unparseable revocation mode falls back to online with a warning.
    pub fn from_env() -> Self {
        let test_mode = std::env::var(TEST_MODE_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let revocation_mode = match std::env::var(REVOCATION_MODE_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|e: SigningError| {
                tracing::warn!(value = %value, error = %e, "ignoring revocation mode override");
                RevocationMode::default()
            }),
            Err(_) => RevocationMode::default(),
        };

        Self {
            test_mode,
            revocation_mode,
        }
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn revocation_mode(&self) -> RevocationMode {
        self.revocation_mode
    }
}

/// How strictly package signatures are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureValidationMode {
    #[default]
    Accept,
    Require,
}

/// Trust policy file.
///
/// ```yaml
/// signatureValidationMode: require
/// trustedSigners:
///   - kind: author
///     name: contoso
///     certificates:
///       - fingerprint: 3F9001EA83C560D712C24CF213C3D312CB3BFF51EE89435D3430BD06B5D0EECE
///         hashAlgorithm: SHA256
///   - kind: repository
///     name: nuget.org
///     serviceIndex: https://api.nuget.org/v3/index.json
///     owners: [microsoft]
///     certificates:
///       - fingerprint: 0E5F38F57DC1BCC806D8494F4F90FBCEDD988B46760709CBEEC6F4219AA6157D
///         allowUntrustedRoot: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicyConfig {
    #[serde(default)]
    pub signature_validation_mode: SignatureValidationMode,

    #[serde(default)]
    pub trusted_signers: Vec<TrustedSignerConfig>,
}

/// One trusted signer in the policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TrustedSignerConfig {
    #[serde(rename_all = "camelCase")]
    Author {
        name: String,
        certificates: Vec<CertificateConfig>,
    },
    #[serde(rename_all = "camelCase")]
    Repository {
        name: String,
        service_index: String,
        certificates: Vec<CertificateConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owners: Option<Vec<String>>,
    },
}

/// A trusted certificate in the policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    pub fingerprint: String,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithmName,

    #[serde(default)]
    pub allow_untrusted_root: bool,
}

impl TrustPolicyConfig {
    pub fn from_yaml(yaml: &str) -> SigningResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> SigningResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub async fn load(path: &Path) -> SigningResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SigningError::Config {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
        let config = Self::from_yaml(&text)?;
        tracing::debug!(
            path = %path.display(),
            mode = ?config.signature_validation_mode,
            signers = config.trusted_signers.len(),
            "loaded trust policy"
        );
        Ok(config)
    }

    /// Resolve the policy file: `explicit`, then `NUGET_SIGNING_POLICY`,
    /// then `<config dir>/NuGet/trust-policy.yaml`.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(POLICY_PATH_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| dir.join("NuGet").join("trust-policy.yaml"))
    }

    /// Load the located policy. A missing default file yields the default
    /// policy; a missing explicit or env-selected file is an error.
    pub async fn load_default(explicit: Option<&Path>) -> SigningResult<Self> {
        let from_user = explicit.is_some()
            || std::env::var(POLICY_PATH_ENV).is_ok_and(|p| !p.is_empty());
        let Some(path) = Self::locate(explicit) else {
            return Ok(Self::default());
        };
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Self::load(&path).await,
            _ if from_user => Err(SigningError::Config {
                message: format!("trust policy not found: {}", path.display()),
            }),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        let yaml = r#"
signatureValidationMode: require
trustedSigners:
  - kind: author
    name: contoso
    certificates:
      - fingerprint: AABB
        hashAlgorithm: SHA384
  - kind: repository
    name: nuget.org
    serviceIndex: https://api.nuget.org/v3/index.json
    owners: [microsoft]
    certificates:
      - fingerprint: CCDD
        allowUntrustedRoot: true
"#;
        let config = TrustPolicyConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.signature_validation_mode, SignatureValidationMode::Require);
        assert_eq!(config.trusted_signers.len(), 2);

        match &config.trusted_signers[0] {
            TrustedSignerConfig::Author { certificates, .. } => {
                assert_eq!(certificates[0].hash_algorithm, HashAlgorithmName::Sha384);
                assert!(!certificates[0].allow_untrusted_root);
            }
            other => panic!("unexpected signer: {other:?}"),
        }
        match &config.trusted_signers[1] {
            TrustedSignerConfig::Repository {
                owners,
                certificates,
                ..
            } => {
                assert_eq!(owners.as_deref(), Some(&["microsoft".to_string()][..]));
                assert_eq!(certificates[0].hash_algorithm, HashAlgorithmName::Sha256);
                assert!(certificates[0].allow_untrusted_root);
            }
            other => panic!("unexpected signer: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_and_round_trip() {
        let config = TrustPolicyConfig::from_yaml("{}").unwrap();
        assert_eq!(config.signature_validation_mode, SignatureValidationMode::Accept);
        assert!(config.trusted_signers.is_empty());

        let yaml = config.to_yaml().unwrap();
        assert_eq!(TrustPolicyConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_bad_yaml() {
        let err = TrustPolicyConfig::from_yaml("signatureValidationMode: sometimes").unwrap_err();
        assert!(matches!(err, SigningError::Config { .. }));
    }

    #[tokio::test]
    async fn test_load_explicit_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(TrustPolicyConfig::load_default(Some(&missing)).await.is_err());

        let present = dir.path().join("policy.yaml");
        tokio::fs::write(&present, "signatureValidationMode: require\n")
            .await
            .unwrap();
        let config = TrustPolicyConfig::load_default(Some(&present)).await.unwrap();
        assert_eq!(config.signature_validation_mode, SignatureValidationMode::Require);
    }

    #[tokio::test]
    async fn test_load_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrustPolicyConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, SigningError::Config { .. }));
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_explicit_environment() {
        let env = ClientEnvironment::new(true, RevocationMode::NoCheck);
        assert!(env.test_mode());
        assert_eq!(env.revocation_mode(), RevocationMode::NoCheck);
        assert_eq!(ClientEnvironment::default().revocation_mode(), RevocationMode::Online);
    }
}
