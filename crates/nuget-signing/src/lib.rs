//! Package signature verification and trust policy for NuGet packages.
//!
//! This crate decides whether a package's signatures are acceptable under a
//! client trust policy:
//!
//! - CMS `SignedData` container header and content version checks
//! - Package integrity against the signed content hash
//! - Signer certificate validity, signature bytes and chain trust
//! - RFC 3161 timestamp verification
//! - Client and repository allow lists
//! - Trust policy loading from YAML over `tokio::fs`
//!
//! # Quick Start
//!
//! ```no_run
//! use nuget_signing::{
//!     ChainBuilder, ClientEnvironment, InMemorySignedPackage, PackageSignatureVerifier,
//!     SignedPackageVerifierSettings, TrustStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(package: InMemorySignedPackage) -> anyhow::Result<()> {
//! let env = ClientEnvironment::from_env();
//! let builder = ChainBuilder::without_revocation(TrustStore::new());
//! let verifier = PackageSignatureVerifier::with_default_providers(builder, env);
//!
//! let settings = SignedPackageVerifierSettings::require_mode_policy(&env);
//! let result = verifier
//!     .verify_signatures(&package, &settings, &CancellationToken::new())
//!     .await?;
//! for issue in result.issues() {
//!     println!("{issue}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `NUGET_SIGNING_POLICY` | Path to the trust policy YAML file |
//! | `NUGET_CERT_REVOCATION_MODE` | `online` (default) or `offline` |
//! | `NUGET_TEST_MODE_ENABLED` | Marks the client as running in test mode |

pub mod allow_list;
pub mod asn1;
pub mod certificate;
pub mod chain;
pub mod config;
pub mod content;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod log_code;
pub mod package;
pub mod policy;
pub mod providers;
pub mod results;
pub mod revocation;
pub mod settings;
pub mod signature;
pub mod timestamp;
pub mod user_agent;
pub mod verifier;

// Re-export main types
pub use allow_list::{
    AllowListCandidate, CertificateHashAllowListEntry, TrustedAuthorAllowListEntry,
    TrustedCertificate, TrustedRepositoryAllowListEntry, TrustedSignerAllowListEntry,
    TrustedSourceAllowListEntry, VerificationAllowListEntry,
};
pub use certificate::X509Cert;
pub use chain::{ChainBuilder, ChainContext, ChainTrustOptions, TrustStore};
pub use config::{ClientEnvironment, SignatureValidationMode, TrustPolicyConfig};
pub use content::SignatureContent;
pub use error::{SigningError, SigningResult};
pub use hash::HashAlgorithmName;
pub use log_code::NuGetLogCode;
pub use package::{InMemorySignedPackage, SignedPackageReader};
pub use policy::ClientPolicyContext;
pub use providers::VerificationProvider;
pub use results::{
    LogLevel, PackageVerificationResult, SignatureLog, SignatureVerificationStatus,
    VerifySignaturesResult,
};
pub use revocation::{RevocationCache, RevocationList, RevocationMode, RevocationSource};
pub use settings::{
    SignaturePlacement, SignatureVerificationBehavior, SignedPackageVerifierSettings,
    VerificationTarget,
};
pub use signature::{
    PrimarySignature, RepositoryCountersignature, RepositoryMetadata, SignatureType,
    SignedDataHeader, SignerInfo, SigningCertificateRequirement,
};
pub use timestamp::{Timestamp, TimestampCache, TimestampToken};
pub use user_agent::UserAgent;
pub use verifier::PackageSignatureVerifier;
