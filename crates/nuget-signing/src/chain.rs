//! Certificate chain building and the cascading chain-trust fallback.
//!
//! The trust store holds trust anchors shared across verifications. The
//! chain builder walks issuer links from a leaf to an anchor (or to a
//! self-issued root that is not an anchor), then checks validity periods and
//! revocation. [`evaluate_chain_trust`] runs the builder through
//! [`CHAIN_TRUST_FALLBACK`] and turns the first acceptable attempt into a
//! trust verdict plus issues.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::certificate::{chain_to_string, X509Cert};
use crate::error::{SigningError, SigningResult};
use crate::hash::HashAlgorithmName;
use crate::log_code::NuGetLogCode;
use crate::results::{SignatureLog, SignatureVerificationStatus};
use crate::revocation::{NoRevocationData, RevocationMode, RevocationSource, RevocationStatus};

/// Maximum number of certificates in a chain.
pub const MAX_CHAIN_DEPTH: usize = 16;

/// Trust store of certificate trust anchors.
#[derive(Debug, Clone)]
pub struct TrustStore {
    inner: Arc<RwLock<TrustStoreInner>>,
}

#[derive(Debug, Default)]
struct TrustStoreInner {
    /// SHA-256 fingerprint -> anchor
    anchors: HashMap<String, TrustAnchor>,
}

/// A trusted root or intermediate.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub certificate: X509Cert,
    pub metadata: AnchorMetadata,
}

/// Metadata for a trust anchor.
#[derive(Debug, Clone, Default)]
pub struct AnchorMetadata {
    /// Human-readable description.
    pub description: Option<String>,

    /// When the anchor was added.
    pub added_at: Option<DateTime<Utc>>,
}

impl TrustStore {
    /// Create an empty trust store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrustStoreInner::default())),
        }
    }

    /// Create a trust store from a list of anchors.
    pub async fn with_anchors(anchors: impl IntoIterator<Item = X509Cert>) -> Self {
        let store = Self::new();
        for anchor in anchors {
            store.add_anchor(anchor, None).await;
        }
        store
    }

    /// Create a trust store from the operating system roots.
    #[cfg(feature = "system-roots")]
    pub async fn with_system_roots() -> SigningResult<Self> {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "failed to load some system roots");
        }

        let store = Self::new();
        for der in loaded.certs {
            // Unparseable system roots are skipped.
            if let Ok(cert) = X509Cert::from_der(der.as_ref()) {
                store.add_anchor(cert, Some("system root".to_string())).await;
            }
        }
        Ok(store)
    }

    /// Create a trust store from the operating system roots.
    #[cfg(not(feature = "system-roots"))]
    pub async fn with_system_roots() -> SigningResult<Self> {
        Err(crate::error::not_supported(
            "system certificate store access requires the `system-roots` feature",
        ))
    }

    /// Add a trust anchor. Returns its SHA-256 fingerprint.
    pub async fn add_anchor(&self, certificate: X509Cert, description: Option<String>) -> String {
        let fingerprint = certificate.fingerprint(HashAlgorithmName::Sha256);
        tracing::debug!(
            fingerprint = %fingerprint,
            subject = %certificate.subject(),
            "added trust anchor"
        );

        let mut inner = self.inner.write().await;
        inner.anchors.insert(
            fingerprint.clone(),
            TrustAnchor {
                certificate,
                metadata: AnchorMetadata {
                    description,
                    added_at: Some(Utc::now()),
                },
            },
        );
        fingerprint
    }

    /// Add every certificate of a PEM bundle. Returns how many were added.
    pub async fn add_pem_bundle(&self, pem: &[u8]) -> SigningResult<usize> {
        let certs = X509Cert::from_pem_bundle(pem)?;
        let count = certs.len();
        for cert in certs {
            self.add_anchor(cert, None).await;
        }
        Ok(count)
    }

    /// Remove an anchor by SHA-256 fingerprint.
    pub async fn remove_anchor(&self, fingerprint: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .anchors
            .remove(&fingerprint.to_ascii_uppercase())
            .is_some();
        if removed {
            tracing::warn!(fingerprint = %fingerprint, "removed trust anchor");
        }
        removed
    }

    /// Check whether a certificate is a trust anchor.
    pub async fn is_trusted(&self, certificate: &X509Cert) -> bool {
        let inner = self.inner.read().await;
        inner
            .anchors
            .contains_key(&certificate.fingerprint(HashAlgorithmName::Sha256))
    }

    /// Snapshot of the anchor certificates.
    pub async fn anchors(&self) -> Vec<X509Cert> {
        let inner = self.inner.read().await;
        inner
            .anchors
            .values()
            .map(|anchor| anchor.certificate.clone())
            .collect()
    }

    /// List anchors with their metadata.
    pub async fn list_anchors(&self) -> Vec<(String, AnchorMetadata)> {
        let inner = self.inner.read().await;
        inner
            .anchors
            .iter()
            .map(|(fp, anchor)| (fp.clone(), anchor.metadata.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.anchors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.anchors.is_empty()
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Problems found while building a chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChainStatusFlags(u16);

impl ChainStatusFlags {
    pub const NO_ERROR: Self = Self(0);
    pub const UNTRUSTED_ROOT: Self = Self(1 << 0);
    pub const PARTIAL_CHAIN: Self = Self(1 << 1);
    pub const NOT_TIME_VALID: Self = Self(1 << 2);
    pub const NOT_SIGNATURE_VALID: Self = Self(1 << 3);
    pub const REVOKED: Self = Self(1 << 4);
    pub const REVOCATION_STATUS_UNKNOWN: Self = Self(1 << 5);
    pub const OFFLINE_REVOCATION: Self = Self(1 << 6);
    pub const CYCLIC: Self = Self(1 << 7);
    /// An issuer in the chain is not allowed to sign certificates.
    pub const INVALID_BASIC_CONSTRAINTS: Self = Self(1 << 8);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::UNTRUSTED_ROOT, "UntrustedRoot"),
        (Self::PARTIAL_CHAIN, "PartialChain"),
        (Self::NOT_TIME_VALID, "NotTimeValid"),
        (Self::NOT_SIGNATURE_VALID, "NotSignatureValid"),
        (Self::REVOKED, "Revoked"),
        (Self::REVOCATION_STATUS_UNKNOWN, "RevocationStatusUnknown"),
        (Self::OFFLINE_REVOCATION, "OfflineRevocation"),
        (Self::CYCLIC, "Cyclic"),
        (Self::INVALID_BASIC_CONSTRAINTS, "InvalidBasicConstraints"),
    ];

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChainStatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ChainStatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NoError");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

/// Result of one chain build.
#[derive(Debug, Clone)]
pub struct ChainBuildResult {
    /// Leaf first.
    pub chain: Vec<X509Cert>,
    pub status: ChainStatusFlags,
    /// The chain ends at a trust anchor.
    pub anchored: bool,
}

/// Builds chains against a trust store and revocation source.
#[derive(Clone)]
pub struct ChainBuilder {
    trust_store: TrustStore,
    revocation: Arc<dyn RevocationSource>,
}

impl fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("trust_store", &self.trust_store)
            .finish_non_exhaustive()
    }
}

impl ChainBuilder {
    pub fn new(trust_store: TrustStore, revocation: Arc<dyn RevocationSource>) -> Self {
        Self {
            trust_store,
            revocation,
        }
    }

    /// Builder with no revocation data; online and offline checks report
    /// unknown status.
    pub fn without_revocation(trust_store: TrustStore) -> Self {
        Self::new(trust_store, Arc::new(NoRevocationData))
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    /// Whether both builders read the same trust store and revocation source.
    pub fn shares_state_with(&self, other: &ChainBuilder) -> bool {
        Arc::ptr_eq(&self.trust_store.inner, &other.trust_store.inner)
            && std::ptr::addr_eq(Arc::as_ptr(&self.revocation), Arc::as_ptr(&other.revocation))
    }

    /// Build and validate a chain for `leaf`.
    ///
    /// `extra` holds intermediates shipped with the signature; they are
    /// preferred over anchors when both match an issuer name.
    pub async fn build(
        &self,
        leaf: &X509Cert,
        extra: &[X509Cert],
        verification_time: DateTime<Utc>,
        revocation_mode: RevocationMode,
        token: &CancellationToken,
    ) -> SigningResult<ChainBuildResult> {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }

        let anchors = self.trust_store.anchors().await;
        let mut chain = vec![leaf.clone()];
        let mut status = ChainStatusFlags::NO_ERROR;
        let mut anchored = false;

        loop {
            let Some(current) = chain.last() else {
                break;
            };

            if anchors.contains(current) {
                anchored = true;
                break;
            }

            if current.subject_raw() == current.issuer_raw() {
                if signed_by(current, current)? {
                    status.insert(ChainStatusFlags::UNTRUSTED_ROOT);
                } else {
                    status.insert(ChainStatusFlags::NOT_SIGNATURE_VALID);
                }
                break;
            }

            if chain.len() >= MAX_CHAIN_DEPTH {
                status.insert(ChainStatusFlags::PARTIAL_CHAIN);
                break;
            }

            let mut name_matched = false;
            let mut next = None;
            for candidate in extra.iter().chain(anchors.iter()) {
                if candidate.subject_raw() != current.issuer_raw() {
                    continue;
                }
                name_matched = true;
                if chain.contains(candidate) {
                    status.insert(ChainStatusFlags::CYCLIC);
                    continue;
                }
                if signed_by(current, candidate)? {
                    next = Some(candidate.clone());
                    break;
                }
            }

            match next {
                Some(issuer) => {
                    if !issuer.can_issue_certificates() {
                        tracing::debug!(
                            subject = %issuer.subject(),
                            "issuer is not a certificate authority"
                        );
                        status.insert(ChainStatusFlags::INVALID_BASIC_CONSTRAINTS);
                    }
                    chain.push(issuer);
                }
                None => {
                    if name_matched && !status.contains(ChainStatusFlags::CYCLIC) {
                        status.insert(ChainStatusFlags::NOT_SIGNATURE_VALID);
                    } else {
                        status.insert(ChainStatusFlags::PARTIAL_CHAIN);
                    }
                    break;
                }
            }
        }

        if chain
            .iter()
            .any(|cert| !cert.is_date_inside_validity(verification_time))
        {
            status.insert(ChainStatusFlags::NOT_TIME_VALID);
        }

        if revocation_mode != RevocationMode::NoCheck {
            for pair in chain.windows(2) {
                if token.is_cancelled() {
                    return Err(SigningError::Cancelled);
                }
                let (cert, issuer) = (&pair[0], &pair[1]);
                match self
                    .revocation
                    .check(cert, issuer, revocation_mode, token)
                    .await?
                {
                    RevocationStatus::Good => {}
                    RevocationStatus::Revoked { .. } => status.insert(ChainStatusFlags::REVOKED),
                    RevocationStatus::Unknown => {
                        status.insert(ChainStatusFlags::REVOCATION_STATUS_UNKNOWN);
                        if revocation_mode == RevocationMode::Offline {
                            status.insert(ChainStatusFlags::OFFLINE_REVOCATION);
                        }
                    }
                }
            }
            // A chain that stops short of a root cannot prove the last
            // element is unrevoked.
            if status.contains(ChainStatusFlags::PARTIAL_CHAIN) {
                status.insert(ChainStatusFlags::REVOCATION_STATUS_UNKNOWN);
            }
        }

        tracing::debug!(
            subject = %leaf.subject(),
            depth = chain.len(),
            anchored,
            status = ?status,
            mode = %revocation_mode,
            "built certificate chain"
        );

        Ok(ChainBuildResult {
            chain,
            status,
            anchored,
        })
    }
}

fn signed_by(cert: &X509Cert, issuer: &X509Cert) -> SigningResult<bool> {
    match cert.is_signed_by(issuer) {
        Ok(verified) => Ok(verified),
        Err(e) if e.is_fatal() => Err(e),
        Err(_) => Ok(false),
    }
}

/// Revocation behavior of one fallback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptRevocation {
    /// The configured mode; unknown revocation status fails the attempt.
    Configured,
    /// Offline; unknown revocation status is tolerated.
    Offline,
    /// No revocation check.
    NoCheck,
}

/// A degraded-trust condition reported by an accepted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDegradation {
    /// The chain does not end at a trust anchor.
    UntrustedRoot,
    /// Revocation was only checked against offline data.
    RevocationOffline,
    /// Revocation was not checked; the certificate may be revoked.
    RevocationUnchecked,
}

/// One row of the fallback table.
#[derive(Debug, Clone, Copy)]
pub struct ChainAttempt {
    pub allow_untrusted_root: bool,
    pub revocation: AttemptRevocation,
    pub degradations: &'static [ChainDegradation],
}

impl ChainAttempt {
    fn revocation_mode(&self, configured: RevocationMode) -> RevocationMode {
        match self.revocation {
            AttemptRevocation::Configured => configured,
            AttemptRevocation::Offline => RevocationMode::Offline,
            AttemptRevocation::NoCheck => RevocationMode::NoCheck,
        }
    }

    /// Whether a build result satisfies this attempt.
    pub fn accepts(&self, status: ChainStatusFlags) -> bool {
        let hard = ChainStatusFlags::REVOKED
            | ChainStatusFlags::NOT_SIGNATURE_VALID
            | ChainStatusFlags::NOT_TIME_VALID
            | ChainStatusFlags::CYCLIC
            | ChainStatusFlags::INVALID_BASIC_CONSTRAINTS;
        if status.intersects(hard) {
            return false;
        }

        let untrusted = ChainStatusFlags::UNTRUSTED_ROOT | ChainStatusFlags::PARTIAL_CHAIN;
        if status.intersects(untrusted) && !self.allow_untrusted_root {
            return false;
        }

        let unknown =
            ChainStatusFlags::REVOCATION_STATUS_UNKNOWN | ChainStatusFlags::OFFLINE_REVOCATION;
        !(status.intersects(unknown) && self.revocation == AttemptRevocation::Configured)
    }
}

/// Chain validation attempts, strictest first.
pub const CHAIN_TRUST_FALLBACK: [ChainAttempt; 5] = [
    ChainAttempt {
        allow_untrusted_root: false,
        revocation: AttemptRevocation::Configured,
        degradations: &[],
    },
    ChainAttempt {
        allow_untrusted_root: false,
        revocation: AttemptRevocation::Offline,
        degradations: &[ChainDegradation::RevocationOffline],
    },
    ChainAttempt {
        allow_untrusted_root: true,
        revocation: AttemptRevocation::Configured,
        degradations: &[ChainDegradation::UntrustedRoot],
    },
    ChainAttempt {
        allow_untrusted_root: true,
        revocation: AttemptRevocation::Offline,
        degradations: &[
            ChainDegradation::UntrustedRoot,
            ChainDegradation::RevocationOffline,
        ],
    },
    ChainAttempt {
        allow_untrusted_root: true,
        revocation: AttemptRevocation::NoCheck,
        degradations: &[
            ChainDegradation::UntrustedRoot,
            ChainDegradation::RevocationUnchecked,
        ],
    },
];

/// Which signature a chain belongs to; selects codes and wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainContext {
    PrimarySignature,
    RepositoryCountersignature,
    Timestamp,
}

impl ChainContext {
    pub fn chain_building_code(&self) -> NuGetLogCode {
        match self {
            Self::PrimarySignature => NuGetLogCode::NU3018,
            Self::RepositoryCountersignature => NuGetLogCode::NU3035,
            Self::Timestamp => NuGetLogCode::NU3028,
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::PrimarySignature => "primary signature",
            Self::RepositoryCountersignature => "repository countersignature",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Policy inputs of a chain trust evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ChainTrustOptions {
    pub verification_time: DateTime<Utc>,
    pub revocation_mode: RevocationMode,
    pub allow_untrusted_root: bool,
    pub allow_unknown_revocation: bool,
    pub report_unknown_revocation: bool,
}

/// Verdict of a chain trust evaluation.
#[derive(Debug, Clone)]
pub struct ChainTrustOutcome {
    pub status: SignatureVerificationStatus,
    pub issues: Vec<SignatureLog>,
    pub chain: Vec<X509Cert>,
    /// Index into [`CHAIN_TRUST_FALLBACK`] of the accepted attempt.
    pub attempt: Option<usize>,
}

const UNTRUSTED_ROOT_MESSAGE: &str = "A certificate chain processed, but terminated in a root \
    certificate which is not trusted by the trust provider.";
const PARTIAL_CHAIN_MESSAGE: &str =
    "A certificate chain could not be built to a trusted root authority.";
const REVOCATION_OFFLINE_MESSAGE: &str = "The revocation function was unable to check \
    revocation because the revocation server could not be reached.";
const REVOCATION_UNCHECKED_MESSAGE: &str =
    "The revocation status of the certificate was not checked and it may be revoked.";
const NOT_TIME_VALID_MESSAGE: &str = "A required certificate is not within its validity period \
    when verifying against the current system clock or the timestamp in the signed file.";
const NOT_SIGNATURE_VALID_MESSAGE: &str =
    "The signature of a certificate in the chain is not valid.";
const CYCLIC_MESSAGE: &str = "The certificate chain contains a cycle.";
const INVALID_BASIC_CONSTRAINTS_MESSAGE: &str =
    "A certificate was used as a certificate authority but is not allowed to issue certificates.";

/// Validate a signer's chain through the fallback table.
pub async fn evaluate_chain_trust(
    builder: &ChainBuilder,
    leaf: &X509Cert,
    extra: &[X509Cert],
    options: ChainTrustOptions,
    context: ChainContext,
    token: &CancellationToken,
) -> SigningResult<ChainTrustOutcome> {
    let code = context.chain_building_code();
    let mut last: Option<ChainBuildResult> = None;

    for (index, attempt) in CHAIN_TRUST_FALLBACK.iter().enumerate() {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }

        let built = builder
            .build(
                leaf,
                extra,
                options.verification_time,
                attempt.revocation_mode(options.revocation_mode),
                token,
            )
            .await?;

        if built.status.contains(ChainStatusFlags::REVOKED) {
            tracing::warn!(
                subject = %leaf.subject(),
                context = context.subject(),
                "certificate revoked"
            );
            return Ok(ChainTrustOutcome {
                status: SignatureVerificationStatus::Suspect,
                issues: vec![SignatureLog::error(
                    NuGetLogCode::NU3012,
                    format!("The {}'s signing certificate has been revoked.", context.subject()),
                )],
                chain: built.chain,
                attempt: None,
            });
        }

        if attempt.accepts(built.status) {
            tracing::debug!(
                attempt = index,
                context = context.subject(),
                "chain trust attempt accepted"
            );
            let (status, issues) = degradation_issues(attempt, &built, &options, code);
            return Ok(ChainTrustOutcome {
                status,
                issues,
                chain: built.chain,
                attempt: Some(index),
            });
        }

        last = Some(built);
    }

    let Some(built) = last else {
        return Ok(ChainTrustOutcome {
            status: SignatureVerificationStatus::Unknown,
            issues: Vec::new(),
            chain: Vec::new(),
            attempt: None,
        });
    };

    let mut issues = Vec::new();
    if built.status.contains(ChainStatusFlags::NOT_SIGNATURE_VALID) {
        issues.push(SignatureLog::error(code, NOT_SIGNATURE_VALID_MESSAGE));
    }
    if built.status.contains(ChainStatusFlags::CYCLIC) {
        issues.push(SignatureLog::error(code, CYCLIC_MESSAGE));
    }
    if built.status.contains(ChainStatusFlags::INVALID_BASIC_CONSTRAINTS) {
        issues.push(SignatureLog::error(code, INVALID_BASIC_CONSTRAINTS_MESSAGE));
    }
    if built.status.contains(ChainStatusFlags::NOT_TIME_VALID) {
        issues.push(SignatureLog::error(code, NOT_TIME_VALID_MESSAGE));
    }
    if issues.is_empty() {
        issues.push(SignatureLog::error(code, PARTIAL_CHAIN_MESSAGE));
    }
    if built.chain.len() > 1 {
        issues.push(SignatureLog::debug(format!(
            "Certificate chain of the {}:\n{}",
            context.subject(),
            chain_to_string(&built.chain, HashAlgorithmName::Sha256)
        )));
    }

    tracing::warn!(
        subject = %leaf.subject(),
        context = context.subject(),
        status = ?built.status,
        "chain trust failed on every attempt"
    );

    Ok(ChainTrustOutcome {
        status: SignatureVerificationStatus::Suspect,
        issues,
        chain: built.chain,
        attempt: None,
    })
}

fn degradation_issues(
    attempt: &ChainAttempt,
    built: &ChainBuildResult,
    options: &ChainTrustOptions,
    code: NuGetLogCode,
) -> (SignatureVerificationStatus, Vec<SignatureLog>) {
    let mut status = SignatureVerificationStatus::Valid;
    let mut issues = Vec::new();

    for degradation in attempt.degradations {
        match degradation {
            ChainDegradation::UntrustedRoot => {
                let message = if built.status.contains(ChainStatusFlags::PARTIAL_CHAIN) {
                    PARTIAL_CHAIN_MESSAGE
                } else {
                    UNTRUSTED_ROOT_MESSAGE
                };
                issues.push(SignatureLog::issue(
                    !options.allow_untrusted_root,
                    code,
                    message,
                ));
                if !options.allow_untrusted_root {
                    status = status.combine(SignatureVerificationStatus::Disallowed);
                }
            }
            ChainDegradation::RevocationOffline | ChainDegradation::RevocationUnchecked => {
                let message = if *degradation == ChainDegradation::RevocationOffline {
                    REVOCATION_OFFLINE_MESSAGE
                } else {
                    REVOCATION_UNCHECKED_MESSAGE
                };
                if !options.allow_unknown_revocation {
                    issues.push(SignatureLog::error(code, message));
                    status = status.combine(SignatureVerificationStatus::Disallowed);
                } else if options.report_unknown_revocation {
                    issues.push(SignatureLog::warning(code, message));
                } else {
                    issues.push(SignatureLog::information(message));
                }
            }
        }
    }

    (status, issues)
}
