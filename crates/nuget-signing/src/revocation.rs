//! Revocation modes and revocation status sources.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::certificate::X509Cert;
use crate::error::{invalid_argument, SigningError, SigningResult};
use crate::hash::HashAlgorithmName;

/// How certificate revocation is checked during chain building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevocationMode {
    /// Query revocation services, falling back to cached data.
    #[default]
    Online,
    /// Use cached revocation data only.
    Offline,
    /// Do not check revocation.
    NoCheck,
}

impl fmt::Display for RevocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::NoCheck => write!(f, "nocheck"),
        }
    }
}

impl FromStr for RevocationMode {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "nocheck" | "no-check" | "none" => Ok(Self::NoCheck),
            other => Err(invalid_argument(
                "revocation_mode",
                format!("unknown revocation mode: {other}"),
            )),
        }
    }
}

/// Revocation status of one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked { revoked_at: Option<DateTime<Utc>> },
    Unknown,
}

/// Source of revocation information for chain building.
///
/// Online implementations (OCSP, CRL download) perform network I/O; they
/// must observe `token` before starting a request.
#[async_trait]
pub trait RevocationSource: Send + Sync {
    async fn check(
        &self,
        certificate: &X509Cert,
        issuer: &X509Cert,
        mode: RevocationMode,
        token: &CancellationToken,
    ) -> SigningResult<RevocationStatus>;
}

/// Revoked serial numbers published by one issuer.
#[derive(Debug, Clone)]
pub struct RevocationList {
    pub revoked_serials: HashSet<String>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

impl RevocationList {
    pub fn new(this_update: DateTime<Utc>, next_update: Option<DateTime<Utc>>) -> Self {
        Self {
            revoked_serials: HashSet::new(),
            this_update,
            next_update,
        }
    }

    /// Add a revoked serial (hex, any case).
    pub fn revoke(mut self, serial: &str) -> Self {
        self.revoked_serials.insert(serial.to_ascii_uppercase());
        self
    }

    fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.next_update.map_or(true, |next| now <= next)
    }
}

/// Cached revocation lists keyed by issuer fingerprint.
///
/// Answers the same way in online and offline mode; a missing or stale list
/// yields [`RevocationStatus::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct RevocationCache {
    lists: Arc<RwLock<HashMap<String, RevocationList>>>,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, issuer: &X509Cert, list: RevocationList) {
        let key = issuer.fingerprint(HashAlgorithmName::Sha256);
        tracing::debug!(
            issuer = %issuer.subject(),
            revoked = list.revoked_serials.len(),
            "cached revocation list"
        );
        self.lists.write().await.insert(key, list);
    }

    pub async fn len(&self) -> usize {
        self.lists.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lists.read().await.is_empty()
    }
}

#[async_trait]
impl RevocationSource for RevocationCache {
    async fn check(
        &self,
        certificate: &X509Cert,
        issuer: &X509Cert,
        mode: RevocationMode,
        token: &CancellationToken,
    ) -> SigningResult<RevocationStatus> {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }
        if mode == RevocationMode::NoCheck {
            return Ok(RevocationStatus::Unknown);
        }

        let lists = self.lists.read().await;
        let Some(list) = lists.get(&issuer.fingerprint(HashAlgorithmName::Sha256)) else {
            return Ok(RevocationStatus::Unknown);
        };
        if list.revoked_serials.contains(certificate.serial()) {
            return Ok(RevocationStatus::Revoked {
                revoked_at: Some(list.this_update),
            });
        }
        if !list.is_current(Utc::now()) {
            return Ok(RevocationStatus::Unknown);
        }
        Ok(RevocationStatus::Good)
    }
}

/// A source that never has revocation data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevocationData;

#[async_trait]
impl RevocationSource for NoRevocationData {
    async fn check(
        &self,
        _certificate: &X509Cert,
        _issuer: &X509Cert,
        _mode: RevocationMode,
        token: &CancellationToken,
    ) -> SigningResult<RevocationStatus> {
        if token.is_cancelled() {
            return Err(SigningError::Cancelled);
        }
        Ok(RevocationStatus::Unknown)
    }
}
