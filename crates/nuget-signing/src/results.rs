//! Verification result types.
//!
//! Each provider produces one [`PackageVerificationResult`] per signature.
//! The aggregating verifier folds them into a [`VerifySignaturesResult`].

use std::fmt;

use chrono::{DateTime, Utc};

use crate::log_code::NuGetLogCode;
use crate::signature::SignatureType;

/// Trust tier, ordered from least to most trusted.
///
/// Multiple verdicts combine by taking the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureVerificationStatus {
    /// Nothing was evaluated.
    Unknown,
    /// Invalid or tampered.
    Suspect,
    /// Valid but not permitted by policy.
    Disallowed,
    /// Valid and trusted.
    Valid,
}

impl SignatureVerificationStatus {
    /// Combine two verdicts.
    pub fn combine(self, other: Self) -> Self {
        self.min(other)
    }
}

impl fmt::Display for SignatureVerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Suspect => "Suspect",
            Self::Disallowed => "Disallowed",
            Self::Valid => "Valid",
        };
        f.write_str(name)
    }
}

/// Severity of a [`SignatureLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Information,
    Warning,
    Error,
}

/// One diagnostic produced during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureLog {
    pub level: LogLevel,
    pub code: NuGetLogCode,
    pub message: String,
}

impl SignatureLog {
    pub fn error(code: NuGetLogCode, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            code,
            message: message.into(),
        }
    }

    pub fn warning(code: NuGetLogCode, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warning,
            code,
            message: message.into(),
        }
    }

    pub fn information(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Information,
            code: NuGetLogCode::Undefined,
            message: message.into(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Debug,
            code: NuGetLogCode::Undefined,
            message: message.into(),
        }
    }

    /// Error when `fatal`, warning otherwise.
    pub fn issue(fatal: bool, code: NuGetLogCode, message: impl Into<String>) -> Self {
        if fatal {
            Self::error(code, message)
        } else {
            Self::warning(code, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

impl fmt::Display for SignatureLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            NuGetLogCode::Undefined => f.write_str(&self.message),
            code => write!(f, "{code}: {}", self.message),
        }
    }
}

/// Output of one provider for one signature.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageVerificationResult {
    /// Verdict about a signature.
    Signed {
        trust: SignatureVerificationStatus,
        signature_type: SignatureType,
        issues: Vec<SignatureLog>,
    },
    /// Verdict about a package without signatures.
    Unsigned {
        trust: SignatureVerificationStatus,
        issues: Vec<SignatureLog>,
    },
    /// Verdict about a signature's timestamps.
    Timestamped {
        trust: SignatureVerificationStatus,
        generalized_time: Option<DateTime<Utc>>,
        issues: Vec<SignatureLog>,
    },
}

impl PackageVerificationResult {
    pub fn signed(
        trust: SignatureVerificationStatus,
        signature_type: SignatureType,
        issues: Vec<SignatureLog>,
    ) -> Self {
        Self::Signed {
            trust,
            signature_type,
            issues,
        }
    }

    pub fn unsigned(trust: SignatureVerificationStatus, issues: Vec<SignatureLog>) -> Self {
        Self::Unsigned { trust, issues }
    }

    pub fn timestamped(
        trust: SignatureVerificationStatus,
        generalized_time: Option<DateTime<Utc>>,
        issues: Vec<SignatureLog>,
    ) -> Self {
        Self::Timestamped {
            trust,
            generalized_time,
            issues,
        }
    }

    pub fn trust(&self) -> SignatureVerificationStatus {
        match self {
            Self::Signed { trust, .. }
            | Self::Unsigned { trust, .. }
            | Self::Timestamped { trust, .. } => *trust,
        }
    }

    pub fn issues(&self) -> &[SignatureLog] {
        match self {
            Self::Signed { issues, .. }
            | Self::Unsigned { issues, .. }
            | Self::Timestamped { issues, .. } => issues,
        }
    }

    /// Error-level issues only.
    pub fn errors(&self) -> impl Iterator<Item = &SignatureLog> {
        self.issues().iter().filter(|issue| issue.is_error())
    }
}

/// Final verdict for a package.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifySignaturesResult {
    valid: bool,
    signed: bool,
    results: Vec<PackageVerificationResult>,
}

impl VerifySignaturesResult {
    pub fn new(valid: bool, signed: bool, results: Vec<PackageVerificationResult>) -> Self {
        Self {
            valid,
            signed,
            results,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn results(&self) -> &[PackageVerificationResult] {
        &self.results
    }

    /// All issues across results, in result order.
    pub fn issues(&self) -> impl Iterator<Item = &SignatureLog> {
        self.results.iter().flat_map(|r| r.issues().iter())
    }

    pub fn has_issue_code(&self, code: NuGetLogCode) -> bool {
        self.issues().any(|issue| issue.code == code)
    }
}
