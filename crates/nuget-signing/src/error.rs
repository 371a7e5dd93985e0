//! Error types for signature verification.
//!
//! Trust decisions are never errors: they are reported as
//! [`PackageVerificationResult`](crate::results::PackageVerificationResult)
//! values. The variants here cover contract violations raised at construction
//! time, malformed input that providers convert into results, and conditions
//! the verifier refuses to decide on (unsupported algorithms, cancellation).

/// Signing errors.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// Invalid argument or invalid combination of arguments.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// The runtime recognizes the input but cannot verify it.
    #[error("not supported: {reason}")]
    NotSupported { reason: String },

    /// Verification was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A certificate could not be parsed.
    #[error("malformed certificate: {reason}")]
    MalformedCertificate { reason: String },

    /// A timestamp token could not be decoded.
    #[error("malformed timestamp: {reason}")]
    MalformedTimestamp { reason: String },

    /// The signature container or its content could not be decoded.
    #[error("malformed signature: {reason}")]
    MalformedSignature { reason: String },

    /// The package content hash does not match the signed hash.
    #[error("package integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Hash algorithm is not in the allow-list.
    #[error("unsupported hash algorithm: {algorithm}")]
    UnsupportedHashAlgorithm { algorithm: String },

    /// Signature bytes did not verify against the public key.
    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    /// Trust policy configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O error while reading package or configuration data.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SigningError {
    /// Whether the error is a contract violation raised at construction time.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Whether the error stems from unreadable input.
    ///
    /// Providers recover these into `Suspect` results instead of aborting
    /// the verification pass.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedCertificate { .. }
                | Self::MalformedTimestamp { .. }
                | Self::MalformedSignature { .. }
                | Self::UnsupportedHashAlgorithm { .. }
                | Self::SignatureInvalid { .. }
        )
    }

    /// Whether the error must propagate out of a provider unchanged.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotSupported { .. } | Self::Cancelled)
    }
}

impl From<serde_yaml::Error> for SigningError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

impl From<der::Error> for SigningError {
    fn from(err: der::Error) -> Self {
        Self::MalformedSignature {
            reason: format!("DER decode failed: {err}"),
        }
    }
}

/// Result type for signing operations.
pub type SigningResult<T> = Result<T, SigningError>;

pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> SigningError {
    SigningError::InvalidArgument {
        name,
        reason: reason.into(),
    }
}

pub(crate) fn malformed_certificate(reason: impl Into<String>) -> SigningError {
    SigningError::MalformedCertificate {
        reason: reason.into(),
    }
}

pub(crate) fn malformed_timestamp(reason: impl Into<String>) -> SigningError {
    SigningError::MalformedTimestamp {
        reason: reason.into(),
    }
}

pub(crate) fn malformed_signature(reason: impl Into<String>) -> SigningError {
    SigningError::MalformedSignature {
        reason: reason.into(),
    }
}

pub(crate) fn not_supported(reason: impl Into<String>) -> SigningError {
    SigningError::NotSupported {
        reason: reason.into(),
    }
}
