//! Diagnostic codes attached to signature issues.

use std::fmt;

/// Diagnostic code carried by every [`SignatureLog`](crate::results::SignatureLog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NuGetLogCode {
    /// Undefined or generic signing diagnostic.
    Undefined,
    /// Generic signing error, also used for multiple timestamps.
    NU3000,
    /// Package is not signed.
    NU3004,
    /// Signature container or content is malformed.
    NU3005,
    /// Signature format version is not supported.
    NU3007,
    /// Package integrity check failed.
    NU3008,
    /// Package does not contain exactly one primary signature.
    NU3009,
    /// Primary signature has no usable signer certificate.
    NU3010,
    /// Primary signature validation failed.
    NU3011,
    /// Certificate is revoked.
    NU3012,
    /// Certificate signature algorithm is not supported.
    NU3013,
    /// Certificate public key does not meet the minimum requirement.
    NU3014,
    /// Certificate carries the lifetime signer EKU.
    NU3015,
    /// Signed content hash algorithm is not supported.
    NU3016,
    /// Certificate is not yet valid.
    NU3017,
    /// Primary signature chain building failed.
    NU3018,
    /// Timestamp message imprint does not match the signature.
    NU3019,
    /// Timestamp has no signer certificate.
    NU3020,
    /// Timestamp signature validation failed.
    NU3021,
    /// Timestamp signer uses an unsupported signature algorithm.
    NU3022,
    /// Timestamp signer public key does not meet the minimum requirement.
    NU3023,
    /// Timestamp message imprint uses an unsupported hash algorithm.
    NU3024,
    /// Timestamp signer certificate is not yet valid.
    NU3025,
    /// Timestamp time is outside the signing certificate validity.
    NU3026,
    /// Signature is not timestamped.
    NU3027,
    /// Timestamp chain building failed.
    NU3028,
    /// Timestamp token is malformed.
    NU3029,
    /// Repository countersignature validation failed.
    NU3031,
    /// Allow-list violation, or countersignature has no usable certificate.
    NU3034,
    /// Repository countersignature chain building failed.
    NU3035,
    /// Timestamp time is outside the timestamping certificate validity.
    NU3036,
    /// Certificate has expired.
    NU3037,
    /// Repository countersignature is required but missing.
    NU3038,
    /// Signature type is not permitted by the verification target.
    NU3040,
}

impl NuGetLogCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::NU3000 => "NU3000",
            Self::NU3004 => "NU3004",
            Self::NU3005 => "NU3005",
            Self::NU3007 => "NU3007",
            Self::NU3008 => "NU3008",
            Self::NU3009 => "NU3009",
            Self::NU3010 => "NU3010",
            Self::NU3011 => "NU3011",
            Self::NU3012 => "NU3012",
            Self::NU3013 => "NU3013",
            Self::NU3014 => "NU3014",
            Self::NU3015 => "NU3015",
            Self::NU3016 => "NU3016",
            Self::NU3017 => "NU3017",
            Self::NU3018 => "NU3018",
            Self::NU3019 => "NU3019",
            Self::NU3020 => "NU3020",
            Self::NU3021 => "NU3021",
            Self::NU3022 => "NU3022",
            Self::NU3023 => "NU3023",
            Self::NU3024 => "NU3024",
            Self::NU3025 => "NU3025",
            Self::NU3026 => "NU3026",
            Self::NU3027 => "NU3027",
            Self::NU3028 => "NU3028",
            Self::NU3029 => "NU3029",
            Self::NU3031 => "NU3031",
            Self::NU3034 => "NU3034",
            Self::NU3035 => "NU3035",
            Self::NU3036 => "NU3036",
            Self::NU3037 => "NU3037",
            Self::NU3038 => "NU3038",
            Self::NU3040 => "NU3040",
        }
    }
}

impl fmt::Display for NuGetLogCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
