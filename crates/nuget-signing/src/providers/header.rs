//! Signature container header: content types, signer count and format
//! version.

use crate::content::SIGNING_SPECIFICATIONS_V1;
use crate::error::SigningResult;
use crate::log_code::NuGetLogCode;
use crate::results::{PackageVerificationResult, SignatureLog, SignatureVerificationStatus};
use crate::signature::{PrimarySignature, OID_PKCS7_DATA, OID_PKCS7_SIGNED_DATA};

use super::recover_malformed;

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureHeaderVerificationProvider;

impl SignatureHeaderVerificationProvider {
    pub fn new() -> Self {
        Self
    }

    /// Header failures are always `Suspect`; no policy relaxes them.
    pub fn get_trust_result(
        &self,
        signature: &PrimarySignature,
    ) -> SigningResult<PackageVerificationResult> {
        let signature_type = signature.signature_type();
        let fail = |code: NuGetLogCode, message: String| -> SigningResult<_> {
            Ok(PackageVerificationResult::signed(
                SignatureVerificationStatus::Suspect,
                signature_type,
                vec![SignatureLog::error(code, message)],
            ))
        };

        let header = match signature.header() {
            Ok(header) => header,
            Err(e) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3005,
                    "The package signature is not a valid signed-data container.",
                )
            }
        };

        if header.content_type != OID_PKCS7_SIGNED_DATA {
            return fail(
                NuGetLogCode::NU3005,
                format!(
                    "The package signature has an unexpected content type: {}.",
                    header.content_type
                ),
            );
        }
        if header.econtent_type != OID_PKCS7_DATA {
            return fail(
                NuGetLogCode::NU3005,
                format!(
                    "The package signature has an unexpected encapsulated content type: {}.",
                    header.econtent_type
                ),
            );
        }
        if header.signer_count != 1 {
            return fail(
                NuGetLogCode::NU3009,
                format!(
                    "The package signature file does not contain exactly one primary signature; \
                     found {}.",
                    header.signer_count
                ),
            );
        }

        let content = match signature.signature_content() {
            Ok(content) => content,
            Err(e) => {
                return recover_malformed(
                    e,
                    signature_type,
                    NuGetLogCode::NU3005,
                    "The package signature content is invalid.",
                )
            }
        };
        if content.version() != SIGNING_SPECIFICATIONS_V1 {
            return fail(
                NuGetLogCode::NU3007,
                format!(
                    "The package signature format version is not supported. \
                     Expected {SIGNING_SPECIFICATIONS_V1}, found {}.",
                    content.version()
                ),
            );
        }

        Ok(PackageVerificationResult::signed(
            SignatureVerificationStatus::Valid,
            signature_type,
            Vec::new(),
        ))
    }
}
