//! RFC 3161 timestamp tokens and timestamp validation.
//!
//! A [`TimestampToken`] is a CMS `SignedData` whose encapsulated content is
//! the DER `TSTInfo`, signed by a timestamping authority (TSA). Validation
//! checks that the token attests to the signature value it is attached to,
//! that the TSA certificate may issue timestamps, and that the TSA chain is
//! trusted at the asserted time.

use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};
use der::asn1::OctetString;
use der::Decode;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::asn1::{decode_any, Accuracy, TstInfo, ID_CT_TST_INFO};
use crate::certificate::{is_public_key_valid, X509Cert, OID_TIME_STAMPING_EKU};
use crate::chain::{evaluate_chain_trust, ChainBuilder, ChainContext, ChainTrustOptions};
use crate::error::{malformed_timestamp, SigningError, SigningResult};
use crate::hash::HashAlgorithmName;
use crate::log_code::NuGetLogCode;
use crate::results::{SignatureLog, SignatureVerificationStatus};
use crate::settings::SignedPackageVerifierSettings;
use crate::signature::{
    container_certificates, decode_signed_data, SignerInfo, SigningCertificateRequirement,
};

const NOT_TIMESTAMPED_MESSAGE: &str = "The signature should be timestamped to enable long-term \
    signature validity after the certificate has expired.";

/// Signed timestamp token as found in a signer's unsigned attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    der: Vec<u8>,
}

/// The parts of a decoded token.
struct DecodedToken {
    tst_info: TstInfo,
    encoded_tst_info: Vec<u8>,
    signer: SignerInfo,
}

impl TimestampToken {
    /// Wrap a DER `ContentInfo`; decoding happens on validation.
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    fn decode_parts(&self) -> SigningResult<DecodedToken> {
        decode_token(&self.der).map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                malformed_timestamp(e.to_string())
            }
        })
    }

    /// Decode the token into a [`Timestamp`].
    pub fn decode(&self) -> SigningResult<Timestamp> {
        let decoded = self.decode_parts()?;
        let Some(signer_certificate) = decoded.signer.certificate()? else {
            return Err(malformed_timestamp("token has no signer certificate"));
        };
        Ok(Timestamp {
            tst_info: decoded.tst_info,
            signer_certificate,
            certificates: decoded.signer.additional_certificates()?,
        })
    }
}

fn decode_token(der: &[u8]) -> SigningResult<DecodedToken> {
    let (_, signed_data) = decode_signed_data(der)?;
    let encap = &signed_data.encap_content_info;
    if encap.econtent_type != ID_CT_TST_INFO {
        return Err(malformed_timestamp(format!(
            "unexpected token content type {}",
            encap.econtent_type
        )));
    }
    let Some(econtent) = &encap.econtent else {
        return Err(malformed_timestamp("token has no TSTInfo"));
    };
    let encoded_tst_info = decode_any::<OctetString>(econtent)?.into_bytes();
    let tst_info = TstInfo::from_der(&encoded_tst_info)?;
    if tst_info.version != 1 {
        return Err(malformed_timestamp(format!(
            "unsupported TSTInfo version {}",
            tst_info.version
        )));
    }

    let certificates = container_certificates(&signed_data);
    let [info] = signed_data.signer_infos.0.as_slice() else {
        return Err(malformed_timestamp("token must have exactly one signer"));
    };
    let signer = SignerInfo::decode(info, &certificates)?;

    Ok(DecodedToken {
        tst_info,
        encoded_tst_info,
        signer,
    })
}

/// A decoded timestamp.
#[derive(Debug, Clone)]
pub struct Timestamp {
    tst_info: TstInfo,
    signer_certificate: X509Cert,
    certificates: Vec<X509Cert>,
}

impl Timestamp {
    /// Asserted signing time.
    pub fn generalized_time(&self) -> DateTime<Utc> {
        self.tst_info.gen_time.0
    }

    pub fn tst_info(&self) -> &TstInfo {
        &self.tst_info
    }

    /// Timestamping authority certificate.
    pub fn signer_certificate(&self) -> &X509Cert {
        &self.signer_certificate
    }

    pub fn certificates(&self) -> &[X509Cert] {
        &self.certificates
    }

    pub fn hash_algorithm(&self) -> Option<HashAlgorithmName> {
        let oid = self.tst_info.message_imprint.hash_algorithm.oid.to_string();
        HashAlgorithmName::from_oid(&oid)
    }

    /// Latest time the token may have been produced.
    pub fn upper_limit(&self) -> DateTime<Utc> {
        self.generalized_time()
            .checked_add_signed(self.accuracy())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Earliest time the token may have been produced.
    pub fn lower_limit(&self) -> DateTime<Utc> {
        self.generalized_time()
            .checked_sub_signed(self.accuracy())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn accuracy(&self) -> Duration {
        self.tst_info
            .accuracy
            .as_ref()
            .map_or_else(Duration::zero, Accuracy::to_duration)
    }

    /// Whether the whole accuracy window lies inside the validity period of
    /// `certificate`.
    pub fn covers_validity_of(&self, certificate: &X509Cert) -> bool {
        self.lower_limit() >= certificate.not_before()
            && self.upper_limit() <= certificate.not_after()
    }
}

/// Outcome of evaluating all timestamps of one signer.
#[derive(Debug, Clone)]
pub struct TimestampEvaluation {
    pub status: SignatureVerificationStatus,
    pub issues: Vec<SignatureLog>,
    /// Earliest valid timestamp.
    pub timestamp: Option<Timestamp>,
}

/// Timestamp evaluation of one primary signer, shared by the providers
/// verifying the same signature.
///
/// The first caller evaluates; later callers with a builder over the same
/// trust store and revocation source reuse the result.
#[derive(Debug, Default)]
pub struct TimestampCache {
    primary: OnceCell<(ChainBuilder, TimestampEvaluation)>,
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluation of `signer`'s timestamps.
    pub async fn primary(
        &self,
        signer: &SignerInfo,
        settings: &SignedPackageVerifierSettings,
        builder: &ChainBuilder,
        token: &CancellationToken,
    ) -> SigningResult<Cow<'_, TimestampEvaluation>> {
        let (cached_builder, evaluation) = self
            .primary
            .get_or_try_init(|| async {
                let evaluation = evaluate_timestamps(signer, settings, builder, token).await?;
                Ok::<_, SigningError>((builder.clone(), evaluation))
            })
            .await?;

        if cached_builder.shares_state_with(builder) {
            return Ok(Cow::Borrowed(evaluation));
        }
        tracing::debug!("timestamp cache bypassed for a different chain builder");
        evaluate_timestamps(signer, settings, builder, token)
            .await
            .map(Cow::Owned)
    }
}

struct TokenVerdict {
    status: SignatureVerificationStatus,
    issues: Vec<SignatureLog>,
    timestamp: Option<Timestamp>,
}

impl TokenVerdict {
    fn failed(code: NuGetLogCode, message: impl Into<String>) -> Self {
        Self {
            status: SignatureVerificationStatus::Suspect,
            issues: vec![SignatureLog::error(code, message)],
            timestamp: None,
        }
    }

    fn malformed(err: SigningError) -> Self {
        let mut verdict = Self::failed(NuGetLogCode::NU3029, "The timestamp signature is invalid.");
        verdict.issues.push(SignatureLog::debug(err.to_string()));
        verdict
    }
}

/// Evaluate every timestamp attached to `signer`.
pub async fn evaluate_timestamps(
    signer: &SignerInfo,
    settings: &SignedPackageVerifierSettings,
    builder: &ChainBuilder,
    token: &CancellationToken,
) -> SigningResult<TimestampEvaluation> {
    let tokens = signer.timestamps();

    if tokens.is_empty() {
        if settings.allow_no_timestamp() {
            return Ok(TimestampEvaluation {
                status: SignatureVerificationStatus::Valid,
                issues: Vec::new(),
                timestamp: None,
            });
        }
        return Ok(TimestampEvaluation {
            status: SignatureVerificationStatus::Suspect,
            issues: vec![SignatureLog::error(
                NuGetLogCode::NU3027,
                NOT_TIMESTAMPED_MESSAGE,
            )],
            timestamp: None,
        });
    }

    if tokens.len() > 1 && !settings.allow_multiple_timestamps() {
        return Ok(TimestampEvaluation {
            status: SignatureVerificationStatus::Suspect,
            issues: vec![SignatureLog::error(
                NuGetLogCode::NU3000,
                "The signature must have exactly one timestamp.",
            )],
            timestamp: None,
        });
    }

    let mut status = SignatureVerificationStatus::Valid;
    let mut issues = Vec::new();
    let mut earliest: Option<Timestamp> = None;

    for timestamp_token in tokens {
        let verdict =
            verify_token(timestamp_token, signer.signature_value(), settings, builder, token)
                .await?;

        if verdict.status == SignatureVerificationStatus::Valid {
            issues.extend(verdict.issues);
            if let Some(ts) = verdict.timestamp {
                let replace = earliest
                    .as_ref()
                    .map_or(true, |e| ts.generalized_time() < e.generalized_time());
                if replace {
                    earliest = Some(ts);
                }
            }
        } else if settings.allow_ignore_timestamp() {
            issues.extend(verdict.issues.into_iter().map(downgrade));
        } else {
            status = status.combine(verdict.status);
            issues.extend(verdict.issues);
        }
    }

    if earliest.is_none()
        && status == SignatureVerificationStatus::Valid
        && !settings.allow_no_timestamp()
    {
        status = SignatureVerificationStatus::Suspect;
        issues.push(SignatureLog::error(
            NuGetLogCode::NU3027,
            NOT_TIMESTAMPED_MESSAGE,
        ));
    }

    tracing::debug!(
        tokens = tokens.len(),
        status = %status,
        generalized_time = ?earliest.as_ref().map(Timestamp::generalized_time),
        "evaluated timestamps"
    );

    Ok(TimestampEvaluation {
        status,
        issues,
        timestamp: earliest,
    })
}

fn downgrade(issue: SignatureLog) -> SignatureLog {
    if issue.is_error() {
        SignatureLog::warning(issue.code, issue.message)
    } else {
        issue
    }
}

async fn verify_token(
    timestamp_token: &TimestampToken,
    signature_value: &[u8],
    settings: &SignedPackageVerifierSettings,
    builder: &ChainBuilder,
    token: &CancellationToken,
) -> SigningResult<TokenVerdict> {
    let decoded = match timestamp_token.decode_parts() {
        Ok(decoded) => decoded,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(TokenVerdict::malformed(e)),
    };
    let signer = &decoded.signer;

    let (tsa, certificates) = match (signer.certificate(), signer.additional_certificates()) {
        (Ok(Some(tsa)), Ok(certificates)) => (tsa, certificates),
        (Ok(None), _) => {
            return Ok(TokenVerdict::failed(
                NuGetLogCode::NU3020,
                "The timestamp's signature does not have a signing certificate.",
            ))
        }
        (Err(e), _) | (_, Err(e)) => return Ok(TokenVerdict::malformed(e)),
    };
    let timestamp = Timestamp {
        tst_info: decoded.tst_info,
        signer_certificate: tsa,
        certificates,
    };

    if !timestamp
        .tst_info
        .accuracy
        .as_ref()
        .map_or(true, Accuracy::is_well_formed)
    {
        return Ok(TokenVerdict::malformed(malformed_timestamp(
            "accuracy component out of range",
        )));
    }

    let Some(imprint_algorithm) = timestamp.hash_algorithm() else {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3024,
            "The timestamp signature has an unsupported digest algorithm.",
        ));
    };
    if imprint_algorithm.digest(signature_value)
        != timestamp.tst_info.message_imprint.hashed_message.as_bytes()
    {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3019,
            "The timestamp integrity check failed.",
        ));
    }

    let tsa = timestamp.signer_certificate();
    if signer.algorithm()?.is_none() {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3022,
            "The timestamp signature algorithm is not supported.",
        ));
    }
    match signer.verify(tsa, &decoded.encoded_tst_info) {
        Ok(true) => {}
        Err(e) if e.is_fatal() => return Err(e),
        Ok(false) | Err(_) => {
            return Ok(TokenVerdict::failed(
                NuGetLogCode::NU3021,
                "The timestamp signature validation failed.",
            ))
        }
    }
    if !signer.signing_certificate_matches(tsa, SigningCertificateRequirement::AnyVersion) {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3021,
            "The timestamp's signing certificate attribute does not match its certificate.",
        ));
    }

    if !tsa.has_extended_key_usage(OID_TIME_STAMPING_EKU) {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3021,
            "The timestamp signing certificate is not valid for time stamping.",
        ));
    }
    if !is_public_key_valid(tsa) {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3023,
            "The timestamp's certificate does not meet a minimum public key length requirement.",
        ));
    }
    if tsa.is_validity_period_in_future(Utc::now()) {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3025,
            "The timestamp signing certificate is not yet valid.",
        ));
    }
    if !tsa.is_date_inside_validity(timestamp.generalized_time()) {
        return Ok(TokenVerdict::failed(
            NuGetLogCode::NU3036,
            "The timestamp's generalized time is outside the timestamping certificate's \
             validity period.",
        ));
    }

    if token.is_cancelled() {
        return Err(SigningError::Cancelled);
    }
    let outcome = evaluate_chain_trust(
        builder,
        tsa,
        timestamp.certificates(),
        ChainTrustOptions {
            verification_time: timestamp.generalized_time(),
            revocation_mode: settings.revocation_mode(),
            allow_untrusted_root: settings.allow_untrusted(),
            allow_unknown_revocation: settings.allow_unknown_revocation(),
            report_unknown_revocation: settings.report_unknown_revocation(),
        },
        ChainContext::Timestamp,
        token,
    )
    .await?;

    let valid = outcome.status == SignatureVerificationStatus::Valid;
    Ok(TokenVerdict {
        status: outcome.status,
        issues: outcome.issues,
        timestamp: valid.then_some(timestamp),
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::asn1::{GenTime, MessageImprint, ID_SIGNED_DATA};
    use crate::chain::TrustStore;
    use crate::config::ClientEnvironment;
    use crate::results::LogLevel;
    use crate::revocation::RevocationMode;
    use cms::cert::IssuerAndSerialNumber;
    use cms::content_info::{CmsVersion, ContentInfo};
    use cms::signed_data::{
        EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo as CmsSignerInfo,
        SignerInfos,
    };
    use der::asn1::{Any, Int, ObjectIdentifier};
    use der::{Encode, Header, Length, Tag};
    use spki::AlgorithmIdentifierOwned;
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;

    const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    const ID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

    fn algorithm(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid,
            parameters: None,
        }
    }

    fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
        let body = parts.concat();
        let mut der = Header::new(Tag::Sequence, Length::try_from(body.len()).unwrap())
            .unwrap()
            .to_der()
            .unwrap();
        der.extend(body);
        der
    }

    fn tst_info(signature_value: &[u8]) -> TstInfo {
        TstInfo {
            version: 1,
            policy: ObjectIdentifier::new_unwrap("1.2.3.4"),
            message_imprint: MessageImprint {
                hash_algorithm: algorithm(ID_SHA256),
                hashed_message: OctetString::new(HashAlgorithmName::Sha256.digest(signature_value))
                    .unwrap(),
            },
            serial_number: Int::new(&[42]).unwrap(),
            gen_time: GenTime(Utc::now()),
            accuracy: None,
            ordering: false,
            nonce: None,
            tsa: None,
            extensions: None,
        }
    }

    /// Token around `encoded_tst_info` whose signer carries no certificate
    /// and a placeholder signature.
    fn unsigned_token(encoded_tst_info: Vec<u8>) -> TimestampToken {
        let signer = CmsSignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: Name::from_str("CN=Test TSA").unwrap(),
                serial_number: SerialNumber::new(&[1]).unwrap(),
            }),
            digest_alg: algorithm(ID_SHA256),
            signed_attrs: None,
            signature_algorithm: algorithm(ID_ECDSA_SHA256),
            signature: OctetString::new(vec![0]).unwrap(),
            unsigned_attrs: None,
        };
        let signed_data = SignedData {
            version: CmsVersion::V3,
            digest_algorithms: vec![algorithm(ID_SHA256)].try_into().unwrap(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_CT_TST_INFO,
                econtent: Some(
                    Any::encode_from(&OctetString::new(encoded_tst_info).unwrap()).unwrap(),
                ),
            },
            certificates: None,
            crls: None,
            signer_infos: SignerInfos(vec![signer].try_into().unwrap()),
        };
        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        };
        TimestampToken::from_der(content_info.to_der().unwrap())
    }

    fn settings(allow_no_timestamp: bool) -> SignedPackageVerifierSettings {
        let env = ClientEnvironment::new(false, RevocationMode::NoCheck);
        SignedPackageVerifierSettings::default_policy(&env)
            .to_builder()
            .allow_no_timestamp(allow_no_timestamp)
            .allow_ignore_timestamp(false)
            .build()
            .unwrap()
    }

    fn builder() -> ChainBuilder {
        ChainBuilder::without_revocation(TrustStore::new())
    }

    async fn evaluate(
        signer: &SignerInfo,
        settings: &SignedPackageVerifierSettings,
    ) -> TimestampEvaluation {
        evaluate_timestamps(signer, settings, &builder(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_decode_token_parts() {
        let info = tst_info(&[1]);
        let token = unsigned_token(info.to_der().unwrap());

        let decoded = token.decode_parts().unwrap();
        assert_eq!(decoded.tst_info, info);
        assert_eq!(decoded.encoded_tst_info, info.to_der().unwrap());
        assert!(decoded.signer.certificate().unwrap().is_none());

        let err = token.decode().unwrap_err();
        assert!(matches!(err, SigningError::MalformedTimestamp { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = TimestampToken::from_der(b"not der".to_vec())
            .decode_parts()
            .err()
            .unwrap();
        assert!(matches!(err, SigningError::MalformedTimestamp { .. }));

        let mut info = tst_info(&[1]);
        info.version = 2;
        let err = unsigned_token(info.to_der().unwrap())
            .decode_parts()
            .err()
            .unwrap();
        assert!(err.to_string().contains("unsupported TSTInfo version 2"));
    }

    #[tokio::test]
    async fn test_no_timestamp_allowed_or_required() {
        let signer = SignerInfo::bare(vec![1], Vec::new());

        let allowed = evaluate(&signer, &settings(true)).await;
        assert_eq!(allowed.status, SignatureVerificationStatus::Valid);
        assert!(allowed.issues.is_empty());

        let required = evaluate(&signer, &settings(false)).await;
        assert_eq!(required.status, SignatureVerificationStatus::Suspect);
        assert_eq!(required.issues[0].code, NuGetLogCode::NU3027);
    }

    #[tokio::test]
    async fn test_missing_tsa_certificate() {
        let token = unsigned_token(tst_info(&[1]).to_der().unwrap());
        let signer = SignerInfo::bare(vec![1], vec![token]);

        let eval = evaluate(&signer, &settings(true)).await;
        assert_eq!(eval.status, SignatureVerificationStatus::Suspect);
        assert_eq!(eval.issues[0].code, NuGetLogCode::NU3020);
        assert!(eval.timestamp.is_none());
    }

    #[tokio::test]
    async fn test_malformed_token_is_recovered() {
        let signer = SignerInfo::bare(vec![1], vec![TimestampToken::from_der(vec![0x30, 0x01])]);

        let eval = evaluate(&signer, &settings(true)).await;
        assert_eq!(eval.status, SignatureVerificationStatus::Suspect);
        assert_eq!(eval.issues[0].code, NuGetLogCode::NU3029);
        assert_eq!(eval.issues[1].level, LogLevel::Debug);
    }

    #[tokio::test]
    async fn test_empty_accuracy_millis_is_malformed() {
        let info = tst_info(&[1]);
        let encoded = sequence(&[
            info.version.to_der().unwrap(),
            info.policy.to_der().unwrap(),
            info.message_imprint.to_der().unwrap(),
            info.serial_number.to_der().unwrap(),
            info.gen_time.to_der().unwrap(),
            // Accuracy { millis [0] with an empty body }
            vec![0x30, 0x02, 0x80, 0x00],
        ]);
        let signer = SignerInfo::bare(vec![1], vec![unsigned_token(encoded)]);

        let eval = evaluate(&signer, &settings(true)).await;
        assert_eq!(eval.status, SignatureVerificationStatus::Suspect);
        assert_eq!(eval.issues[0].code, NuGetLogCode::NU3029);
        assert!(eval.timestamp.is_none());
    }

    #[tokio::test]
    async fn test_ignored_failures_become_warnings() {
        let signer = SignerInfo::bare(vec![1], vec![TimestampToken::from_der(Vec::new())]);
        let settings = settings(true)
            .to_builder()
            .allow_ignore_timestamp(true)
            .build()
            .unwrap();

        let eval = evaluate(&signer, &settings).await;
        assert_eq!(eval.status, SignatureVerificationStatus::Valid);
        assert!(eval.issues.iter().all(|i| !i.is_error()));
    }

    #[tokio::test]
    async fn test_multiple_timestamps_rejected() {
        let token = TimestampToken::from_der(Vec::new());
        let signer = SignerInfo::bare(vec![1], vec![token.clone(), token]);
        let settings = settings(true)
            .to_builder()
            .allow_multiple_timestamps(false)
            .build()
            .unwrap();

        let eval = evaluate(&signer, &settings).await;
        assert_eq!(eval.status, SignatureVerificationStatus::Suspect);
        assert_eq!(eval.issues[0].code, NuGetLogCode::NU3000);
    }

    #[tokio::test]
    async fn test_cache_evaluates_once_per_builder() {
        let signer = SignerInfo::bare(vec![1], vec![TimestampToken::from_der(vec![0x30, 0x01])]);
        let settings = settings(true);
        let shared = builder();
        let token = CancellationToken::new();
        let cache = TimestampCache::new();

        let first = cache.primary(&signer, &settings, &shared, &token).await.unwrap();
        assert!(matches!(first, Cow::Borrowed(_)));
        assert_eq!(first.issues[0].code, NuGetLogCode::NU3029);

        let again = cache
            .primary(&signer, &settings, &shared.clone(), &token)
            .await
            .unwrap();
        assert!(matches!(again, Cow::Borrowed(_)));

        let other = cache.primary(&signer, &settings, &builder(), &token).await.unwrap();
        assert!(matches!(other, Cow::Owned(_)));
        assert_eq!(other.status, first.status);
    }
}
