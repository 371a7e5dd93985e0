//! ASN.1 structures used by package signatures, on top of `der`.
//!
//! CMS `SignedData` itself comes from the `cms` crate. This module adds the
//! RFC 3161 `TSTInfo`, the ESS signing-certificate attributes, the
//! commitment-type indication and the NuGet repository attributes.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use der::asn1::{Any, Ia5String, Int, ObjectIdentifier, OctetString};
use der::{
    DecodeOwned, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Sequence,
    Tag, Writer,
};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::ext::Extensions;

pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
pub const ID_CT_TST_INFO: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
pub const ID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
pub const ID_COUNTERSIGNATURE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.6");
pub const ID_SIGNING_CERTIFICATE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.12");
pub const ID_TIMESTAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
pub const ID_COMMITMENT_TYPE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.16");
pub const ID_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");

/// Commitment type of author signatures.
pub const ID_PROOF_OF_ORIGIN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.6.1");
/// Commitment type of repository signatures.
pub const ID_PROOF_OF_RECEIPT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.6.3");

pub const ID_NUGET_V3_SERVICE_INDEX_URL: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.84.2.1.1.1");
pub const ID_NUGET_PACKAGE_OWNERS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.84.2.1.1.2");

pub const ID_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// `GeneralizedTime` that keeps fractional seconds.
///
/// Timestamping authorities commonly emit `YYYYMMDDHHMMSS.fffZ`, which
/// `der::asn1::GeneralizedTime` rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenTime(pub DateTime<Utc>);

impl GenTime {
    fn to_text(self) -> String {
        let fraction = self.0.format("%.f").to_string();
        let fraction = fraction.trim_end_matches('0');
        let fraction = if fraction == "." { "" } else { fraction };
        format!("{}{}Z", self.0.format("%Y%m%d%H%M%S"), fraction)
    }
}

impl FixedTag for GenTime {
    const TAG: Tag = Tag::GeneralizedTime;
}

impl<'a> DecodeValue<'a> for GenTime {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        let bytes = reader.read_vec(header.length)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| Self::TAG.value_error())?;
        let naive = text
            .strip_suffix('Z')
            .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y%m%d%H%M%S%.f").ok())
            .ok_or_else(|| Self::TAG.value_error())?;
        Ok(Self(naive.and_utc()))
    }
}

impl EncodeValue for GenTime {
    fn value_len(&self) -> der::Result<Length> {
        Length::try_from(self.to_text().len())
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        writer.write(self.to_text().as_bytes())
    }
}

/// `MessageImprint` of a timestamp request and token.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub hashed_message: OctetString,
}

/// Declared accuracy of a timestamp.
#[derive(Clone, Debug, Default, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    pub seconds: Option<u64>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

impl Accuracy {
    pub fn to_duration(&self) -> Duration {
        let seconds = i64::try_from(self.seconds.unwrap_or(0)).unwrap_or(i64::MAX);
        Duration::try_seconds(seconds)
            .unwrap_or(Duration::MAX)
            .checked_add(&Duration::milliseconds(i64::from(self.millis.unwrap_or(0))))
            .and_then(|d| {
                d.checked_add(&Duration::microseconds(i64::from(self.micros.unwrap_or(0))))
            })
            .unwrap_or(Duration::MAX)
    }

    /// Millis and micros must each lie in `1..=999`.
    pub fn is_well_formed(&self) -> bool {
        let in_range = |v: Option<u16>| v.map_or(true, |v| (1..=999).contains(&v));
        in_range(self.millis) && in_range(self.micros)
    }
}

/// RFC 3161 `TSTInfo`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    pub version: u64,
    pub policy: ObjectIdentifier,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: GenTime,
    pub accuracy: Option<Accuracy>,
    #[asn1(default = "Default::default")]
    pub ordering: bool,
    pub nonce: Option<Int>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<Any>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

/// `ESSCertIDv2`; an absent hash algorithm means SHA-256.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertIdV2 {
    pub hash_algorithm: Option<AlgorithmIdentifierOwned>,
    pub cert_hash: OctetString,
    pub issuer_serial: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificateV2 {
    pub certs: Vec<EssCertIdV2>,
    pub policies: Option<Any>,
}

/// `ESSCertID`, always SHA-1.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertId {
    pub cert_hash: OctetString,
    pub issuer_serial: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificate {
    pub certs: Vec<EssCertId>,
    pub policies: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CommitmentTypeIndication {
    pub commitment_type_id: ObjectIdentifier,
    pub qualifiers: Option<Any>,
}

/// NuGet `v3ServiceIndexUrl` attribute value.
pub type ServiceIndexUrl = Ia5String;

/// NuGet `packageOwners` attribute value.
pub type PackageOwners = Vec<String>;

/// Re-decode an `ANY` as a concrete type.
pub fn decode_any<T: DecodeOwned>(any: &Any) -> der::Result<T> {
    T::from_der(&any.to_der()?)
}

/// Values of every attribute with `oid`.
pub fn attribute_values<'a>(
    attributes: impl IntoIterator<Item = &'a Attribute>,
    oid: ObjectIdentifier,
) -> impl Iterator<Item = &'a Any> {
    attributes
        .into_iter()
        .filter(move |a| a.oid == oid)
        .flat_map(|a| a.values.iter())
}

/// The single value of the single attribute with `oid`.
///
/// `Ok(None)` when absent; an error when the attribute repeats, carries
/// more than one value or does not decode as `T`.
pub fn single_attribute<'a, T: DecodeOwned>(
    attributes: impl IntoIterator<Item = &'a Attribute>,
    oid: ObjectIdentifier,
) -> der::Result<Option<T>> {
    let mut values = attribute_values(attributes, oid);
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(der::ErrorKind::SetDuplicate.into());
    }
    decode_any(first).map(Some)
}
