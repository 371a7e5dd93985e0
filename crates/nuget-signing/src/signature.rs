//! Signature data model.
//!
//! A package signature is a DER CMS `ContentInfo` carrying `SignedData` over
//! the signature content. Its single signer names the signature type through
//! the commitment-type-indication attribute; repository signers also carry
//! the NuGet service index and package owners attributes. A repository
//! countersignature is a CMS countersignature, signed over the primary
//! signature value and stored in the primary signer's unsigned attributes.
//!
//! Loading is lenient: [`PrimarySignature::from_der`] keeps a container that
//! does not decode and reports the failure from its accessors, so each
//! provider can turn it into a verification result. Certificates are kept as
//! DER and parsed on access for the same reason.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo as CmsSignerInfo};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use sha1::{Digest as _, Sha1};
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::Certificate;

use crate::asn1::{
    attribute_values, decode_any, single_attribute, CommitmentTypeIndication, PackageOwners,
    ServiceIndexUrl, SigningCertificate, SigningCertificateV2, ID_COMMITMENT_TYPE,
    ID_COUNTERSIGNATURE, ID_DATA, ID_MESSAGE_DIGEST, ID_NUGET_PACKAGE_OWNERS,
    ID_NUGET_V3_SERVICE_INDEX_URL, ID_PROOF_OF_ORIGIN, ID_PROOF_OF_RECEIPT, ID_SIGNED_DATA,
    ID_SIGNING_CERTIFICATE, ID_SIGNING_CERTIFICATE_V2, ID_SUBJECT_KEY_IDENTIFIER,
    ID_TIMESTAMP_TOKEN,
};
use crate::certificate::X509Cert;
use crate::content::SignatureContent;
use crate::crypto::{verify_with, SignatureAlgorithm};
use crate::error::{malformed_signature, SigningError, SigningResult};
use crate::hash::{HashAlgorithmName, OID_SHA256};
use crate::timestamp::TimestampToken;

/// Content type of a package signature container.
pub const OID_PKCS7_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";

/// Encapsulated content type of the signature content.
pub const OID_PKCS7_DATA: &str = "1.2.840.113549.1.7.1";

/// Who produced a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Unknown,
    Author,
    Repository,
}

impl SignatureType {
    fn from_commitment(commitment: Option<ObjectIdentifier>) -> Self {
        match commitment {
            Some(oid) if oid == ID_PROOF_OF_ORIGIN => Self::Author,
            Some(oid) if oid == ID_PROOF_OF_RECEIPT => Self::Repository,
            _ => Self::Unknown,
        }
    }
}

/// Which ESS signing-certificate attributes a signer must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningCertificateRequirement {
    /// `signing-certificate-v2` only; the SHA-1 `signing-certificate` must be
    /// absent. Author and repository signers.
    V2Only,
    /// Either or both. Timestamp signers.
    AnyVersion,
}

/// One CMS signer: the primary signer, a countersigner or a timestamp
/// authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    certificate: Option<Vec<u8>>,
    certificates: Vec<Vec<u8>>,
    digest_algorithm: String,
    signature_algorithm: String,
    signature_value: Vec<u8>,
    /// DER `SET OF Attribute`, the bytes the signature covers.
    signed_attributes: Option<Vec<u8>>,
    message_digest: Option<Vec<u8>>,
    commitment_type: Option<ObjectIdentifier>,
    /// SHA-1 hashes of the `signing-certificate` attribute.
    signing_certificate: Option<Vec<Vec<u8>>>,
    /// (hash algorithm OID, hash) of the `signing-certificate-v2` attribute.
    signing_certificate_v2: Option<Vec<(String, Vec<u8>)>>,
    timestamps: Vec<TimestampToken>,
}

impl SignerInfo {
    /// Decode a CMS signer against the certificates of its container.
    pub(crate) fn decode(
        info: &CmsSignerInfo,
        certificates: &[Certificate],
    ) -> SigningResult<Self> {
        let mut certificate = None;
        let mut others = Vec::new();
        for cert in certificates {
            let der = cert.to_der()?;
            if certificate.is_none() && identifies(&info.sid, cert)? {
                certificate = Some(der);
            } else {
                others.push(der);
            }
        }

        let signed = info.signed_attrs.as_ref().map_or(&[][..], |a| a.as_slice());
        let unsigned = info.unsigned_attrs.as_ref().map_or(&[][..], |a| a.as_slice());

        let message_digest = single_attribute::<OctetString>(signed, ID_MESSAGE_DIGEST)?
            .map(OctetString::into_bytes);
        let commitment_type =
            single_attribute::<CommitmentTypeIndication>(signed, ID_COMMITMENT_TYPE)?
                .map(|c| c.commitment_type_id);
        let signing_certificate =
            single_attribute::<SigningCertificate>(signed, ID_SIGNING_CERTIFICATE)?.map(|s| {
                s.certs
                    .into_iter()
                    .map(|id| id.cert_hash.into_bytes())
                    .collect()
            });
        let signing_certificate_v2 =
            single_attribute::<SigningCertificateV2>(signed, ID_SIGNING_CERTIFICATE_V2)?.map(|s| {
                s.certs
                    .into_iter()
                    .map(|id| {
                        let algorithm = id
                            .hash_algorithm
                            .map_or_else(|| OID_SHA256.to_string(), |a| a.oid.to_string());
                        (algorithm, id.cert_hash.into_bytes())
                    })
                    .collect()
            });

        let timestamps = attribute_values(unsigned, ID_TIMESTAMP_TOKEN)
            .map(|token| Ok(TimestampToken::from_der(token.to_der()?)))
            .collect::<SigningResult<Vec<_>>>()?;

        Ok(Self {
            certificate,
            certificates: others,
            digest_algorithm: info.digest_alg.oid.to_string(),
            signature_algorithm: info.signature_algorithm.oid.to_string(),
            signature_value: info.signature.as_bytes().to_vec(),
            signed_attributes: info.signed_attrs.as_ref().map(Encode::to_der).transpose()?,
            message_digest,
            commitment_type,
            signing_certificate,
            signing_certificate_v2,
            timestamps,
        })
    }

    /// Parsed signer certificate, `None` when the container does not carry it.
    pub fn certificate(&self) -> SigningResult<Option<X509Cert>> {
        self.certificate
            .as_deref()
            .map(X509Cert::from_der)
            .transpose()
    }

    /// Parsed certificates of the container other than the signer's.
    pub fn additional_certificates(&self) -> SigningResult<Vec<X509Cert>> {
        self.certificates
            .iter()
            .map(|der| X509Cert::from_der(der))
            .collect()
    }

    pub fn digest_algorithm(&self) -> &str {
        &self.digest_algorithm
    }

    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Resolved signature algorithm, `None` when unknown or deprecated.
    pub fn algorithm(&self) -> SigningResult<Option<SignatureAlgorithm>> {
        SignatureAlgorithm::resolve(&self.signature_algorithm, &self.digest_algorithm)
    }

    pub fn signature_value(&self) -> &[u8] {
        &self.signature_value
    }

    pub fn timestamps(&self) -> &[TimestampToken] {
        &self.timestamps
    }

    fn signature_type(&self) -> SignatureType {
        SignatureType::from_commitment(self.commitment_type)
    }

    /// Verify the signature over `content` with `certificate`'s key.
    ///
    /// With signed attributes the message digest must equal the hash of
    /// `content` and the signature covers the attributes; without them the
    /// signature covers `content` directly.
    pub fn verify(&self, certificate: &X509Cert, content: &[u8]) -> SigningResult<bool> {
        let Some(algorithm) = self.algorithm()? else {
            return Err(SigningError::SignatureInvalid {
                reason: format!(
                    "unsupported signature algorithm {} with digest {}",
                    self.signature_algorithm, self.digest_algorithm
                ),
            });
        };

        let Some(attributes) = &self.signed_attributes else {
            return verify_with(certificate.spki_der(), algorithm, content, &self.signature_value);
        };
        let Some(digest) = HashAlgorithmName::from_oid(&self.digest_algorithm) else {
            return Ok(false);
        };
        if self.message_digest.as_deref() != Some(digest.digest(content).as_slice()) {
            return Ok(false);
        }
        verify_with(certificate.spki_der(), algorithm, attributes, &self.signature_value)
    }

    /// Whether the ESS signing-certificate attributes name `certificate`.
    pub fn signing_certificate_matches(
        &self,
        certificate: &X509Cert,
        requirement: SigningCertificateRequirement,
    ) -> bool {
        let v1 = self.signing_certificate.as_ref().map(|hashes| {
            hashes
                .first()
                .is_some_and(|hash| hash.as_slice() == Sha1::digest(certificate.der()).as_slice())
        });
        let v2 = self.signing_certificate_v2.as_ref().map(|ids| {
            ids.first().is_some_and(|(algorithm, hash)| {
                HashAlgorithmName::from_oid(algorithm)
                    .is_some_and(|a| a.digest(certificate.der()) == *hash)
            })
        });

        match requirement {
            SigningCertificateRequirement::V2Only => v1.is_none() && v2 == Some(true),
            SigningCertificateRequirement::AnyVersion => match (v1, v2) {
                (None, None) => false,
                (v1, v2) => v1.unwrap_or(true) && v2.unwrap_or(true),
            },
        }
    }
}

#[cfg(test)]
impl SignerInfo {
    /// Signer with only a signature value and timestamps.
    pub(crate) fn bare(signature_value: Vec<u8>, timestamps: Vec<TimestampToken>) -> Self {
        Self {
            certificate: None,
            certificates: Vec::new(),
            digest_algorithm: OID_SHA256.to_string(),
            signature_algorithm: crate::crypto::OID_ECDSA_SHA256.to_string(),
            signature_value,
            signed_attributes: None,
            message_digest: None,
            commitment_type: None,
            signing_certificate: None,
            signing_certificate_v2: None,
            timestamps,
        }
    }
}

/// Whether `sid` names `cert`.
fn identifies(sid: &SignerIdentifier, cert: &Certificate) -> SigningResult<bool> {
    let tbs = &cert.tbs_certificate;
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(ias) => {
            Ok(ias.issuer == tbs.issuer && ias.serial_number == tbs.serial_number)
        }
        SignerIdentifier::SubjectKeyIdentifier(ski) => {
            let Some(extensions) = &tbs.extensions else {
                return Ok(false);
            };
            for ext in extensions.iter().filter(|e| e.extn_id == ID_SUBJECT_KEY_IDENTIFIER) {
                let own = SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())?;
                if own == *ski {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Repository attributes attached to repository signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub v3_service_index: String,
    /// Package owners declared by the repository.
    pub owners: Option<Vec<String>>,
}

impl RepositoryMetadata {
    pub fn new(v3_service_index: impl Into<String>) -> Self {
        Self {
            v3_service_index: v3_service_index.into(),
            owners: None,
        }
    }

    pub fn with_owners(mut self, owners: Vec<String>) -> Self {
        self.owners = Some(owners);
        self
    }

    /// Read the NuGet attributes of a signer; `None` without a service index.
    fn decode(info: &CmsSignerInfo) -> SigningResult<Option<Self>> {
        let signed = info.signed_attrs.as_ref().map_or(&[][..], |a| a.as_slice());
        let index = single_attribute::<ServiceIndexUrl>(signed, ID_NUGET_V3_SERVICE_INDEX_URL)?;
        let Some(index) = index else {
            return Ok(None);
        };
        let owners = single_attribute::<PackageOwners>(signed, ID_NUGET_PACKAGE_OWNERS)?;
        Ok(Some(Self {
            v3_service_index: index.to_string(),
            owners,
        }))
    }
}

/// Repository countersignature over a primary signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCountersignature {
    signer: SignerInfo,
    metadata: Option<RepositoryMetadata>,
}

impl RepositoryCountersignature {
    pub fn signer(&self) -> &SignerInfo {
        &self.signer
    }

    pub fn metadata(&self) -> Option<&RepositoryMetadata> {
        self.metadata.as_ref()
    }
}

/// Decoded header of the signature container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDataHeader {
    /// `ContentInfo` content type.
    pub content_type: String,
    /// Encapsulated content type of the `SignedData`.
    pub econtent_type: String,
    pub signer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DecodedSignature {
    header: SignedDataHeader,
    content: Option<Vec<u8>>,
    /// Present when the container has exactly one signer.
    signer: Option<SignerInfo>,
    repository_metadata: Option<RepositoryMetadata>,
    countersignature: Option<RepositoryCountersignature>,
}

/// Primary signature of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySignature {
    der: Vec<u8>,
    decoded: Result<DecodedSignature, String>,
}

impl PrimarySignature {
    /// Wrap a signature file, keeping decode failures for the providers.
    pub fn from_der(der: Vec<u8>) -> Self {
        let decoded = decode_signature(&der).map_err(|e| e.to_string());
        if let Err(reason) = &decoded {
            tracing::debug!(%reason, "package signature does not decode");
        }
        Self { der, decoded }
    }

    /// Decode a signature file, failing on a malformed container.
    pub fn load(der: Vec<u8>) -> SigningResult<Self> {
        let signature = Self::from_der(der);
        signature.decoded()?;
        Ok(signature)
    }

    fn decoded(&self) -> SigningResult<&DecodedSignature> {
        self.decoded.as_ref().map_err(|reason| malformed_signature(reason.clone()))
    }

    /// Raw signature file.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `Unknown` when the container does not decode.
    pub fn signature_type(&self) -> SignatureType {
        self.decoded
            .as_ref()
            .ok()
            .and_then(|d| d.signer.as_ref())
            .map_or(SignatureType::Unknown, SignerInfo::signature_type)
    }

    pub fn header(&self) -> SigningResult<SignedDataHeader> {
        Ok(self.decoded()?.header.clone())
    }

    /// The single primary signer.
    pub fn signer(&self) -> SigningResult<&SignerInfo> {
        let decoded = self.decoded()?;
        decoded.signer.as_ref().ok_or_else(|| {
            malformed_signature(format!(
                "expected exactly one primary signer, found {}",
                decoded.header.signer_count
            ))
        })
    }

    pub fn repository_metadata(&self) -> Option<&RepositoryMetadata> {
        self.decoded.as_ref().ok()?.repository_metadata.as_ref()
    }

    pub fn countersignature(&self) -> Option<&RepositoryCountersignature> {
        self.decoded.as_ref().ok()?.countersignature.as_ref()
    }

    /// Bytes covered by the primary signature.
    pub fn content_bytes(&self) -> SigningResult<&[u8]> {
        self.decoded()?
            .content
            .as_deref()
            .ok_or_else(|| malformed_signature("signed data has no encapsulated content"))
    }

    /// Decoded signed content.
    pub fn signature_content(&self) -> SigningResult<SignatureContent> {
        SignatureContent::from_bytes(self.content_bytes()?)
    }

    /// Owners declared by the repository, from the signature itself or its
    /// countersignature.
    pub fn owners(&self) -> Option<&[String]> {
        self.repository_metadata()
            .and_then(|m| m.owners.as_deref())
            .or_else(|| {
                self.countersignature()
                    .and_then(|c| c.metadata())
                    .and_then(|m| m.owners.as_deref())
            })
    }
}

/// Decode a `ContentInfo` holding `SignedData`.
pub(crate) fn decode_signed_data(der: &[u8]) -> SigningResult<(ObjectIdentifier, SignedData)> {
    let content_info = ContentInfo::from_der(der)?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(malformed_signature(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }
    let signed_data = decode_any::<SignedData>(&content_info.content)?;
    Ok((content_info.content_type, signed_data))
}

/// X.509 certificates of a `SignedData`; other certificate formats are skipped.
pub(crate) fn container_certificates(signed_data: &SignedData) -> Vec<Certificate> {
    signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert.clone()),
            _ => None,
        })
        .collect()
}

fn decode_signature(der: &[u8]) -> SigningResult<DecodedSignature> {
    let (content_type, signed_data) = decode_signed_data(der)?;
    let econtent_type = signed_data.encap_content_info.econtent_type;
    let content = match &signed_data.encap_content_info.econtent {
        Some(any) if econtent_type == ID_DATA => {
            Some(decode_any::<OctetString>(any)?.into_bytes())
        }
        Some(any) => Some(any.value().to_vec()),
        None => None,
    };

    let certificates = container_certificates(&signed_data);
    let signer_infos = signed_data.signer_infos.0.as_slice();
    let (signer, repository_metadata, countersignature) = match signer_infos {
        [info] => (
            Some(SignerInfo::decode(info, &certificates)?),
            RepositoryMetadata::decode(info)?,
            decode_countersignature(info, &certificates)?,
        ),
        _ => (None, None, None),
    };

    Ok(DecodedSignature {
        header: SignedDataHeader {
            content_type: content_type.to_string(),
            econtent_type: econtent_type.to_string(),
            signer_count: signer_infos.len(),
        },
        content,
        signer,
        repository_metadata,
        countersignature,
    })
}

/// The repository countersignature among the signer's countersignatures.
fn decode_countersignature(
    info: &CmsSignerInfo,
    certificates: &[Certificate],
) -> SigningResult<Option<RepositoryCountersignature>> {
    let unsigned = info.unsigned_attrs.as_ref().map_or(&[][..], |a| a.as_slice());
    let mut found = None;
    for value in attribute_values(unsigned, ID_COUNTERSIGNATURE) {
        let counter = decode_any::<CmsSignerInfo>(value)?;
        let signer = SignerInfo::decode(&counter, certificates)?;
        if signer.signature_type() != SignatureType::Repository {
            continue;
        }
        if found.is_some() {
            return Err(malformed_signature(
                "a signature may carry only one repository countersignature",
            ));
        }
        found = Some(RepositoryCountersignature {
            signer,
            metadata: RepositoryMetadata::decode(&counter)?,
        });
    }
    Ok(found)
}
