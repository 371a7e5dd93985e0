//! Shared fixtures: a small PKI, CMS signatures, timestamps and packages.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier,
    SignerInfo as CmsSignerInfo, SignerInfos,
};
use der::asn1::{Any, Ia5String, Int, ObjectIdentifier, OctetString, SetOfVec};
use der::{Decode, DerOrd, Encode, EncodeValue, Tagged};
use nuget_signing::asn1::{
    CommitmentTypeIndication, EssCertId, EssCertIdV2, GenTime, MessageImprint, SigningCertificate,
    SigningCertificateV2, TstInfo, ID_COMMITMENT_TYPE, ID_CONTENT_TYPE, ID_COUNTERSIGNATURE,
    ID_CT_TST_INFO, ID_DATA, ID_MESSAGE_DIGEST, ID_NUGET_PACKAGE_OWNERS,
    ID_NUGET_V3_SERVICE_INDEX_URL, ID_PROOF_OF_ORIGIN, ID_PROOF_OF_RECEIPT, ID_SIGNED_DATA,
    ID_SIGNING_CERTIFICATE, ID_SIGNING_CERTIFICATE_V2, ID_TIMESTAMP_TOKEN,
};
use nuget_signing::crypto::{OID_ECDSA_SHA256, OID_RSA_ENCRYPTION};
use nuget_signing::hash::OID_SHA256;
use nuget_signing::{
    ChainBuilder, ClientEnvironment, HashAlgorithmName, InMemorySignedPackage,
    PackageSignatureVerifier, PrimarySignature, RepositoryMetadata, RevocationMode,
    SignatureContent, TrustStore, X509Cert,
};
use p256::ecdsa::signature::Signer as _;
use p256::pkcs8::DecodePrivateKey as _;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rsa::pkcs8::DecodePrivateKey as _;
use rsa::signature::{SignatureEncoding as _, Signer as _};
use sha1::{Digest as _, Sha1};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::Certificate;

pub const PACKAGE_BYTES: &[u8] = b"PK\x03\x04 package contents";
pub const SERVICE_INDEX: &str = "https://api.example.test/v3/index.json";

/// Extended key usage for lifetime signing.
pub const LIFETIME_SIGNING_EKU: &[u64] = &[1, 3, 6, 1, 4, 1, 311, 10, 3, 13];

/// A generated certificate with its key.
pub struct Identity {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Identity {
    pub fn x509(&self) -> X509Cert {
        X509Cert::from_der(self.cert.der()).unwrap()
    }

    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.der()).unwrap()
    }

    pub fn fingerprint(&self) -> String {
        self.x509().fingerprint(HashAlgorithmName::Sha256)
    }

    fn is_rsa(&self) -> bool {
        self.key.algorithm() == &rcgen::PKCS_RSA_SHA256
    }

    /// RSA PKCS#1 v1.5 or ECDSA P-256 signature with SHA-256.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        if self.is_rsa() {
            let key = rsa::RsaPrivateKey::from_pkcs8_der(&self.key.serialize_der()).unwrap();
            let key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key);
            return key.sign(data).to_vec();
        }
        let key = p256::ecdsa::SigningKey::from_pkcs8_der(&self.key.serialize_der()).unwrap();
        let signature: p256::ecdsa::Signature = key.sign(data);
        signature.to_der().as_bytes().to_vec()
    }

    fn signature_algorithm(&self) -> AlgorithmIdentifierOwned {
        if self.is_rsa() {
            algorithm(OID_RSA_ENCRYPTION)
        } else {
            algorithm(OID_ECDSA_SHA256)
        }
    }
}

fn params(
    common_name: &str,
    not_before: (i32, u8, u8),
    not_after: (i32, u8, u8),
) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
    params
}

pub fn root(common_name: &str) -> Identity {
    let mut params = params(common_name, (2020, 1, 1), (2090, 1, 1));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Identity { cert, key }
}

pub fn leaf_with(
    issuer: &Identity,
    common_name: &str,
    ekus: Vec<ExtendedKeyUsagePurpose>,
    not_before: (i32, u8, u8),
    not_after: (i32, u8, u8),
) -> Identity {
    let mut params = params(common_name, not_before, not_after);
    params.extended_key_usages = ekus;
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Identity { cert, key }
}

pub fn code_signing_leaf(issuer: &Identity, common_name: &str) -> Identity {
    leaf_with(
        issuer,
        common_name,
        vec![ExtendedKeyUsagePurpose::CodeSigning],
        (2021, 1, 1),
        (2080, 1, 1),
    )
}

/// Code signing certificate over the RSA-2048 key in the fixtures.
pub fn rsa_code_signing_leaf(issuer: &Identity, common_name: &str) -> Identity {
    let mut params = params(common_name, (2021, 1, 1), (2080, 1, 1));
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
    let key = KeyPair::from_pem(include_str!("../fixtures/rsa-2048.pem")).unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Identity { cert, key }
}

pub fn tsa_leaf(issuer: &Identity) -> Identity {
    leaf_with(
        issuer,
        "Test Timestamping Authority",
        vec![ExtendedKeyUsagePurpose::TimeStamping],
        (2020, 6, 1),
        (2085, 1, 1),
    )
}

pub fn environment() -> ClientEnvironment {
    ClientEnvironment::new(false, RevocationMode::NoCheck)
}

pub async fn verifier(anchors: &[&Identity]) -> PackageSignatureVerifier {
    let store = TrustStore::with_anchors(anchors.iter().map(|a| a.x509())).await;
    PackageSignatureVerifier::with_default_providers(
        ChainBuilder::without_revocation(store),
        environment(),
    )
}

pub fn content() -> SignatureContent {
    SignatureContent::for_package(HashAlgorithmName::Sha256, PACKAGE_BYTES)
}

pub fn recently() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

pub fn at(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn algorithm(oid: &str) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ObjectIdentifier::new(oid).unwrap(),
        parameters: None,
    }
}

fn set<T: DerOrd>(items: Vec<T>) -> SetOfVec<T> {
    items.try_into().unwrap()
}

fn sha256(data: &[u8]) -> OctetString {
    OctetString::new(HashAlgorithmName::Sha256.digest(data)).unwrap()
}

fn attribute(oid: ObjectIdentifier, value: &(impl Tagged + EncodeValue)) -> Attribute {
    Attribute {
        oid,
        values: set(vec![Any::encode_from(value).unwrap()]),
    }
}

fn commitment(commitment_type_id: ObjectIdentifier) -> Attribute {
    attribute(
        ID_COMMITMENT_TYPE,
        &CommitmentTypeIndication {
            commitment_type_id,
            qualifiers: None,
        },
    )
}

fn signing_certificate_v2(identity: &Identity) -> Attribute {
    attribute(
        ID_SIGNING_CERTIFICATE_V2,
        &SigningCertificateV2 {
            certs: vec![EssCertIdV2 {
                hash_algorithm: None,
                cert_hash: sha256(&identity.der()),
                issuer_serial: None,
            }],
            policies: None,
        },
    )
}

fn signing_certificate_v1(identity: &Identity) -> Attribute {
    attribute(
        ID_SIGNING_CERTIFICATE,
        &SigningCertificate {
            certs: vec![EssCertId {
                cert_hash: OctetString::new(Sha1::digest(identity.der()).to_vec()).unwrap(),
                issuer_serial: None,
            }],
            policies: None,
        },
    )
}

fn repository_attributes(metadata: &RepositoryMetadata) -> Vec<Attribute> {
    let index = Ia5String::new(metadata.v3_service_index.as_str()).unwrap();
    let mut attributes = vec![attribute(ID_NUGET_V3_SERVICE_INDEX_URL, &index)];
    if let Some(owners) = &metadata.owners {
        attributes.push(attribute(ID_NUGET_PACKAGE_OWNERS, owners));
    }
    attributes
}

/// CMS signer whose signature covers `attributes`.
fn signer_info(identity: &Identity, attributes: Vec<Attribute>) -> CmsSignerInfo {
    let signed_attrs = set(attributes);
    let signature = identity.sign(&signed_attrs.to_der().unwrap());
    let tbs = identity.certificate().tbs_certificate;
    CmsSignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: tbs.issuer,
            serial_number: tbs.serial_number,
        }),
        digest_alg: algorithm(OID_SHA256),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: identity.signature_algorithm(),
        signature: OctetString::new(signature).unwrap(),
        unsigned_attrs: None,
    }
}

/// DER `ContentInfo` holding `SignedData` over `econtent`.
fn signed_data(
    econtent_type: ObjectIdentifier,
    econtent: Vec<u8>,
    certificates: Vec<Certificate>,
    signers: Vec<CmsSignerInfo>,
) -> Vec<u8> {
    let certificates = (!certificates.is_empty()).then(|| {
        let choices = certificates
            .into_iter()
            .map(CertificateChoices::Certificate)
            .collect();
        CertificateSet(set(choices))
    });
    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: set(vec![algorithm(OID_SHA256)]),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type,
            econtent: Some(Any::encode_from(&OctetString::new(econtent).unwrap()).unwrap()),
        },
        certificates,
        crls: None,
        signer_infos: SignerInfos(set(signers)),
    };
    ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// `TSTInfo` whose imprint is the SHA-256 of `message`.
pub fn tst_info(message: &[u8], gen_time: DateTime<Utc>) -> TstInfo {
    TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.601.10.3.1"),
        message_imprint: MessageImprint {
            hash_algorithm: algorithm(OID_SHA256),
            hashed_message: sha256(message),
        },
        serial_number: Int::new(&[7]).unwrap(),
        gen_time: GenTime(gen_time),
        accuracy: None,
        ordering: false,
        nonce: None,
        tsa: None,
        extensions: None,
    }
}

/// Timestamp token signed by `tsa` over the DER `encoded_tst_info`.
pub fn timestamp_token(tsa: &Identity, encoded_tst_info: Vec<u8>) -> Vec<u8> {
    let signer = signer_info(
        tsa,
        vec![
            attribute(ID_CONTENT_TYPE, &ID_CT_TST_INFO),
            attribute(ID_MESSAGE_DIGEST, &sha256(&encoded_tst_info)),
            signing_certificate_v2(tsa),
        ],
    );
    signed_data(ID_CT_TST_INFO, encoded_tst_info, vec![tsa.certificate()], vec![signer])
}

enum TimestampSource<'a> {
    /// A token over the primary signature value.
    Issued {
        tsa: &'a Identity,
        gen_time: DateTime<Utc>,
    },
    /// A token over other bytes.
    Over {
        tsa: &'a Identity,
        message: Vec<u8>,
    },
    /// A ready-made token.
    Token(Vec<u8>),
}

/// Builds a primary signature as a CMS `SignedData`.
pub struct SignatureBuilder<'a> {
    signer: &'a Identity,
    commitment: Option<ObjectIdentifier>,
    content: Vec<u8>,
    digested: Option<Vec<u8>>,
    include_signer_certificate: bool,
    certificates: Vec<&'a Identity>,
    metadata: Option<RepositoryMetadata>,
    legacy_signing_certificate: bool,
    timestamp: Option<TimestampSource<'a>>,
    countersigner: Option<&'a Identity>,
    second_signer: Option<&'a Identity>,
}

impl<'a> SignatureBuilder<'a> {
    pub fn author(signer: &'a Identity) -> Self {
        Self::new(signer, Some(ID_PROOF_OF_ORIGIN))
    }

    pub fn repository(signer: &'a Identity, metadata: RepositoryMetadata) -> Self {
        let mut builder = Self::new(signer, Some(ID_PROOF_OF_RECEIPT));
        builder.metadata = Some(metadata);
        builder
    }

    fn new(signer: &'a Identity, commitment: Option<ObjectIdentifier>) -> Self {
        Self {
            signer,
            commitment,
            content: content().to_bytes(),
            digested: None,
            include_signer_certificate: true,
            certificates: Vec::new(),
            metadata: None,
            legacy_signing_certificate: false,
            timestamp: None,
            countersigner: None,
            second_signer: None,
        }
    }

    pub fn content(mut self, content: Vec<u8>) -> Self {
        self.content = content;
        self
    }

    /// Put the digest of `bytes` in the message digest attribute.
    pub fn digest_of(mut self, bytes: &[u8]) -> Self {
        self.digested = Some(bytes.to_vec());
        self
    }

    pub fn without_signer_certificate(mut self) -> Self {
        self.include_signer_certificate = false;
        self
    }

    /// Ship another certificate in the container.
    pub fn certificate(mut self, identity: &'a Identity) -> Self {
        self.certificates.push(identity);
        self
    }

    /// Also carry the SHA-1 `signing-certificate` attribute.
    pub fn legacy_signing_certificate(mut self) -> Self {
        self.legacy_signing_certificate = true;
        self
    }

    pub fn timestamp(mut self, tsa: &'a Identity, gen_time: DateTime<Utc>) -> Self {
        self.timestamp = Some(TimestampSource::Issued { tsa, gen_time });
        self
    }

    /// Timestamp whose imprint covers `message` instead of the signature value.
    pub fn timestamp_over(mut self, tsa: &'a Identity, message: &[u8]) -> Self {
        self.timestamp = Some(TimestampSource::Over {
            tsa,
            message: message.to_vec(),
        });
        self
    }

    pub fn timestamp_token(mut self, token: Vec<u8>) -> Self {
        self.timestamp = Some(TimestampSource::Token(token));
        self
    }

    pub fn countersigned_by(mut self, repository: &'a Identity) -> Self {
        self.countersigner = Some(repository);
        self
    }

    /// Add an unrelated second signer to the container.
    pub fn second_signer(mut self, other: &'a Identity) -> Self {
        self.second_signer = Some(other);
        self
    }

    pub fn to_der(&self) -> Vec<u8> {
        let digested = self.digested.as_deref().unwrap_or(&self.content);
        let mut attributes = vec![
            attribute(ID_CONTENT_TYPE, &ID_DATA),
            attribute(ID_MESSAGE_DIGEST, &sha256(digested)),
            signing_certificate_v2(self.signer),
        ];
        if let Some(commitment_type) = self.commitment {
            attributes.push(commitment(commitment_type));
        }
        if self.legacy_signing_certificate {
            attributes.push(signing_certificate_v1(self.signer));
        }
        if let Some(metadata) = &self.metadata {
            attributes.extend(repository_attributes(metadata));
        }
        let mut primary = signer_info(self.signer, attributes);
        let signature_value = primary.signature.as_bytes().to_vec();

        let mut certificates = Vec::new();
        if self.include_signer_certificate {
            certificates.push(self.signer.certificate());
        }
        certificates.extend(self.certificates.iter().map(|c| c.certificate()));

        let mut unsigned = Vec::new();
        if let Some(source) = &self.timestamp {
            let token = match source {
                TimestampSource::Issued { tsa, gen_time } => timestamp_token(
                    tsa,
                    tst_info(&signature_value, *gen_time).to_der().unwrap(),
                ),
                TimestampSource::Over { tsa, message } => {
                    timestamp_token(tsa, tst_info(message, recently()).to_der().unwrap())
                }
                TimestampSource::Token(token) => token.clone(),
            };
            unsigned.push(Attribute {
                oid: ID_TIMESTAMP_TOKEN,
                values: set(vec![Any::from_der(&token).unwrap()]),
            });
        }
        if let Some(repository) = self.countersigner {
            let mut attributes = vec![
                attribute(ID_MESSAGE_DIGEST, &sha256(&signature_value)),
                commitment(ID_PROOF_OF_RECEIPT),
                signing_certificate_v2(repository),
            ];
            attributes.extend(repository_attributes(&RepositoryMetadata::new(SERVICE_INDEX)));
            let counter = signer_info(repository, attributes);
            unsigned.push(attribute(ID_COUNTERSIGNATURE, &counter));
            certificates.push(repository.certificate());
        }
        if !unsigned.is_empty() {
            primary.unsigned_attrs = Some(set(unsigned));
        }

        let mut signers = vec![primary];
        if let Some(other) = self.second_signer {
            signers.push(signer_info(
                other,
                vec![
                    attribute(ID_CONTENT_TYPE, &ID_DATA),
                    attribute(ID_MESSAGE_DIGEST, &sha256(&self.content)),
                    commitment(ID_PROOF_OF_ORIGIN),
                    signing_certificate_v2(other),
                ],
            ));
            certificates.push(other.certificate());
        }

        signed_data(ID_DATA, self.content.clone(), certificates, signers)
    }

    pub fn build(&self) -> PrimarySignature {
        PrimarySignature::load(self.to_der()).unwrap()
    }
}

/// Author signature over the default package content.
pub fn author_signature(signer: &Identity) -> PrimarySignature {
    SignatureBuilder::author(signer).build()
}

pub fn timestamped_author_signature(signer: &Identity, tsa: &Identity) -> PrimarySignature {
    SignatureBuilder::author(signer).timestamp(tsa, recently()).build()
}

pub fn repository_signature(signer: &Identity, owners: Vec<String>) -> PrimarySignature {
    SignatureBuilder::repository(signer, RepositoryMetadata::new(SERVICE_INDEX).with_owners(owners))
        .build()
}

/// Author signature countersigned by `repository`.
pub fn countersigned_author_signature(
    signer: &Identity,
    repository: &Identity,
) -> PrimarySignature {
    SignatureBuilder::author(signer).countersigned_by(repository).build()
}

pub fn package(signatures: Vec<PrimarySignature>) -> InMemorySignedPackage {
    InMemorySignedPackage::signed(PACKAGE_BYTES.to_vec(), signatures)
}
