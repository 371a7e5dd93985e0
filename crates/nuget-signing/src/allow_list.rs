//! Allow-list entries describing permitted signers.
//!
//! Entries are a closed set of variants; each carries only the fields it
//! needs. Constructors validate eagerly: a bad fingerprint or an author
//! entry scoped to countersignatures is rejected before verification runs.

use crate::certificate::X509Cert;
use crate::error::{invalid_argument, SigningResult};
use crate::hash::{fingerprints_equal, HashAlgorithmName};
use crate::settings::{SignaturePlacement, VerificationTarget};
use crate::signature::SignatureType;

/// A certificate identified by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCertificate {
    fingerprint: String,
    algorithm: HashAlgorithmName,
    allow_untrusted_root: bool,
}

impl TrustedCertificate {
    pub fn new(
        fingerprint: &str,
        algorithm: HashAlgorithmName,
        allow_untrusted_root: bool,
    ) -> SigningResult<Self> {
        Ok(Self {
            fingerprint: normalize_fingerprint(fingerprint, algorithm)?,
            algorithm,
            allow_untrusted_root,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn algorithm(&self) -> HashAlgorithmName {
        self.algorithm
    }

    pub fn allow_untrusted_root(&self) -> bool {
        self.allow_untrusted_root
    }

    pub fn matches(&self, certificate: &X509Cert) -> bool {
        fingerprints_equal(&certificate.fingerprint(self.algorithm), &self.fingerprint)
    }
}

fn normalize_fingerprint(fingerprint: &str, algorithm: HashAlgorithmName) -> SigningResult<String> {
    let trimmed = fingerprint.trim();
    if trimmed.is_empty() {
        return Err(invalid_argument("fingerprint", "fingerprint must not be empty"));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid_argument(
            "fingerprint",
            format!("fingerprint is not hex: {trimmed}"),
        ));
    }
    if trimmed.len() != algorithm.output_len() * 2 {
        return Err(invalid_argument(
            "fingerprint",
            format!(
                "{algorithm} fingerprint must have {} hex digits, found {}",
                algorithm.output_len() * 2,
                trimmed.len()
            ),
        ));
    }
    Ok(trimmed.to_ascii_uppercase())
}

fn check_scope(target: VerificationTarget, placement: SignaturePlacement) -> SigningResult<()> {
    if target.is_empty() {
        return Err(invalid_argument("target", "entry must target a signature type"));
    }
    if placement.is_empty() {
        return Err(invalid_argument("placement", "entry must name a placement"));
    }
    if target.contains(VerificationTarget::AUTHOR)
        && placement.contains(SignaturePlacement::COUNTERSIGNATURE)
    {
        return Err(invalid_argument(
            "placement",
            "author entries cannot apply to countersignatures",
        ));
    }
    Ok(())
}

/// A certificate fingerprint scoped to a target and placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHashAllowListEntry {
    target: VerificationTarget,
    placement: SignaturePlacement,
    certificate: TrustedCertificate,
}

impl CertificateHashAllowListEntry {
    pub fn new(
        target: VerificationTarget,
        placement: SignaturePlacement,
        fingerprint: &str,
        algorithm: HashAlgorithmName,
    ) -> SigningResult<Self> {
        check_scope(target, placement)?;
        Ok(Self {
            target,
            placement,
            certificate: TrustedCertificate::new(fingerprint, algorithm, false)?,
        })
    }

    pub fn certificate(&self) -> &TrustedCertificate {
        &self.certificate
    }
}

/// A trusted signer from the client trust policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedSignerAllowListEntry {
    target: VerificationTarget,
    placement: SignaturePlacement,
    certificate: TrustedCertificate,
    owners: Option<Vec<String>>,
}

impl TrustedSignerAllowListEntry {
    pub fn new(
        target: VerificationTarget,
        placement: SignaturePlacement,
        certificate: TrustedCertificate,
        owners: Option<Vec<String>>,
    ) -> SigningResult<Self> {
        check_scope(target, placement)?;
        Ok(Self {
            target,
            placement,
            certificate,
            owners,
        })
    }

    pub fn certificate(&self) -> &TrustedCertificate {
        &self.certificate
    }

    pub fn owners(&self) -> Option<&[String]> {
        self.owners.as_deref()
    }
}

/// A named author with its signing certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedAuthorAllowListEntry {
    name: String,
    certificates: Vec<TrustedCertificate>,
}

impl TrustedAuthorAllowListEntry {
    pub fn new(
        name: impl Into<String>,
        certificates: Vec<TrustedCertificate>,
    ) -> SigningResult<Self> {
        let name = non_empty("name", name.into())?;
        if certificates.is_empty() {
            return Err(invalid_argument("certificates", "at least one certificate is required"));
        }
        Ok(Self { name, certificates })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn certificates(&self) -> &[TrustedCertificate] {
        &self.certificates
    }
}

/// A named repository with its signing certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedRepositoryAllowListEntry {
    name: String,
    service_index: String,
    certificates: Vec<TrustedCertificate>,
    owners: Option<Vec<String>>,
}

impl TrustedRepositoryAllowListEntry {
    pub fn new(
        name: impl Into<String>,
        service_index: impl Into<String>,
        certificates: Vec<TrustedCertificate>,
        owners: Option<Vec<String>>,
    ) -> SigningResult<Self> {
        let name = non_empty("name", name.into())?;
        let service_index = non_empty("service_index", service_index.into())?;
        if certificates.is_empty() {
            return Err(invalid_argument("certificates", "at least one certificate is required"));
        }
        Ok(Self {
            name,
            service_index,
            certificates,
            owners,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_index(&self) -> &str {
        &self.service_index
    }

    pub fn certificates(&self) -> &[TrustedCertificate] {
        &self.certificates
    }

    pub fn owners(&self) -> Option<&[String]> {
        self.owners.as_deref()
    }
}

/// Certificates trusted for packages from one package source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedSourceAllowListEntry {
    source: String,
    certificates: Vec<TrustedCertificate>,
}

impl TrustedSourceAllowListEntry {
    pub fn new(
        source: impl Into<String>,
        certificates: Vec<TrustedCertificate>,
    ) -> SigningResult<Self> {
        let source = non_empty("source", source.into())?;
        Ok(Self {
            source,
            certificates,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn certificates(&self) -> &[TrustedCertificate] {
        &self.certificates
    }
}

fn non_empty(name: &'static str, value: String) -> SigningResult<String> {
    if value.trim().is_empty() {
        return Err(invalid_argument(name, "must not be empty"));
    }
    Ok(value)
}

/// One permitted signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationAllowListEntry {
    CertificateHash(CertificateHashAllowListEntry),
    TrustedSigner(TrustedSignerAllowListEntry),
    TrustedAuthor(TrustedAuthorAllowListEntry),
    TrustedRepository(TrustedRepositoryAllowListEntry),
    TrustedSource(TrustedSourceAllowListEntry),
}

/// The signer an allow list is checked against.
#[derive(Debug, Clone, Copy)]
pub struct AllowListCandidate<'a> {
    pub signature_type: SignatureType,
    pub placement: SignaturePlacement,
    pub certificate: &'a X509Cert,
    pub owners: Option<&'a [String]>,
}

impl VerificationAllowListEntry {
    pub fn target(&self) -> VerificationTarget {
        match self {
            Self::CertificateHash(e) => e.target,
            Self::TrustedSigner(e) => e.target,
            Self::TrustedAuthor(_) => VerificationTarget::AUTHOR,
            Self::TrustedRepository(_) | Self::TrustedSource(_) => VerificationTarget::REPOSITORY,
        }
    }

    pub fn placement(&self) -> SignaturePlacement {
        match self {
            Self::CertificateHash(e) => e.placement,
            Self::TrustedSigner(e) => e.placement,
            Self::TrustedAuthor(_) => SignaturePlacement::PRIMARY_SIGNATURE,
            Self::TrustedRepository(_) | Self::TrustedSource(_) => SignaturePlacement::ANY,
        }
    }

    pub fn certificates(&self) -> &[TrustedCertificate] {
        match self {
            Self::CertificateHash(e) => std::slice::from_ref(&e.certificate),
            Self::TrustedSigner(e) => std::slice::from_ref(&e.certificate),
            Self::TrustedAuthor(e) => &e.certificates,
            Self::TrustedRepository(e) => &e.certificates,
            Self::TrustedSource(e) => &e.certificates,
        }
    }

    pub fn owners(&self) -> Option<&[String]> {
        match self {
            Self::TrustedSigner(e) => e.owners(),
            Self::TrustedRepository(e) => e.owners(),
            _ => None,
        }
    }

    fn in_scope(&self, candidate: &AllowListCandidate<'_>) -> bool {
        if !self.target().includes(candidate.signature_type)
            || !self.placement().contains(candidate.placement)
        {
            return false;
        }
        match self.owners() {
            Some(required) if !required.is_empty() => candidate.owners.is_some_and(|owners| {
                owners
                    .iter()
                    .any(|o| required.iter().any(|r| r.eq_ignore_ascii_case(o)))
            }),
            _ => true,
        }
    }

    /// The certificate of this entry that matches `candidate`, if any.
    pub fn matching_certificate(
        &self,
        candidate: &AllowListCandidate<'_>,
    ) -> Option<&TrustedCertificate> {
        if !self.in_scope(candidate) {
            return None;
        }
        self.certificates()
            .iter()
            .find(|c| c.matches(candidate.certificate))
    }

    pub fn matches(&self, candidate: &AllowListCandidate<'_>) -> bool {
        self.matching_certificate(candidate).is_some()
    }
}

/// Whether any entry in `entries` matches `candidate`.
pub fn is_allowed(
    entries: &[VerificationAllowListEntry],
    candidate: &AllowListCandidate<'_>,
) -> bool {
    entries.iter().any(|entry| entry.matches(candidate))
}

/// Whether a matching entry lets `candidate` chain to an untrusted root.
pub fn allows_untrusted_root(
    entries: &[VerificationAllowListEntry],
    candidate: &AllowListCandidate<'_>,
) -> bool {
    entries
        .iter()
        .filter_map(|entry| entry.matching_certificate(candidate))
        .any(TrustedCertificate::allow_untrusted_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SigningError;
    use rcgen::{CertificateParams, KeyPair};

    fn cert() -> X509Cert {
        let params = CertificateParams::new(vec!["allow.test".to_string()]).unwrap();
        let key = KeyPair::generate().unwrap();
        X509Cert::from_der(params.self_signed(&key).unwrap().der()).unwrap()
    }

    fn candidate<'a>(
        cert: &'a X509Cert,
        signature_type: SignatureType,
        placement: SignaturePlacement,
    ) -> AllowListCandidate<'a> {
        AllowListCandidate {
            signature_type,
            placement,
            certificate: cert,
            owners: None,
        }
    }

    #[test]
    fn test_author_countersignature_rejected() {
        let err = CertificateHashAllowListEntry::new(
            VerificationTarget::AUTHOR,
            SignaturePlacement::COUNTERSIGNATURE,
            &"AB".repeat(32),
            HashAlgorithmName::Sha256,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SigningError::InvalidArgument {
                name: "placement",
                ..
            }
        ));

        assert!(CertificateHashAllowListEntry::new(
            VerificationTarget::ALL,
            SignaturePlacement::ANY,
            &"AB".repeat(32),
            HashAlgorithmName::Sha256,
        )
        .is_err());
    }

    #[test]
    fn test_fingerprint_validation() {
        assert!(TrustedCertificate::new("", HashAlgorithmName::Sha256, false).is_err());
        assert!(TrustedCertificate::new("zz", HashAlgorithmName::Sha256, false).is_err());
        let short = TrustedCertificate::new(&"ab".repeat(32), HashAlgorithmName::Sha512, false);
        assert!(short.is_err());
        let ok =
            TrustedCertificate::new(&"ab".repeat(48), HashAlgorithmName::Sha384, false).unwrap();
        assert_eq!(ok.fingerprint(), "AB".repeat(48));
    }

    #[test]
    fn test_hash_entry_matching() {
        let signer = cert();
        let fp = signer.fingerprint(HashAlgorithmName::Sha256).to_lowercase();
        let entry = VerificationAllowListEntry::CertificateHash(
            CertificateHashAllowListEntry::new(
                VerificationTarget::AUTHOR | VerificationTarget::REPOSITORY,
                SignaturePlacement::PRIMARY_SIGNATURE,
                &fp,
                HashAlgorithmName::Sha256,
            )
            .unwrap(),
        );

        assert!(entry.matches(&candidate(
            &signer,
            SignatureType::Author,
            SignaturePlacement::PRIMARY_SIGNATURE
        )));
        assert!(!entry.matches(&candidate(
            &signer,
            SignatureType::Repository,
            SignaturePlacement::COUNTERSIGNATURE
        )));
        assert!(!entry.matches(&candidate(
            &cert(),
            SignatureType::Author,
            SignaturePlacement::PRIMARY_SIGNATURE
        )));
    }

    #[test]
    fn test_owner_restriction() {
        let signer = cert();
        let trusted = TrustedCertificate::new(
            &signer.fingerprint(HashAlgorithmName::Sha512),
            HashAlgorithmName::Sha512,
            true,
        )
        .unwrap();
        let entry = VerificationAllowListEntry::TrustedRepository(
            TrustedRepositoryAllowListEntry::new(
                "nuget.org",
                "https://api.nuget.org/v3/index.json",
                vec![trusted],
                Some(vec!["Microsoft".into()]),
            )
            .unwrap(),
        );

        let mut c = candidate(
            &signer,
            SignatureType::Repository,
            SignaturePlacement::COUNTERSIGNATURE,
        );
        assert!(!entry.matches(&c));

        let owners = vec!["someone".to_string(), "microsoft".to_string()];
        c.owners = Some(&owners);
        assert!(entry.matches(&c));
        assert!(allows_untrusted_root(std::slice::from_ref(&entry), &c));
    }

    #[test]
    fn test_named_entry_scopes() {
        let signer = cert();
        let fingerprint = signer.fingerprint(HashAlgorithmName::Sha256);
        let trusted =
            TrustedCertificate::new(&fingerprint, HashAlgorithmName::Sha256, false).unwrap();
        let author = VerificationAllowListEntry::TrustedAuthor(
            TrustedAuthorAllowListEntry::new("contoso", vec![trusted.clone()]).unwrap(),
        );
        let source = VerificationAllowListEntry::TrustedSource(
            TrustedSourceAllowListEntry::new("internal-feed", vec![trusted]).unwrap(),
        );

        assert_eq!(author.placement(), SignaturePlacement::PRIMARY_SIGNATURE);
        assert_eq!(source.target(), VerificationTarget::REPOSITORY);
        let entries = [author, source];
        assert!(is_allowed(
            &entries,
            &candidate(&signer, SignatureType::Author, SignaturePlacement::PRIMARY_SIGNATURE)
        ));
        assert!(!allows_untrusted_root(
            &entries,
            &candidate(&signer, SignatureType::Author, SignaturePlacement::PRIMARY_SIGNATURE)
        ));
        assert!(TrustedAuthorAllowListEntry::new(" ", vec![]).is_err());
    }
}
