//! X.509 certificate model and certificate utilities.
//!
//! Certificates are parsed once with `x509-parser` into an owned
//! [`X509Cert`] so they can be shared across providers and tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use sha1::{Digest as _, Sha1};
use x509_parser::pem::Pem;

use crate::crypto::{self, SignatureAlgorithm};
use crate::error::{malformed_certificate, SigningResult};
use crate::hash::{to_upper_hex, HashAlgorithmName};
use crate::results::SignatureLog;

pub const OID_CODE_SIGNING_EKU: &str = "1.3.6.1.5.5.7.3.3";
pub const OID_TIME_STAMPING_EKU: &str = "1.3.6.1.5.5.7.3.8";
pub const OID_LIFETIME_SIGNING_EKU: &str = "1.3.6.1.4.1.311.10.3.13";
pub const OID_ANY_EKU: &str = "2.5.29.37.0";

/// Certificates shown when rendering a chain.
pub const CHAIN_DEPTH_LIMIT: usize = 10;

/// A parsed X.509 certificate.
#[derive(Clone)]
pub struct X509Cert {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    spki_der: Vec<u8>,
    tbs_der: Vec<u8>,
    signature_algorithm: String,
    signature: Vec<u8>,
    /// `None` when the certificate has no EKU extension.
    extended_key_usages: Option<Vec<String>>,
    is_ca: bool,
    /// `keyCertSign` bit, `None` when the certificate has no key usage.
    key_cert_sign: Option<bool>,
}

impl X509Cert {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> SigningResult<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| malformed_certificate(format!("x509 parse failed: {e}")))?;

        let not_before = to_utc(cert.validity().not_before.timestamp())?;
        let not_after = to_utc(cert.validity().not_after.timestamp())?;

        let extended_key_usages = cert
            .extended_key_usage()
            .map_err(|e| malformed_certificate(format!("bad EKU extension: {e}")))?
            .map(|ext| {
                let eku = ext.value;
                let mut oids = Vec::new();
                if eku.any {
                    oids.push(OID_ANY_EKU.to_string());
                }
                if eku.server_auth {
                    oids.push("1.3.6.1.5.5.7.3.1".to_string());
                }
                if eku.client_auth {
                    oids.push("1.3.6.1.5.5.7.3.2".to_string());
                }
                if eku.code_signing {
                    oids.push(OID_CODE_SIGNING_EKU.to_string());
                }
                if eku.email_protection {
                    oids.push("1.3.6.1.5.5.7.3.4".to_string());
                }
                if eku.time_stamping {
                    oids.push(OID_TIME_STAMPING_EKU.to_string());
                }
                if eku.ocsp_signing {
                    oids.push("1.3.6.1.5.5.7.3.9".to_string());
                }
                oids.extend(eku.other.iter().map(|oid| oid.to_id_string()));
                oids
            });

        let is_ca = cert
            .basic_constraints()
            .map_err(|e| malformed_certificate(format!("bad basic constraints: {e}")))?
            .map(|ext| ext.value.ca)
            .unwrap_or(false);
        let key_cert_sign = cert
            .key_usage()
            .map_err(|e| malformed_certificate(format!("bad key usage: {e}")))?
            .map(|ext| ext.value.key_cert_sign());

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            serial: to_upper_hex(cert.raw_serial()),
            not_before,
            not_after,
            spki_der: cert.public_key().raw.to_vec(),
            tbs_der: cert.tbs_certificate.as_ref().to_vec(),
            signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
            signature: cert.signature_value.data.to_vec(),
            extended_key_usages,
            is_ca,
            key_cert_sign,
        })
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle.
    pub fn from_pem_bundle(pem: &[u8]) -> SigningResult<Vec<Self>> {
        let mut certs = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| malformed_certificate(format!("bad PEM: {e}")))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(&block.contents)?);
            }
        }
        Ok(certs)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Serial number as uppercase hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// A CA whose key usage, if present, allows signing certificates.
    pub fn can_issue_certificates(&self) -> bool {
        self.is_ca && self.key_cert_sign.unwrap_or(true)
    }

    pub fn extended_key_usages(&self) -> Option<&[String]> {
        self.extended_key_usages.as_deref()
    }

    /// Uppercase hex fingerprint of the DER encoding, without separators.
    pub fn fingerprint(&self, algorithm: HashAlgorithmName) -> String {
        to_upper_hex(&algorithm.digest(&self.der))
    }

    /// SHA-1 thumbprint, used for display only.
    pub fn sha1_thumbprint(&self) -> String {
        to_upper_hex(&Sha1::digest(&self.der))
    }

    /// Whether `issuer` signed this certificate.
    pub fn is_signed_by(&self, issuer: &X509Cert) -> SigningResult<bool> {
        if self.issuer_raw != issuer.subject_raw {
            return Ok(false);
        }
        crypto::verify_signature(
            &issuer.spki_der,
            &self.signature_algorithm,
            &self.tbs_der,
            &self.signature,
        )
    }

    /// Subject equals issuer and the certificate verifies with its own key.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw && self.is_signed_by(self).unwrap_or(false)
    }

    /// Whether the EKU extension lists `oid`.
    pub fn has_extended_key_usage(&self, oid: &str) -> bool {
        self.extended_key_usages
            .as_ref()
            .is_some_and(|ekus| ekus.iter().any(|eku| eku == oid))
    }

    /// Whether the certificate may be used for `oid`.
    ///
    /// A certificate without an EKU extension, or with anyExtendedKeyUsage,
    /// is valid for every purpose.
    pub fn is_valid_for_purpose(&self, oid: &str) -> bool {
        match &self.extended_key_usages {
            None => true,
            Some(ekus) => ekus.iter().any(|eku| eku == oid || eku == OID_ANY_EKU),
        }
    }

    pub fn has_lifetime_signing_eku(&self) -> bool {
        self.has_extended_key_usage(OID_LIFETIME_SIGNING_EKU)
    }

    /// Inclusive validity check.
    pub fn is_date_inside_validity(&self, date: DateTime<Utc>) -> bool {
        self.not_before <= date && date <= self.not_after
    }

    pub fn is_validity_period_in_future(&self, now: DateTime<Utc>) -> bool {
        self.not_before > now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }
}

impl PartialEq for X509Cert {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for X509Cert {}

impl fmt::Debug for X509Cert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Cert")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

fn to_utc(timestamp: i64) -> SigningResult<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| malformed_certificate(format!("validity time out of range: {timestamp}")))
}

/// Whether the certificate's own signature algorithm is acceptable.
///
/// Errors with `NotSupported` for algorithms this build recognizes but
/// cannot verify.
pub fn is_signature_algorithm_supported(cert: &X509Cert) -> SigningResult<bool> {
    Ok(SignatureAlgorithm::from_oid(cert.signature_algorithm())?.is_some())
}

/// Whether the public key meets the minimum strength requirements.
pub fn is_public_key_valid(cert: &X509Cert) -> bool {
    crypto::public_key_kind(cert.spki_der()).is_acceptable()
}

/// Describe a certificate as log entries.
pub fn certificate_log_messages(
    cert: &X509Cert,
    algorithm: HashAlgorithmName,
    indentation: &str,
) -> Vec<SignatureLog> {
    vec![
        SignatureLog::information(format!("{indentation}Subject Name: {}", cert.subject())),
        SignatureLog::debug(format!("{indentation}SHA1 hash: {}", cert.sha1_thumbprint())),
        SignatureLog::information(format!(
            "{indentation}{algorithm} hash: {}",
            cert.fingerprint(algorithm)
        )),
        SignatureLog::debug(format!("{indentation}Issued by: {}", cert.issuer())),
        SignatureLog::information(format!(
            "{indentation}Valid from: {} to {}",
            cert.not_before(),
            cert.not_after()
        )),
    ]
}

/// Render the issuers of a chain (the leaf is omitted), nesting each level.
pub fn chain_to_string(chain: &[X509Cert], algorithm: HashAlgorithmName) -> String {
    let mut out = String::new();
    let mut indentation = String::from("      ");
    for cert in chain.iter().take(CHAIN_DEPTH_LIMIT).skip(1) {
        for line in certificate_log_messages(cert, algorithm, &indentation) {
            out.push_str(&line.message);
            out.push('\n');
        }
        indentation.push_str("      ");
    }
    if chain.len() > CHAIN_DEPTH_LIMIT {
        out.push_str(&format!(
            "... {} more.\n",
            chain.len() - CHAIN_DEPTH_LIMIT
        ));
    }
    out
}
