//! Certificate authority primitives.
//!
//! Serial generation, PEM encoding, certificate parsing and loading of CA
//! key/certificate pairs, either from a directory or from PEM held in memory.

use std::fmt;
use std::path::Path;

use pem::{EncodeConfig, LineEnding, Pem};
use rand::{rngs::OsRng, RngCore};
use rcgen::{CertificateParams, KeyPair, SerialNumber};
use x509_parser::{certificate::X509Certificate, prelude::FromDer};

use crate::error::{PkiError, PkiResult};
use crate::keys::{key_algorithm_of, load_key_pair};

/// CA certificate file name inside a CA directory.
pub const CA_CERT_FILE: &str = "ca.crt";
/// CA private key file name inside a CA directory.
pub const CA_KEY_FILE: &str = "ca.key";

/// Serial length in bytes (RFC 5280 allows at most 20 octets).
pub const SERIAL_LEN: usize = 20;

/// A positive certificate serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial([u8; SERIAL_LEN]);

impl Serial {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Serial> for SerialNumber {
    fn from(serial: Serial) -> Self {
        SerialNumber::from_slice(serial.as_bytes())
    }
}

/// Generate a 159-bit random serial.
///
/// The top bit is cleared so the DER INTEGER stays positive at 20 octets.
pub fn generate_serial() -> Serial {
    let mut bytes = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    if bytes.iter().all(|b| *b == 0) {
        bytes[SERIAL_LEN - 1] = 1;
    }
    Serial(bytes)
}

fn encode_block(tag: &str, der: &[u8]) -> String {
    let block = Pem::new(tag, der.to_vec());
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// PEM-encode a DER certificate.
pub fn encode_certificate(der: &[u8]) -> String {
    encode_block("CERTIFICATE", der)
}

/// PEM-encode a DER PKCS#8 private key.
pub fn encode_key(der: &[u8]) -> String {
    encode_block("PRIVATE KEY", der)
}

/// Owned view of an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    der: Vec<u8>,
    public_key_info: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub organization: Option<String>,
    /// Big-endian serial as hex
    pub serial_hex: String,
    pub is_ca: bool,
    /// Unix seconds
    pub not_before: i64,
    /// Unix seconds
    pub not_after: i64,
}

impl ParsedCertificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: Vec<u8>) -> PkiResult<Self> {
        let parsed = {
            let (_, cert) = X509Certificate::from_der(&der)
                .map_err(|e| PkiError::Parse(format!("invalid X.509 certificate: {e}")))?;
            let subject = cert.subject();
            let validity = cert.validity();
            let common_name = subject
                .iter_common_name()
                .next()
                .and_then(|attr| attr.as_str().ok())
                .map(str::to_owned);
            let organization = subject
                .iter_organization()
                .next()
                .and_then(|attr| attr.as_str().ok())
                .map(str::to_owned);

            ParsedCertificate {
                der: Vec::new(),
                public_key_info: cert.public_key().raw.to_vec(),
                subject: subject.to_string(),
                issuer: cert.issuer().to_string(),
                common_name,
                organization,
                serial_hex: hex::encode(cert.raw_serial()),
                is_ca: cert.is_ca(),
                not_before: validity.not_before.timestamp(),
                not_after: validity.not_after.timestamp(),
            }
        };

        Ok(ParsedCertificate { der, ..parsed })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER SubjectPublicKeyInfo of the certified key.
    pub fn public_key_info(&self) -> &[u8] {
        &self.public_key_info
    }

    pub fn to_pem(&self) -> String {
        encode_certificate(&self.der)
    }

    pub fn is_valid_at(&self, unix_seconds: i64) -> bool {
        self.not_before <= unix_seconds && unix_seconds <= self.not_after
    }

    /// Verify that `issuer` signed this certificate.
    ///
    /// Checks the CA flag, the issuer/subject name linkage and the signature.
    pub fn verify_issued_by(&self, issuer: &ParsedCertificate) -> PkiResult<()> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| PkiError::Parse(format!("invalid X.509 certificate: {e}")))?;
        let (_, ca) = X509Certificate::from_der(&issuer.der)
            .map_err(|e| PkiError::Parse(format!("invalid issuer certificate: {e}")))?;

        if !ca.is_ca() {
            return Err(PkiError::ChainVerification(format!(
                "'{}' is not a CA certificate",
                issuer.subject
            )));
        }
        if cert.issuer().to_string() != ca.subject().to_string() {
            return Err(PkiError::ChainVerification(format!(
                "issued by '{}', not '{}'",
                self.issuer, issuer.subject
            )));
        }
        cert.verify_signature(Some(ca.public_key())).map_err(|e| {
            PkiError::ChainVerification(format!(
                "signature does not verify against '{}': {e}",
                issuer.subject
            ))
        })
    }
}

/// Parse a PEM certificate.
pub fn parse_root_certificate(bytes: &[u8]) -> PkiResult<ParsedCertificate> {
    let block =
        pem::parse(bytes).map_err(|e| PkiError::Parse(format!("not a PEM document: {e}")))?;
    if block.tag() != "CERTIFICATE" {
        return Err(PkiError::Parse(format!(
            "expected CERTIFICATE block, found '{}'",
            block.tag()
        )));
    }
    ParsedCertificate::from_der(block.into_contents())
}

/// A key pair plus certificate able to sign subordinate certificates.
pub struct CertificateAuthority {
    key: KeyPair,
    issuer: rcgen::Certificate,
    certificate: ParsedCertificate,
}

impl CertificateAuthority {
    /// Build a CA from PEM-encoded certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> PkiResult<Self> {
        let certificate = parse_root_certificate(cert_pem.as_bytes())
            .map_err(|e| PkiError::CaUnavailable(format!("CA certificate: {e}")))?;
        if !certificate.is_ca {
            return Err(PkiError::CaUnavailable(format!(
                "'{}' is not a CA certificate",
                certificate.subject
            )));
        }

        let key = load_key_pair(key_pem)
            .map_err(|e| PkiError::CaUnavailable(format!("CA key: {e}")))?;
        if key.public_key_der() != certificate.public_key_info() {
            return Err(PkiError::CaUnavailable(
                "CA key does not match CA certificate".to_string(),
            ));
        }

        // rcgen signs against a Certificate value; rebuild one carrying the CA's
        // distinguished name and key identifier.
        let issuer = CertificateParams::from_ca_cert_pem(cert_pem)
            .and_then(|params| params.self_signed(&key))
            .map_err(|e| PkiError::CaUnavailable(format!("CA certificate unusable: {e}")))?;

        tracing::debug!(
            subject = %certificate.subject,
            algorithm = ?key_algorithm_of(&key),
            "loaded certificate authority"
        );

        Ok(Self {
            key,
            issuer,
            certificate,
        })
    }

    pub fn certificate(&self) -> &ParsedCertificate {
        &self.certificate
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key
    }

    /// Sign `params` for `subject_key` with this CA.
    pub(crate) fn sign(
        &self,
        params: CertificateParams,
        subject_key: &KeyPair,
    ) -> PkiResult<rcgen::Certificate> {
        params
            .signed_by(subject_key, &self.issuer, &self.key)
            .map_err(|e| PkiError::CertificateCreation(format!("signing failed: {e}")))
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.certificate.subject)
            .field("serial", &self.certificate.serial_hex)
            .finish_non_exhaustive()
    }
}

/// Load the CA stored as `ca.crt` and `ca.key` in `dir`.
pub fn load_ca(dir: &Path) -> PkiResult<CertificateAuthority> {
    let read = |name: &str| {
        let path = dir.join(name);
        std::fs::read_to_string(&path)
            .map_err(|e| PkiError::CaUnavailable(format!("{}: {e}", path.display())))
    };
    let cert_pem = read(CA_CERT_FILE)?;
    let key_pem = read(CA_KEY_FILE)?;
    CertificateAuthority::from_pem(&cert_pem, &key_pem)
}
