//! PKI primitives for the IoT identity service.
//!
//! This crate owns everything that touches X.509: key generation, serial
//! numbers, PEM handling, CA loading and the issuance of organization and
//! device certificates.
//!
//! # Trust hierarchy
//!
//! ```text
//! [external root]        (optional, `IssuanceStrategy::ExternalRoot`)
//!        |
//! organization CA        (one per tenant, IsCA, 10 years)
//!        |
//! device certificate     (CN = device id, O = organization name)
//! ```
//!
//! Device certificates are always signed by their organization's CA, so
//! `device.verify_issued_by(organization)` holds under both strategies.

pub mod ca;
pub mod error;
pub mod issuance;
pub mod keys;

pub use ca::{
    encode_certificate, encode_key, generate_serial, load_ca, parse_root_certificate,
    CertificateAuthority, ParsedCertificate, Serial, CA_CERT_FILE, CA_KEY_FILE,
};
pub use error::{PkiError, PkiResult};
pub use issuance::{CertificateIssuer, IssuanceStrategy, IssuedCredential, VALIDITY_DAYS};
pub use keys::{generate_key_pair, load_key_pair, KeyAlgorithm};
