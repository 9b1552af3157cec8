//! PKI error types.

use thiserror::Error;

/// Failures of the certificate infrastructure.
#[derive(Debug, Error)]
pub enum PkiError {
    /// CA certificate or key is missing, unreadable or does not parse
    #[error("CA unavailable: {0}")]
    CaUnavailable(String),

    /// Key generation or certificate signing failed
    #[error("Certificate creation failed: {0}")]
    CertificateCreation(String),

    /// Bytes are not PEM or do not decode to a certificate
    #[error("Certificate parse error: {0}")]
    Parse(String),

    /// Certificate was not issued by the presented CA
    #[error("Chain verification failed: {0}")]
    ChainVerification(String),
}

impl PkiError {
    /// Stable error code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            PkiError::CaUnavailable(_) => "ca_unavailable",
            PkiError::CertificateCreation(_) => "certificate_creation",
            PkiError::Parse(_) => "parse_error",
            PkiError::ChainVerification(_) => "chain_verification",
        }
    }
}

/// Result type for PKI operations.
pub type PkiResult<T> = Result<T, PkiError>;
