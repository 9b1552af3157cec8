//! Error types for identity operations.
//!
//! Every failure of registration, enrollment or status management maps to
//! exactly one variant here. Transport layers use [`IdentityError::code`] to
//! render a stable identifier next to the human-readable message.

use iotid_crypto::PkiError;
use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A required field is missing or blank
    #[error("{0}")]
    Validation(String),

    /// Uniqueness violation (organization name, device identity)
    #[error("{0}")]
    Duplicate(String),

    /// Unknown organization or device reference
    #[error("{0}")]
    NotFound(String),

    /// Enrollment names a device that was never registered
    #[error("device `{0}` is not registered")]
    NotRegistered(String),

    /// Assertions of the wrong kind, or a header of the wrong shape
    #[error("Assertion type error: {0}")]
    AssertionType(String),

    /// Required assertion header is absent
    #[error("assertion header `{0}` is missing")]
    MissingHeader(String),

    /// The model and serial assertions disagree
    #[error("{0}")]
    Mismatch(String),

    /// Assertion stream is malformed, unsigned or signed by an untrusted key
    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    /// Device has already completed enrollment
    #[error("device `{0}` is already enrolled")]
    AlreadyEnrolled(String),

    /// Device was disabled by an administrator
    #[error("device `{0}` is disabled")]
    Disabled(String),

    /// Stored state does not allow the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested status transition is never allowed
    #[error("Forbidden transition: {0}")]
    ForbiddenTransition(String),

    /// PKI infrastructure failure
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// Datastore backend failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl IdentityError {
    /// Stable snake_case identifier for this error.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Validation(_) => "validation_error",
            IdentityError::Duplicate(_) => "duplicate",
            IdentityError::NotFound(_) => "not_found",
            IdentityError::NotRegistered(_) => "not_registered",
            IdentityError::AssertionType(_) => "assertion_type",
            IdentityError::MissingHeader(_) => "missing_header",
            IdentityError::Mismatch(_) => "mismatch",
            IdentityError::InvalidAssertion(_) => "invalid_assertion",
            IdentityError::AlreadyEnrolled(_) => "already_enrolled",
            IdentityError::Disabled(_) => "disabled",
            IdentityError::InvalidState(_) => "invalid_state",
            IdentityError::ForbiddenTransition(_) => "forbidden_transition",
            IdentityError::Pki(e) => e.code(),
            IdentityError::Storage(_) => "storage_error",
        }
    }
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            IdentityError::Validation("name must not be empty".into()),
            IdentityError::Duplicate("dup".into()),
            IdentityError::NotFound("nf".into()),
            IdentityError::NotRegistered("a/b/c".into()),
            IdentityError::AssertionType("t".into()),
            IdentityError::MissingHeader("model".into()),
            IdentityError::Mismatch("m".into()),
            IdentityError::InvalidAssertion("i".into()),
            IdentityError::AlreadyEnrolled("d".into()),
            IdentityError::Disabled("d".into()),
            IdentityError::InvalidState("s".into()),
            IdentityError::ForbiddenTransition("f".into()),
            IdentityError::Pki(PkiError::CaUnavailable("ca".into())),
            IdentityError::Storage("io".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(IdentityError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_pki_errors_pass_through() {
        let err: IdentityError = PkiError::CertificateCreation("boom".into()).into();
        assert_eq!(err.code(), "certificate_creation");
        assert_eq!(err.to_string(), "Certificate creation failed: boom");
    }
}
