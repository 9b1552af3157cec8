//! Key generation and loading.
//!
//! All keys are handed to rcgen as PKCS#8. RSA keys are generated with the
//! `rsa` crate because rcgen can only sign with RSA, not generate it.

use rand::rngs::OsRng;
use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_RSA_SHA256};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::error::{PkiError, PkiResult};

pub use iotid_core::KeyAlgorithm;

/// Modulus size for generated RSA keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Generate a fresh signing key pair.
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> PkiResult<KeyPair> {
    match algorithm {
        KeyAlgorithm::Rsa2048 => {
            let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|e| {
                PkiError::CertificateCreation(format!("RSA key generation failed: {e}"))
            })?;
            rsa_to_key_pair(&key).map_err(PkiError::CertificateCreation)
        }
        KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
            PkiError::CertificateCreation(format!("ECDSA key generation failed: {e}"))
        }),
    }
}

/// Load a private key from PEM.
///
/// Accepts PKCS#8 (`PRIVATE KEY`, RSA or ECDSA) and PKCS#1 (`RSA PRIVATE KEY`).
pub fn load_key_pair(key_pem: &str) -> PkiResult<KeyPair> {
    let block = pem::parse(key_pem)
        .map_err(|e| PkiError::Parse(format!("private key is not PEM: {e}")))?;

    match block.tag() {
        "PRIVATE KEY" => KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Parse(format!("unsupported PKCS#8 key: {e}"))),
        "RSA PRIVATE KEY" => {
            let key = RsaPrivateKey::from_pkcs1_pem(key_pem)
                .map_err(|e| PkiError::Parse(format!("invalid PKCS#1 key: {e}")))?;
            rsa_to_key_pair(&key).map_err(PkiError::Parse)
        }
        other => Err(PkiError::Parse(format!("unsupported key block '{other}'"))),
    }
}

/// Which of the supported algorithms a loaded key uses.
pub fn key_algorithm_of(key: &KeyPair) -> Option<KeyAlgorithm> {
    let algorithm = key.algorithm();
    if algorithm == &PKCS_RSA_SHA256 {
        Some(KeyAlgorithm::Rsa2048)
    } else if algorithm == &PKCS_ECDSA_P256_SHA256 {
        Some(KeyAlgorithm::EcdsaP256)
    } else {
        None
    }
}

fn rsa_to_key_pair(key: &RsaPrivateKey) -> Result<KeyPair, String> {
    // Zeroizing<String>, wiped on drop
    let pkcs8 = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| format!("RSA key encoding failed: {e}"))?;
    KeyPair::from_pem(&pkcs8).map_err(|e| format!("RSA key rejected by signer: {e}"))
}
