//! Fixtures shared by the scenario tests

use std::path::Path;

use iotid_core::{Settings, TrustedKey};
use iotid_crypto::{CertificateIssuer, IssuanceStrategy, KeyAlgorithm, CA_CERT_FILE, CA_KEY_FILE};
use iotid_identity::{
    AssertionSigner, HeaderValue, IdentityService, RegisterDeviceRequest,
    RegisterOrganizationRequest,
};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Provision an external root CA into `dir` as `ca.crt` / `ca.key`.
pub fn provision_root_ca(dir: &Path, name: &str) {
    let bootstrap = CertificateIssuer::new(IssuanceStrategy::SelfSigned, KeyAlgorithm::EcdsaP256);
    let root = bootstrap.issue_organization(name, "US").unwrap();
    std::fs::write(dir.join(CA_CERT_FILE), &root.certificate_pem).unwrap();
    std::fs::write(dir.join(CA_KEY_FILE), root.private_key_pem.as_bytes()).unwrap();
}

/// Settings entry trusting `signer`.
pub fn trusted_key(signer: &AssertionSigner) -> TrustedKey {
    TrustedKey {
        authority_id: signer.authority_id().to_string(),
        public_key_hex: hex::encode(signer.verifying_key().to_bytes()),
    }
}

/// Fast settings: memory store, self-signed ECDSA issuance.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.key_algorithm = KeyAlgorithm::EcdsaP256;
    settings
}

/// A device to register and enroll.
pub struct TestDevice {
    pub brand: &'static str,
    pub model: &'static str,
    pub serial: String,
    pub device_key: String,
}

impl TestDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            brand: "example",
            model: "drone-1000",
            serial: serial.to_string(),
            device_key: format!("AcbBTQRWhcGAARAA{}", hex::encode(serial)),
        }
    }

    pub fn register(&self, service: &IdentityService, organization_id: &str) -> String {
        service
            .register_device(&RegisterDeviceRequest {
                organization_id: organization_id.to_string(),
                brand: self.brand.to_string(),
                model: self.model.to_string(),
                serial_number: self.serial.clone(),
            })
            .unwrap()
    }

    /// Signed model + serial stream for this device.
    pub fn assertions(&self, signer: &AssertionSigner) -> String {
        let model = signer
            .sign(
                "model",
                &[
                    ("brand-id", HeaderValue::text(self.brand)),
                    ("model", HeaderValue::text(self.model)),
                ],
            )
            .unwrap();
        let serial = signer
            .sign(
                "serial",
                &[
                    ("brand-id", HeaderValue::text(self.brand)),
                    ("model", HeaderValue::text(self.model)),
                    ("serial", HeaderValue::text(self.serial.as_str())),
                    ("device-key", HeaderValue::text(self.device_key.as_str())),
                ],
            )
            .unwrap();
        format!("{model}\n{serial}")
    }
}

pub fn register_organization(service: &IdentityService, name: &str) -> String {
    service
        .register_organization(&RegisterOrganizationRequest {
            name: name.to_string(),
            country: "GB".to_string(),
        })
        .unwrap()
}
