//! Settings-driven bootstrap, the way the node binary wires things up

use iotid_core::{Driver, IssuanceMode, Settings};
use iotid_crypto::{load_ca, parse_root_certificate, KeyAlgorithm};
use iotid_identity::{
    open_store, AssertionDecoder, AssertionSigner, IdentityError, IdentityService, Status,
};

use crate::test_utils::*;

#[test]
fn test_external_root_sqlite_bootstrap() {
    init_tracing();
    let certs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    provision_root_ca(certs.path(), "Fleet Root");
    let signer = AssertionSigner::generate("example");

    let db_path = data.path().join("identity.db");
    let mut settings = Settings::from_toml_str(&format!(
        r#"
driver = "sqlite"
datasource = "{}"
issuance = "external-root"
certs_dir = "{}"
key_algorithm = "ecdsa-p256"
mqtt_url = "mqtt.fleet.test"
"#,
        db_path.display(),
        certs.path().display()
    ))
    .unwrap();
    settings.trusted_keys.push(trusted_key(&signer));
    settings.validate().unwrap();
    assert_eq!(settings.driver, Driver::Sqlite);
    assert_eq!(settings.issuance, IssuanceMode::ExternalRoot);

    let decoder = AssertionDecoder::from_trusted_keys(&settings.trusted_keys).unwrap();
    assert_eq!(decoder.trusted_key_count(), 1);
    let service = IdentityService::from_settings(&settings, open_store(&settings).unwrap());

    let org_id = register_organization(&service, "Tenant");
    let device = TestDevice::new("DR1000A111");
    let device_id = device.register(&service, &org_id);

    let (first, second) = decoder
        .decode_pair(device.assertions(&signer).as_bytes())
        .unwrap();
    let enrolled = service.enroll_device(&first, &second).unwrap();
    assert_eq!(enrolled.id, device_id);
    assert_eq!(enrolled.credentials.mqtt_url, "mqtt.fleet.test");

    // device -> organization -> external root
    let root = load_ca(certs.path()).unwrap();
    let org_cert = parse_root_certificate(enrolled.organization.root_cert.as_bytes()).unwrap();
    let leaf = parse_root_certificate(enrolled.credentials.certificate.as_bytes()).unwrap();
    org_cert.verify_issued_by(root.certificate()).unwrap();
    leaf.verify_issued_by(&org_cert).unwrap();
    assert_eq!(leaf.common_name.as_deref(), Some(device_id.as_str()));
    drop(service);

    // State survives a restart
    let reopened = IdentityService::from_settings(&settings, open_store(&settings).unwrap());
    let stored = reopened.device_get(&org_id, &device_id).unwrap();
    assert_eq!(stored.status, Status::Enrolled);
    assert_eq!(stored.device.device_key, device.device_key);
    assert!(matches!(
        reopened.enroll_device(&first, &second),
        Err(IdentityError::AlreadyEnrolled(_))
    ));
}

#[test]
fn test_external_root_missing_ca() {
    let certs = tempfile::tempdir().unwrap();
    let mut settings = fast_settings();
    settings.issuance = IssuanceMode::ExternalRoot;
    settings.certs_dir = certs.path().to_path_buf();

    let service = IdentityService::from_settings(&settings, open_store(&settings).unwrap());
    let err = service
        .register_organization(&iotid_identity::RegisterOrganizationRequest {
            name: "Tenant".into(),
            country: String::new(),
        })
        .unwrap_err();
    assert_eq!(err.code(), "ca_unavailable");
    assert!(service.organization_list().unwrap().is_empty());
}

#[test]
fn test_default_settings_issue_rsa() {
    let settings = Settings::default();
    assert_eq!(settings.key_algorithm, KeyAlgorithm::Rsa2048);

    let service = IdentityService::from_settings(&settings, open_store(&settings).unwrap());
    let org_id = register_organization(&service, "Example");
    let device_id = TestDevice::new("RSA-1").register(&service, &org_id);

    let enrollment = service.device_get(&org_id, &device_id).unwrap();
    assert!(enrollment.credentials.private_key.contains("BEGIN PRIVATE KEY"));
    let org_cert = parse_root_certificate(enrollment.organization.root_cert.as_bytes()).unwrap();
    let leaf = parse_root_certificate(enrollment.credentials.certificate.as_bytes()).unwrap();
    leaf.verify_issued_by(&org_cert).unwrap();
    assert!(org_cert.is_ca);
    assert!(!leaf.is_ca);
}

#[test]
fn test_bad_trusted_key_is_rejected() {
    let mut settings = fast_settings();
    settings.trusted_keys.push(iotid_core::TrustedKey {
        authority_id: "example".into(),
        public_key_hex: "abcd".into(),
    });
    assert!(matches!(
        AssertionDecoder::from_trusted_keys(&settings.trusted_keys),
        Err(IdentityError::Validation(_))
    ));
}
