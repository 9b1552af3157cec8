//! Organization and device certificate issuance.

use std::fmt;
use std::path::PathBuf;

use iotid_core::{IssuanceMode, Settings};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use zeroize::Zeroizing;

use crate::ca::{generate_serial, load_ca, CertificateAuthority};
use crate::error::{PkiError, PkiResult};
use crate::keys::{generate_key_pair, KeyAlgorithm};

/// Validity of every issued certificate (ten years).
pub const VALIDITY_DAYS: i64 = 3650;

/// Where organization certificates get their signature from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceStrategy {
    /// Each organization is its own self-signed root
    SelfSigned,
    /// Organizations are intermediates under the CA stored in `ca_dir`
    ExternalRoot { ca_dir: PathBuf },
}

impl IssuanceStrategy {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.issuance {
            IssuanceMode::SelfSigned => IssuanceStrategy::SelfSigned,
            IssuanceMode::ExternalRoot => IssuanceStrategy::ExternalRoot {
                ca_dir: settings.certs_dir.clone(),
            },
        }
    }
}

/// A freshly issued private key and certificate, both PEM.
pub struct IssuedCredential {
    pub private_key_pem: Zeroizing<String>,
    pub certificate_pem: String,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("private_key_pem", &"<redacted>")
            .field("certificate_pem", &self.certificate_pem)
            .finish()
    }
}

/// Issues organization CAs and device client certificates.
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    strategy: IssuanceStrategy,
    algorithm: KeyAlgorithm,
}

impl CertificateIssuer {
    pub fn new(strategy: IssuanceStrategy, algorithm: KeyAlgorithm) -> Self {
        Self {
            strategy,
            algorithm,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            IssuanceStrategy::from_settings(settings),
            settings.key_algorithm,
        )
    }

    pub fn strategy(&self) -> &IssuanceStrategy {
        &self.strategy
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Issue an organization CA certificate.
    ///
    /// `name` and `country` are not validated here. An empty country is left
    /// out of the subject.
    pub fn issue_organization(&self, name: &str, country: &str) -> PkiResult<IssuedCredential> {
        let key = generate_key_pair(self.algorithm)?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        dn.push(DnType::OrganizationName, name);
        if !country.is_empty() {
            dn.push(DnType::CountryName, country);
        }

        let mut params = base_params(dn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];

        let cert = match &self.strategy {
            IssuanceStrategy::SelfSigned => params.self_signed(&key).map_err(|e| {
                PkiError::CertificateCreation(format!("self-signing failed: {e}"))
            })?,
            IssuanceStrategy::ExternalRoot { ca_dir } => {
                let root = load_ca(ca_dir)?;
                root.sign(params, &key)?
            }
        };

        debug!(organization = name, strategy = ?self.strategy, "issued organization certificate");
        Ok(credential(&key, &cert))
    }

    /// Issue a device client certificate signed by the organization's CA.
    pub fn issue_device(
        &self,
        organization_ca: &CertificateAuthority,
        organization_name: &str,
        device_id: &str,
    ) -> PkiResult<IssuedCredential> {
        let key = generate_key_pair(self.algorithm)?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, device_id);
        dn.push(DnType::OrganizationName, organization_name);

        let mut params = base_params(dn);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let cert = organization_ca.sign(params, &key)?;

        debug!(
            device_id,
            organization = organization_name,
            "issued device certificate"
        );
        Ok(credential(&key, &cert))
    }
}

fn base_params(dn: DistinguishedName) -> CertificateParams {
    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.serial_number = Some(generate_serial().into());
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    params
}

fn credential(key: &KeyPair, cert: &rcgen::Certificate) -> IssuedCredential {
    IssuedCredential {
        private_key_pem: Zeroizing::new(key.serialize_pem()),
        certificate_pem: cert.pem(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{parse_root_certificate, CA_CERT_FILE, CA_KEY_FILE};

    fn issuer() -> CertificateIssuer {
        CertificateIssuer::new(IssuanceStrategy::SelfSigned, KeyAlgorithm::EcdsaP256)
    }

    #[test]
    fn test_organization_certificate_is_ten_year_ca() {
        let issued = issuer().issue_organization("Example Inc", "GB").unwrap();
        let cert = parse_root_certificate(issued.certificate_pem.as_bytes()).unwrap();

        assert!(cert.is_ca);
        assert_eq!(cert.common_name.as_deref(), Some("Example Inc"));
        assert_eq!(cert.organization.as_deref(), Some("Example Inc"));
        assert_eq!(cert.subject, cert.issuer);

        let days = (cert.not_after - cert.not_before) / 86_400;
        assert_eq!(days, VALIDITY_DAYS);
    }

    #[test]
    fn test_organization_without_country() {
        let issued = issuer().issue_organization("No Country", "").unwrap();
        let cert = parse_root_certificate(issued.certificate_pem.as_bytes()).unwrap();
        assert!(!cert.subject.contains("C="));
    }

    #[test]
    fn test_device_certificate_chains_to_organization() {
        let issuer = issuer();
        let org = issuer.issue_organization("Example Inc", "US").unwrap();
        let org_ca =
            CertificateAuthority::from_pem(&org.certificate_pem, &org.private_key_pem).unwrap();

        let device = issuer
            .issue_device(&org_ca, "Example Inc", "device-0001")
            .unwrap();
        let cert = parse_root_certificate(device.certificate_pem.as_bytes()).unwrap();

        assert!(!cert.is_ca);
        assert_eq!(cert.common_name.as_deref(), Some("device-0001"));
        assert_eq!(cert.organization.as_deref(), Some("Example Inc"));
        cert.verify_issued_by(org_ca.certificate()).unwrap();
    }

    #[test]
    fn test_device_certificate_does_not_chain_to_other_organization() {
        let issuer = issuer();
        let org_a = issuer.issue_organization("Org A", "US").unwrap();
        let org_b = issuer.issue_organization("Org B", "US").unwrap();
        let ca_a =
            CertificateAuthority::from_pem(&org_a.certificate_pem, &org_a.private_key_pem).unwrap();
        let root_b = parse_root_certificate(org_b.certificate_pem.as_bytes()).unwrap();

        let device = issuer.issue_device(&ca_a, "Org A", "device-x").unwrap();
        let cert = parse_root_certificate(device.certificate_pem.as_bytes()).unwrap();

        assert!(matches!(
            cert.verify_issued_by(&root_b),
            Err(PkiError::ChainVerification(_))
        ));
    }

    #[test]
    fn test_serials_differ_between_certificates() {
        let issuer = issuer();
        let a = issuer.issue_organization("Serial A", "US").unwrap();
        let b = issuer.issue_organization("Serial B", "US").unwrap();
        let a = parse_root_certificate(a.certificate_pem.as_bytes()).unwrap();
        let b = parse_root_certificate(b.certificate_pem.as_bytes()).unwrap();
        assert_ne!(a.serial_hex, b.serial_hex);
    }

    #[test]
    fn test_external_root_issuance() {
        let dir = tempfile::tempdir().unwrap();
        let root = issuer().issue_organization("Provisioned Root", "US").unwrap();
        std::fs::write(dir.path().join(CA_CERT_FILE), &root.certificate_pem).unwrap();
        std::fs::write(dir.path().join(CA_KEY_FILE), root.private_key_pem.as_bytes()).unwrap();

        let external = CertificateIssuer::new(
            IssuanceStrategy::ExternalRoot {
                ca_dir: dir.path().to_path_buf(),
            },
            KeyAlgorithm::EcdsaP256,
        );
        let org = external.issue_organization("Tenant", "DE").unwrap();
        let org_cert = parse_root_certificate(org.certificate_pem.as_bytes()).unwrap();
        let root_cert = parse_root_certificate(root.certificate_pem.as_bytes()).unwrap();

        assert!(org_cert.is_ca);
        org_cert.verify_issued_by(&root_cert).unwrap();
    }

    #[test]
    fn test_external_root_missing_ca() {
        let dir = tempfile::tempdir().unwrap();
        let external = CertificateIssuer::new(
            IssuanceStrategy::ExternalRoot {
                ca_dir: dir.path().join("absent"),
            },
            KeyAlgorithm::EcdsaP256,
        );
        assert!(matches!(
            external.issue_organization("Tenant", "DE"),
            Err(PkiError::CaUnavailable(_))
        ));
    }

    #[test]
    fn test_strategy_from_settings() {
        let mut settings = Settings::default();
        assert_eq!(
            IssuanceStrategy::from_settings(&settings),
            IssuanceStrategy::SelfSigned
        );

        settings.issuance = IssuanceMode::ExternalRoot;
        settings.certs_dir = PathBuf::from("/etc/iotid/ca");
        assert_eq!(
            IssuanceStrategy::from_settings(&settings),
            IssuanceStrategy::ExternalRoot {
                ca_dir: PathBuf::from("/etc/iotid/ca")
            }
        );
        assert_eq!(
            CertificateIssuer::from_settings(&settings).algorithm(),
            KeyAlgorithm::Rsa2048
        );
    }
}
