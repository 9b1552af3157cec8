//! Organization and device registration.

use iotid_crypto::CertificateAuthority;
use tracing::{info, warn};

use crate::datastore::{device_key, generate_id, require, NewDevice, NewOrganization};
use crate::domain::Credentials;
use crate::error::{IdentityError, IdentityResult};
use crate::service::{IdentityService, RegisterDeviceRequest, RegisterOrganizationRequest};

impl IdentityService {
    /// Register an organization and issue its CA. Returns the organization id.
    pub fn register_organization(
        &self,
        request: &RegisterOrganizationRequest,
    ) -> IdentityResult<String> {
        require("name", &request.name)?;

        match self.store.get_organization_by_name(&request.name) {
            Ok(_) => {
                warn!(name = %request.name, "organization already exists");
                return Err(IdentityError::Duplicate(format!(
                    "organization `{}` already exists",
                    request.name
                )));
            }
            Err(IdentityError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let issued = self
            .issuer
            .issue_organization(&request.name, &request.country)?;

        let id = self.store.create_organization(NewOrganization {
            name: request.name.clone(),
            country: request.country.clone(),
            root_key: issued.private_key_pem.to_string(),
            root_cert: issued.certificate_pem,
        })?;

        info!(organization_id = %id, name = %request.name, "registered organization");
        Ok(id)
    }

    /// Register a device in `Waiting` status and issue its client certificate.
    /// Returns the device id.
    pub fn register_device(&self, request: &RegisterDeviceRequest) -> IdentityResult<String> {
        require("organization ID", &request.organization_id)?;
        require("brand", &request.brand)?;
        require("model name", &request.model)?;
        require("serial number", &request.serial_number)?;

        let organization = self.store.get_organization(&request.organization_id)?;

        let key = device_key(&request.brand, &request.model, &request.serial_number);
        match self
            .store
            .get_device(&request.brand, &request.model, &request.serial_number)
        {
            // A row with an undecodable status still occupies the identity
            Ok(_) | Err(IdentityError::InvalidState(_)) => {
                warn!(device = %key, "device already registered");
                return Err(IdentityError::Duplicate(format!(
                    "the device `{key}` is already registered"
                )));
            }
            Err(IdentityError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let device_id = generate_id();
        let organization_ca =
            CertificateAuthority::from_pem(&organization.root_cert, &organization.root_key)?;
        let issued = self
            .issuer
            .issue_device(&organization_ca, &organization.name, &device_id)?;

        let id = self.store.create_device(NewDevice {
            id: Some(device_id),
            organization_id: organization.id,
            brand: request.brand.clone(),
            model: request.model.clone(),
            serial_number: request.serial_number.clone(),
            credentials: Credentials {
                private_key: issued.private_key_pem.to_string(),
                certificate: issued.certificate_pem,
                mqtt_url: self.mqtt_url.clone(),
                mqtt_port: self.mqtt_port.clone(),
            },
        })?;

        info!(device_id = %id, device = %key, "registered device");
        Ok(id)
    }
}
