//! The identity service and its read operations.
//!
//! Write paths live next to it: [`crate::registration`], [`crate::enrollment`]
//! and [`crate::status`] each add methods to [`IdentityService`].

use std::sync::Arc;

use iotid_core::Settings;
use iotid_crypto::CertificateIssuer;
use serde::Deserialize;

use crate::datastore::DataStore;
use crate::domain::{Enrollment, Organization};
use crate::error::{IdentityError, IdentityResult};

/// Request to register an organization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterOrganizationRequest {
    pub name: String,
    #[serde(default)]
    pub country: String,
}

/// Request to register a device under an organization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterDeviceRequest {
    #[serde(rename = "orgid")]
    pub organization_id: String,
    pub brand: String,
    pub model: String,
    #[serde(rename = "serial")]
    pub serial_number: String,
}

/// Registration, enrollment and status management over a datastore.
///
/// Every call runs to completion synchronously; the only shared state is the
/// datastore, which provides the atomicity the operations rely on.
#[derive(Clone)]
pub struct IdentityService {
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) issuer: CertificateIssuer,
    pub(crate) mqtt_url: String,
    pub(crate) mqtt_port: String,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn DataStore>,
        issuer: CertificateIssuer,
        mqtt_url: impl Into<String>,
        mqtt_port: impl Into<String>,
    ) -> Self {
        Self {
            store,
            issuer,
            mqtt_url: mqtt_url.into(),
            mqtt_port: mqtt_port.into(),
        }
    }

    pub fn from_settings(settings: &Settings, store: Arc<dyn DataStore>) -> Self {
        Self::new(
            store,
            CertificateIssuer::from_settings(settings),
            settings.mqtt_url.clone(),
            settings.mqtt_port.clone(),
        )
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn issuer(&self) -> &CertificateIssuer {
        &self.issuer
    }

    pub fn organization_list(&self) -> IdentityResult<Vec<Organization>> {
        self.store.list_organizations()
    }

    /// Devices of an organization; empty when the organization is unknown.
    pub fn device_list(&self, organization_id: &str) -> IdentityResult<Vec<Enrollment>> {
        self.store.list_devices(organization_id)
    }

    /// A device, provided it belongs to `organization_id`.
    pub fn device_get(&self, organization_id: &str, device_id: &str) -> IdentityResult<Enrollment> {
        let enrollment = self.store.get_device_by_id(device_id)?;
        if enrollment.organization.id != organization_id {
            return Err(IdentityError::NotFound(format!(
                "device `{device_id}` not found in organization `{organization_id}`"
            )));
        }
        Ok(enrollment)
    }
}
