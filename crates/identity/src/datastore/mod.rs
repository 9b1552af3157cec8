//! Datastore boundary.
//!
//! The identity service performs no locking of its own. Implementations of
//! [`DataStore`] provide two guarantees:
//!
//! 1. Uniqueness checks and inserts are atomic: of two concurrent registrations
//!    of the same organization name or device identity, exactly one succeeds and
//!    the other fails with [`IdentityError::Duplicate`].
//! 2. Status changes are compare-and-set: [`DataStore::enroll_device`] only
//!    succeeds from `Waiting`, and [`DataStore::update_device_status`] only
//!    succeeds while the stored status equals [`StatusUpdate::expected`].

use std::sync::Arc;

use iotid_core::{Driver, Settings};

use crate::domain::{Credentials, Enrollment, Organization, Status};
use crate::error::{IdentityError, IdentityResult};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Organization to be inserted.
#[derive(Clone)]
pub struct NewOrganization {
    pub name: String,
    pub country: String,
    pub root_key: String,
    pub root_cert: String,
}

/// Device registration to be inserted, always in `Waiting`.
#[derive(Clone)]
pub struct NewDevice {
    /// Pre-generated id; the store generates one when `None`
    pub id: Option<String>,
    pub organization_id: String,
    pub brand: String,
    pub model: String,
    pub serial_number: String,
    pub credentials: Credentials,
}

/// Values recorded when a device enrolls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEnrollment {
    pub brand: String,
    pub model: String,
    pub serial_number: String,
    pub store_id: String,
    pub device_key: String,
}

/// Compare-and-set status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Status the caller observed
    pub expected: Status,
    pub status: Status,
    pub device_data: String,
}

/// Persistence for organizations and enrollments.
pub trait DataStore: Send + Sync {
    /// Insert an organization and return its generated id.
    fn create_organization(&self, organization: NewOrganization) -> IdentityResult<String>;

    fn get_organization(&self, id: &str) -> IdentityResult<Organization>;

    fn get_organization_by_name(&self, name: &str) -> IdentityResult<Organization>;

    fn list_organizations(&self) -> IdentityResult<Vec<Organization>>;

    /// Insert a device in `Waiting` status and return its id.
    fn create_device(&self, device: NewDevice) -> IdentityResult<String>;

    /// Look up an enrollment by `(brand, model, serial)`.
    fn get_device(&self, brand: &str, model: &str, serial: &str) -> IdentityResult<Enrollment>;

    fn get_device_by_id(&self, id: &str) -> IdentityResult<Enrollment>;

    /// Record the device key and store and move the device to `Enrolled`.
    ///
    /// Fails with `AlreadyEnrolled` or `Disabled` if the stored status is not
    /// `Waiting` at the time of the write.
    fn enroll_device(&self, enrollment: &DeviceEnrollment) -> IdentityResult<Enrollment>;

    /// Write status and device data together if the status still equals
    /// `update.expected`; otherwise fail with `InvalidState`.
    fn update_device_status(&self, id: &str, update: &StatusUpdate) -> IdentityResult<()>;

    /// Overwrite the device data, leaving the status untouched.
    fn update_device_data(&self, id: &str, device_data: &str) -> IdentityResult<()>;

    /// Enrollments of one organization; empty for an unknown organization.
    fn list_devices(&self, organization_id: &str) -> IdentityResult<Vec<Enrollment>>;
}

/// Generate a new random identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Open the store selected by `driver` and `datasource`.
pub fn open_store(settings: &Settings) -> IdentityResult<Arc<dyn DataStore>> {
    match settings.driver {
        Driver::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        Driver::Sqlite if settings.datasource.is_empty() => {
            Ok(Arc::new(SqliteStore::open_in_memory()?))
        }
        #[cfg(feature = "sqlite")]
        Driver::Sqlite => Ok(Arc::new(SqliteStore::open(&settings.datasource)?)),
        #[cfg(not(feature = "sqlite"))]
        Driver::Sqlite => Err(IdentityError::Storage(
            "built without the `sqlite` feature".to_string(),
        )),
    }
}

pub(crate) fn require(field: &str, value: &str) -> IdentityResult<()> {
    if value.trim().is_empty() {
        return Err(IdentityError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

pub(crate) fn device_key(brand: &str, model: &str, serial: &str) -> String {
    format!("{brand}/{model}/{serial}")
}

/// Error for a device that cannot leave its current status by enrolling.
pub(crate) fn enroll_guard(status: Status, key: &str) -> IdentityError {
    match status {
        Status::Enrolled => IdentityError::AlreadyEnrolled(key.to_string()),
        Status::Disabled => IdentityError::Disabled(key.to_string()),
        Status::Waiting => IdentityError::InvalidState(format!(
            "device `{key}` changed status while enrolling"
        )),
    }
}
