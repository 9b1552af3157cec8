//! In-memory datastore.
//!
//! All tables sit behind one `RwLock`, so every check-then-write runs under a
//! single write guard.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{
    device_key, enroll_guard, generate_id, require, DataStore, DeviceEnrollment, NewDevice,
    NewOrganization, StatusUpdate,
};
use crate::domain::{Credentials, Device, Enrollment, Organization, Status};
use crate::error::{IdentityError, IdentityResult};

struct DeviceRecord {
    id: String,
    organization_id: String,
    device: Device,
    credentials: Credentials,
    status: Status,
    device_data: String,
}

#[derive(Default)]
struct Tables {
    organizations: HashMap<String, Organization>,
    /// name -> organization id
    organization_names: HashMap<String, String>,
    devices: HashMap<String, DeviceRecord>,
    /// brand/model/serial -> device id
    device_keys: HashMap<String, String>,
}

impl Tables {
    fn enrollment(&self, record: &DeviceRecord) -> IdentityResult<Enrollment> {
        let organization = self
            .organizations
            .get(&record.organization_id)
            .ok_or_else(|| {
                IdentityError::Storage(format!(
                    "device {} references missing organization {}",
                    record.id, record.organization_id
                ))
            })?;

        Ok(Enrollment {
            id: record.id.clone(),
            device: record.device.clone(),
            credentials: record.credentials.clone(),
            organization: organization.clone(),
            status: record.status,
            device_data: record.device_data.clone(),
        })
    }

    fn device_id(&self, brand: &str, model: &str, serial: &str) -> IdentityResult<&String> {
        let key = device_key(brand, model, serial);
        self.device_keys
            .get(&key)
            .ok_or_else(|| IdentityError::NotFound(format!("device `{key}` not found")))
    }
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> IdentityResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| IdentityError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> IdentityResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| IdentityError::Storage("memory store lock poisoned".to_string()))
    }
}

fn device_not_found(id: &str) -> IdentityError {
    IdentityError::NotFound(format!("device `{id}` not found"))
}

impl DataStore for MemoryStore {
    fn create_organization(&self, organization: NewOrganization) -> IdentityResult<String> {
        require("name", &organization.name)?;

        let mut tables = self.write()?;
        if tables.organization_names.contains_key(&organization.name) {
            return Err(IdentityError::Duplicate(format!(
                "organization `{}` already exists",
                organization.name
            )));
        }

        let id = generate_id();
        tables
            .organization_names
            .insert(organization.name.clone(), id.clone());
        tables.organizations.insert(
            id.clone(),
            Organization {
                id: id.clone(),
                name: organization.name,
                country: organization.country,
                root_key: organization.root_key,
                root_cert: organization.root_cert,
            },
        );
        debug!(organization_id = %id, "stored organization");
        Ok(id)
    }

    fn get_organization(&self, id: &str) -> IdentityResult<Organization> {
        self.read()?
            .organizations
            .get(id)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(format!("organization `{id}` not found")))
    }

    fn get_organization_by_name(&self, name: &str) -> IdentityResult<Organization> {
        let tables = self.read()?;
        tables
            .organization_names
            .get(name)
            .and_then(|id| tables.organizations.get(id))
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(format!("organization `{name}` not found")))
    }

    fn list_organizations(&self) -> IdentityResult<Vec<Organization>> {
        let mut organizations: Vec<_> = self.read()?.organizations.values().cloned().collect();
        organizations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(organizations)
    }

    fn create_device(&self, device: NewDevice) -> IdentityResult<String> {
        require("organization ID", &device.organization_id)?;
        require("brand", &device.brand)?;
        require("model name", &device.model)?;
        require("serial number", &device.serial_number)?;

        let mut tables = self.write()?;
        if !tables.organizations.contains_key(&device.organization_id) {
            return Err(IdentityError::NotFound(format!(
                "organization `{}` not found",
                device.organization_id
            )));
        }

        let key = device_key(&device.brand, &device.model, &device.serial_number);
        if tables.device_keys.contains_key(&key) {
            return Err(IdentityError::Duplicate(format!(
                "the device `{key}` is already registered"
            )));
        }

        let id = device.id.unwrap_or_else(generate_id);
        if tables.devices.contains_key(&id) {
            return Err(IdentityError::Duplicate(format!(
                "device id `{id}` is already in use"
            )));
        }

        tables.device_keys.insert(key, id.clone());
        tables.devices.insert(
            id.clone(),
            DeviceRecord {
                id: id.clone(),
                organization_id: device.organization_id,
                device: Device {
                    brand: device.brand,
                    model: device.model,
                    serial_number: device.serial_number,
                    store_id: String::new(),
                    device_key: String::new(),
                },
                credentials: device.credentials,
                status: Status::Waiting,
                device_data: String::new(),
            },
        );
        debug!(device_id = %id, "stored device");
        Ok(id)
    }

    fn get_device(&self, brand: &str, model: &str, serial: &str) -> IdentityResult<Enrollment> {
        let tables = self.read()?;
        let id = tables.device_id(brand, model, serial)?;
        let record = tables.devices.get(id).ok_or_else(|| device_not_found(id))?;
        tables.enrollment(record)
    }

    fn get_device_by_id(&self, id: &str) -> IdentityResult<Enrollment> {
        let tables = self.read()?;
        let record = tables.devices.get(id).ok_or_else(|| device_not_found(id))?;
        tables.enrollment(record)
    }

    fn enroll_device(&self, enrollment: &DeviceEnrollment) -> IdentityResult<Enrollment> {
        let mut tables = self.write()?;
        let id = tables
            .device_id(&enrollment.brand, &enrollment.model, &enrollment.serial_number)?
            .clone();
        let record = tables
            .devices
            .get_mut(&id)
            .ok_or_else(|| device_not_found(&id))?;

        if record.status != Status::Waiting {
            return Err(enroll_guard(record.status, &record.device.natural_key()));
        }
        record.device.store_id = enrollment.store_id.clone();
        record.device.device_key = enrollment.device_key.clone();
        record.status = Status::Enrolled;

        let record = tables.devices.get(&id).ok_or_else(|| device_not_found(&id))?;
        tables.enrollment(record)
    }

    fn update_device_status(&self, id: &str, update: &StatusUpdate) -> IdentityResult<()> {
        let mut tables = self.write()?;
        let record = tables
            .devices
            .get_mut(id)
            .ok_or_else(|| device_not_found(id))?;

        if record.status != update.expected {
            return Err(IdentityError::InvalidState(format!(
                "device `{id}` is {}, expected {}",
                record.status, update.expected
            )));
        }
        record.status = update.status;
        record.device_data = update.device_data.clone();
        Ok(())
    }

    fn update_device_data(&self, id: &str, device_data: &str) -> IdentityResult<()> {
        let mut tables = self.write()?;
        let record = tables
            .devices
            .get_mut(id)
            .ok_or_else(|| device_not_found(id))?;
        record.device_data = device_data.to_string();
        Ok(())
    }

    fn list_devices(&self, organization_id: &str) -> IdentityResult<Vec<Enrollment>> {
        let tables = self.read()?;
        let mut enrollments = tables
            .devices
            .values()
            .filter(|record| record.organization_id == organization_id)
            .map(|record| tables.enrollment(record))
            .collect::<IdentityResult<Vec<_>>>()?;
        enrollments.sort_by_key(|e| e.device.natural_key());
        Ok(enrollments)
    }
}
