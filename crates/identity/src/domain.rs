//! Domain model: organizations, devices, credentials and enrollments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IdentityError;

/// Lifecycle status of an enrollment.
///
/// Serialized as its numeric code (`1`, `2`, `3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Status {
    Waiting,
    Enrolled,
    Disabled,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Waiting, Status::Enrolled, Status::Disabled];

    pub fn code(self) -> i64 {
        match self {
            Status::Waiting => 1,
            Status::Enrolled => 2,
            Status::Disabled => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Status> {
        match code {
            1 => Some(Status::Waiting),
            2 => Some(Status::Enrolled),
            3 => Some(Status::Disabled),
            _ => None,
        }
    }
}

impl TryFrom<i64> for Status {
    type Error = IdentityError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Status::from_code(code)
            .ok_or_else(|| IdentityError::InvalidState(format!("unknown status code {code}")))
    }
}

impl From<Status> for i64 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Waiting => "waiting",
            Status::Enrolled => "enrolled",
            Status::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// A tenant and its certificate authority.
///
/// The CA private key never leaves the service: it is skipped on serialization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(skip_serializing, default)]
    pub root_key: String,
    #[serde(rename = "rootcert")]
    pub root_cert: String,
}

impl fmt::Debug for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Organization")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("country", &self.country)
            .finish_non_exhaustive()
    }
}

/// Device identity. `(brand, model, serial_number)` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Device {
    pub brand: String,
    pub model: String,
    #[serde(rename = "serial")]
    pub serial_number: String,
    #[serde(rename = "store", default)]
    pub store_id: String,
    #[serde(rename = "deviceKey", default)]
    pub device_key: String,
}

impl Device {
    /// `brand/model/serial`, used in messages and logs.
    pub fn natural_key(&self) -> String {
        format!("{}/{}/{}", self.brand, self.model, self.serial_number)
    }
}

/// Client credentials issued to a device at registration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub private_key: String,
    pub certificate: String,
    pub mqtt_url: String,
    pub mqtt_port: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &"<redacted>")
            .field("mqtt_url", &self.mqtt_url)
            .field("mqtt_port", &self.mqtt_port)
            .finish_non_exhaustive()
    }
}

/// Registration record of a device: identity, credentials, owner and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub device: Device,
    pub credentials: Credentials,
    pub organization: Organization,
    pub status: Status,
    #[serde(rename = "deviceData", default)]
    pub device_data: String,
}
