//! Enrollment: trading a pair of signed assertions for an `Enrolled` device.
//!
//! The two assertions are cross-checked before anything is read from the
//! datastore, so a forged or inconsistent pair never costs a lookup.

use tracing::{info, warn};

use crate::assertion::{Assertion, AssertionKind};
use crate::datastore::{device_key, enroll_guard, require, DeviceEnrollment};
use crate::domain::{Enrollment, Status};
use crate::error::{IdentityError, IdentityResult};
use crate::service::IdentityService;

pub const HEADER_BRAND: &str = "brand-id";
pub const HEADER_MODEL: &str = "model";
pub const HEADER_SERIAL: &str = "serial";
pub const HEADER_DEVICE_KEY: &str = "device-key";
pub const HEADER_STORE: &str = "store";

/// Order a pair as `(model, serial)`, whichever way it arrived.
pub fn pair_assertions<'a>(
    first: &'a Assertion,
    second: &'a Assertion,
) -> IdentityResult<(&'a Assertion, &'a Assertion)> {
    match (first.kind(), second.kind()) {
        (Some(AssertionKind::Model), Some(AssertionKind::Serial)) => Ok((first, second)),
        (Some(AssertionKind::Serial), Some(AssertionKind::Model)) => Ok((second, first)),
        _ => Err(IdentityError::AssertionType(format!(
            "expected a model and a serial assertion, got `{}` and `{}`",
            first.type_name(),
            second.type_name()
        ))),
    }
}

/// Enrollment request extracted from a validated assertion pair.
pub fn enrollment_request(
    model_assertion: &Assertion,
    serial_assertion: &Assertion,
) -> IdentityResult<DeviceEnrollment> {
    let brand = model_assertion.header_str(HEADER_BRAND)?;
    if brand != serial_assertion.header_str(HEADER_BRAND)? {
        return Err(IdentityError::Mismatch(format!(
            "model and serial assertions disagree on `{HEADER_BRAND}`"
        )));
    }
    let model = model_assertion.header_str(HEADER_MODEL)?;
    if model != serial_assertion.header_str(HEADER_MODEL)? {
        return Err(IdentityError::Mismatch(format!(
            "model and serial assertions disagree on `{HEADER_MODEL}`"
        )));
    }

    let serial_number = serial_assertion.header_str(HEADER_SERIAL)?;
    let device_key = serial_assertion.header_str(HEADER_DEVICE_KEY)?;
    let store_id = model_assertion
        .optional_header_str(HEADER_STORE)?
        .unwrap_or_default();

    require(HEADER_BRAND, brand)?;
    require(HEADER_MODEL, model)?;
    require(HEADER_SERIAL, serial_number)?;
    require(HEADER_DEVICE_KEY, device_key)?;

    Ok(DeviceEnrollment {
        brand: brand.to_string(),
        model: model.to_string(),
        serial_number: serial_number.to_string(),
        store_id: store_id.to_string(),
        device_key: device_key.to_string(),
    })
}

impl IdentityService {
    /// Enroll the device named by a model and a serial assertion.
    ///
    /// The assertions must already be signature-verified, see
    /// [`crate::assertion::AssertionDecoder::decode_pair`].
    pub fn enroll_device(&self, first: &Assertion, second: &Assertion) -> IdentityResult<Enrollment> {
        let (model_assertion, serial_assertion) = pair_assertions(first, second)?;
        let request = enrollment_request(model_assertion, serial_assertion)?;
        let key = device_key(&request.brand, &request.model, &request.serial_number);

        let current = match self
            .store
            .get_device(&request.brand, &request.model, &request.serial_number)
        {
            Ok(enrollment) => enrollment,
            Err(IdentityError::NotFound(_)) => {
                warn!(device = %key, "enrollment for unregistered device");
                return Err(IdentityError::NotRegistered(key));
            }
            Err(e) => return Err(e),
        };

        if current.status != Status::Waiting {
            warn!(device = %key, status = %current.status, "enrollment rejected");
            return Err(enroll_guard(current.status, &key));
        }

        let enrollment = self.store.enroll_device(&request)?;
        info!(device_id = %enrollment.id, device = %key, "device enrolled");
        Ok(enrollment)
    }
}
