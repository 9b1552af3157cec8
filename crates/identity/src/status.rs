//! Admin status changes between `Waiting` and `Disabled`.

use tracing::{info, warn};

use crate::datastore::StatusUpdate;
use crate::domain::Status;
use crate::error::{IdentityError, IdentityResult};
use crate::service::IdentityService;

/// Outcome of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: Status,
    pub current: Status,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }
}

/// Status to write for an admin request, or `None` for a no-op.
///
/// `Enrolled` is only reachable through enrollment.
pub fn plan_transition(current: Status, target: Status) -> IdentityResult<Option<Status>> {
    match (current, target) {
        (_, Status::Enrolled) => Err(IdentityError::ForbiddenTransition(format!(
            "cannot move a device from {current} to enrolled"
        ))),
        (Status::Waiting, Status::Waiting) | (Status::Disabled, Status::Disabled) => Ok(None),
        (Status::Waiting, Status::Disabled)
        | (Status::Disabled, Status::Waiting)
        | (Status::Enrolled, Status::Waiting)
        | (Status::Enrolled, Status::Disabled) => Ok(Some(target)),
    }
}

impl IdentityService {
    /// Move a device to `target` and optionally replace its metadata.
    ///
    /// Changed metadata is written even when the transition itself is a no-op
    /// or is later rejected by the store.
    pub fn update_status(
        &self,
        device_id: &str,
        target: Status,
        device_data: Option<&str>,
    ) -> IdentityResult<StatusChange> {
        if target == Status::Enrolled {
            warn!(device_id, "rejected transition to enrolled");
            return Err(IdentityError::ForbiddenTransition(
                "enrolled is only reachable by enrolling the device".to_string(),
            ));
        }

        let current = self.store.get_device_by_id(device_id)?;

        let device_data = match device_data {
            Some(data) if data != current.device_data => {
                self.store.update_device_data(device_id, data)?;
                data.to_string()
            }
            _ => current.device_data.clone(),
        };

        let Some(status) = plan_transition(current.status, target)? else {
            return Ok(StatusChange {
                previous: current.status,
                current: current.status,
            });
        };

        self.store.update_device_status(
            device_id,
            &StatusUpdate {
                expected: current.status,
                status,
                device_data,
            },
        )?;

        if current.status == Status::Enrolled {
            // Issued credentials stay valid until revocation exists
            warn!(device_id, to = %status, "enrolled device demoted; credentials not revoked");
        }
        info!(device_id, from = %current.status, to = %status, "device status changed");
        Ok(StatusChange {
            previous: current.status,
            current: status,
        })
    }

    /// [`IdentityService::update_status`] scoped to one organization.
    pub fn device_update(
        &self,
        organization_id: &str,
        device_id: &str,
        target: Status,
        device_data: Option<&str>,
    ) -> IdentityResult<StatusChange> {
        if target == Status::Enrolled {
            return self.update_status(device_id, target, device_data);
        }
        self.device_get(organization_id, device_id)?;
        self.update_status(device_id, target, device_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = Status> {
        prop::sample::select(Status::ALL.to_vec())
    }

    fn admin_target() -> impl Strategy<Value = Status> {
        prop::sample::select(vec![Status::Waiting, Status::Disabled, Status::Enrolled])
    }

    #[test]
    fn test_transition_table() {
        let cases = [
            (Status::Waiting, Status::Waiting, None),
            (Status::Waiting, Status::Disabled, Some(Status::Disabled)),
            (Status::Disabled, Status::Waiting, Some(Status::Waiting)),
            (Status::Disabled, Status::Disabled, None),
            (Status::Enrolled, Status::Waiting, Some(Status::Waiting)),
            (Status::Enrolled, Status::Disabled, Some(Status::Disabled)),
        ];
        for (current, target, expected) in cases {
            assert_eq!(plan_transition(current, target).unwrap(), expected, "{current} -> {target}");
        }
    }

    #[test]
    fn test_enrolled_target_always_forbidden() {
        for current in Status::ALL {
            assert!(matches!(
                plan_transition(current, Status::Enrolled),
                Err(IdentityError::ForbiddenTransition(_))
            ));
        }

        let service = service();
        let (_, device_id) = registered_device(&service, "S1");
        assert!(matches!(
            service.update_status(&device_id, Status::Enrolled, Some("meta")),
            Err(IdentityError::ForbiddenTransition(_))
        ));
        // Rejected before the metadata write
        let stored = service.store().get_device_by_id(&device_id).unwrap();
        assert!(stored.device_data.is_empty());
        // Also for unknown devices
        assert!(matches!(
            service.update_status("missing", Status::Enrolled, None),
            Err(IdentityError::ForbiddenTransition(_))
        ));
    }

    #[test]
    fn test_disable_and_reenable() {
        let service = service();
        let (_, device_id) = registered_device(&service, "S1");

        let change = service
            .update_status(&device_id, Status::Disabled, Some("lost"))
            .unwrap();
        assert_eq!(change.previous, Status::Waiting);
        assert_eq!(change.current, Status::Disabled);
        let stored = service.store().get_device_by_id(&device_id).unwrap();
        assert_eq!(stored.status, Status::Disabled);
        assert_eq!(stored.device_data, "lost");

        let change = service.update_status(&device_id, Status::Waiting, None).unwrap();
        assert_eq!(change.current, Status::Waiting);
        // Metadata left untouched when none is given
        let stored = service.store().get_device_by_id(&device_id).unwrap();
        assert_eq!(stored.device_data, "lost");
    }

    #[test]
    fn test_noop_still_updates_metadata() {
        let service = service();
        let (_, device_id) = registered_device(&service, "S1");

        let change = service
            .update_status(&device_id, Status::Waiting, Some("{\"site\":\"north\"}"))
            .unwrap();
        assert!(change.is_noop());
        let stored = service.store().get_device_by_id(&device_id).unwrap();
        assert_eq!(stored.status, Status::Waiting);
        assert_eq!(stored.device_data, "{\"site\":\"north\"}");
    }

    #[test]
    fn test_unknown_device() {
        let service = service();
        assert!(matches!(
            service.update_status("missing", Status::Disabled, None),
            Err(IdentityError::NotFound(_))
        ));
    }

    #[test]
    fn test_device_update_checks_organization() {
        let service = service();
        let (org_id, device_id) = registered_device(&service, "S1");

        assert!(matches!(
            service.device_update("other-org", &device_id, Status::Disabled, None),
            Err(IdentityError::NotFound(_))
        ));
        let change = service
            .device_update(&org_id, &device_id, Status::Disabled, None)
            .unwrap();
        assert_eq!(change.current, Status::Disabled);
    }

    proptest! {
        #[test]
        fn transition_table_holds_for_every_pair(current in any_status(), target in admin_target()) {
            match plan_transition(current, target) {
                Err(IdentityError::ForbiddenTransition(_)) => {
                    prop_assert_eq!(target, Status::Enrolled);
                }
                Ok(None) => {
                    prop_assert_eq!(current, target);
                    prop_assert_ne!(current, Status::Enrolled);
                }
                Ok(Some(next)) => {
                    prop_assert_eq!(next, target);
                    prop_assert_ne!(current, target);
                    prop_assert_ne!(target, Status::Enrolled);
                }
                Err(other) => {
                    prop_assert!(false, "unexpected error {}", other);
                }
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn stored_status_follows_admin_requests(
            targets in prop::collection::vec(admin_target(), 1..8)
        ) {
            let service = service();
            let (_, device_id) = registered_device(&service, "S1");
            let mut expected = Status::Waiting;

            for target in targets {
                let result = service.update_status(&device_id, target, None);
                if target == Status::Enrolled {
                    prop_assert!(matches!(result, Err(IdentityError::ForbiddenTransition(_))));
                } else {
                    let change = result.unwrap();
                    prop_assert_eq!(change.previous, expected);
                    prop_assert_eq!(change.current, target);
                    expected = target;
                }
                let stored = service.store().get_device_by_id(&device_id).unwrap();
                prop_assert_eq!(stored.status, expected);
            }
        }
    }
}
