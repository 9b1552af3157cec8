//! Multi-tenant lifecycle scenarios

use std::sync::Arc;
use std::thread;

use iotid_identity::{
    open_store, AssertionDecoder, AssertionSigner, IdentityError, IdentityService, Status,
};

use crate::test_utils::*;

struct Fixture {
    service: IdentityService,
    signer: AssertionSigner,
    decoder: AssertionDecoder,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let settings = fast_settings();
        let signer = AssertionSigner::generate("example");
        let decoder = AssertionDecoder::new().with_trusted_key("example", signer.verifying_key());
        Self {
            service: IdentityService::from_settings(&settings, open_store(&settings).unwrap()),
            signer,
            decoder,
        }
    }

    fn enroll(&self, device: &TestDevice) -> Result<Status, IdentityError> {
        let (first, second) = self
            .decoder
            .decode_pair(device.assertions(&self.signer).as_bytes())?;
        self.service
            .enroll_device(&first, &second)
            .map(|enrollment| enrollment.status)
    }
}

#[test]
fn test_tenants_are_isolated() {
    let fx = Fixture::new();
    let alpha = register_organization(&fx.service, "Alpha");
    let beta = register_organization(&fx.service, "Beta");

    let a1 = TestDevice::new("A-1").register(&fx.service, &alpha);
    TestDevice::new("A-2").register(&fx.service, &alpha);
    let b1 = TestDevice::new("B-1").register(&fx.service, &beta);

    assert_eq!(fx.service.device_list(&alpha).unwrap().len(), 2);
    assert_eq!(fx.service.device_list(&beta).unwrap().len(), 1);

    assert!(matches!(
        fx.service.device_get(&beta, &a1),
        Err(IdentityError::NotFound(_))
    ));
    assert!(matches!(
        fx.service.device_update(&alpha, &b1, Status::Disabled, None),
        Err(IdentityError::NotFound(_))
    ));
    assert_eq!(
        fx.service.device_get(&beta, &b1).unwrap().status,
        Status::Waiting
    );

    let names: Vec<_> = fx
        .service
        .organization_list()
        .unwrap()
        .into_iter()
        .map(|org| org.name)
        .collect();
    assert_eq!(names, ["Alpha", "Beta"]);
}

#[test]
fn test_full_lifecycle() {
    let fx = Fixture::new();
    let org = register_organization(&fx.service, "Example");
    let device = TestDevice::new("LIFE-1");
    let id = device.register(&fx.service, &org);

    // Disabled devices cannot enroll
    fx.service
        .device_update(&org, &id, Status::Disabled, Some("held at customs"))
        .unwrap();
    assert!(matches!(fx.enroll(&device), Err(IdentityError::Disabled(_))));

    fx.service.device_update(&org, &id, Status::Waiting, None).unwrap();
    assert_eq!(fx.enroll(&device).unwrap(), Status::Enrolled);
    assert!(matches!(
        fx.enroll(&device),
        Err(IdentityError::AlreadyEnrolled(_))
    ));

    // Admins can never set Enrolled directly
    assert!(matches!(
        fx.service.device_update(&org, &id, Status::Enrolled, None),
        Err(IdentityError::ForbiddenTransition(_))
    ));

    let change = fx
        .service
        .device_update(&org, &id, Status::Disabled, Some("decommissioned"))
        .unwrap();
    assert_eq!(change.previous, Status::Enrolled);
    assert_eq!(change.current, Status::Disabled);

    let stored = fx.service.device_get(&org, &id).unwrap();
    assert_eq!(stored.device_data, "decommissioned");
    assert_eq!(stored.device.device_key, device.device_key);
}

#[test]
fn test_unregistered_device_cannot_enroll() {
    let fx = Fixture::new();
    register_organization(&fx.service, "Example");
    let err = fx.enroll(&TestDevice::new("GHOST")).unwrap_err();
    assert_eq!(err.code(), "not_registered");
}

#[test]
fn test_parallel_tenants() {
    let fx = Arc::new(Fixture::new());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                let org = register_organization(&fx.service, &format!("Tenant {i}"));
                let device = TestDevice::new(&format!("PAR-{i}"));
                device.register(&fx.service, &org);
                fx.enroll(&device).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Status::Enrolled);
    }
    assert_eq!(fx.service.organization_list().unwrap().len(), 4);
}
