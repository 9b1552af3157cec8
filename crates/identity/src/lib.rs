//! Device identity lifecycle for the IoT identity service.
//!
//! This crate owns the domain model and the three write paths of the
//! service: registration, enrollment and admin status changes. PKI work is
//! delegated to `iotid-crypto`; persistence to a [`DataStore`].
//!
//! # Lifecycle
//!
//! ```text
//! register_device ──> Waiting ──enroll_device──> Enrolled
//!                      ^   |                        |
//!                      |   v                        |
//!                     Disabled <──update_status─────┘
//! ```
//!
//! - Every device starts in `Waiting`.
//! - `Enrolled` is only reachable by presenting a signed model assertion and
//!   a signed serial assertion that agree with each other.
//! - Admins move devices between `Waiting` and `Disabled`, and may demote an
//!   enrolled device. Demotion does not revoke its certificate.
//!
//! # Concurrency
//!
//! The service holds no locks. Uniqueness and status changes are atomic in
//! the datastore, see [`datastore`].

pub mod assertion;
pub mod datastore;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod registration;
pub mod service;
pub mod status;

pub use assertion::{
    sign_key_id, Assertion, AssertionDecoder, AssertionKind, AssertionSigner, HeaderValue,
};
pub use datastore::{open_store, DataStore, MemoryStore};
#[cfg(feature = "sqlite")]
pub use datastore::SqliteStore;
pub use domain::{Credentials, Device, Enrollment, Organization, Status};
pub use error::{IdentityError, IdentityResult};
pub use service::{IdentityService, RegisterDeviceRequest, RegisterOrganizationRequest};
pub use status::{plan_transition, StatusChange};
