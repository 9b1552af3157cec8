//! End-to-end scenarios across the identity workspace
//!
//! This test suite validates:
//! - Settings-driven bootstrap of store, issuer and assertion decoder
//! - The device → organization → external root chain of trust
//! - Persistence of the enrollment lifecycle across SQLite reopen
//! - Tenant isolation of the read and admin operations

pub mod test_utils;

#[cfg(test)]
mod bootstrap_tests;

#[cfg(test)]
mod lifecycle_tests;
