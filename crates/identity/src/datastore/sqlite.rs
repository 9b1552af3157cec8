//! SQLite datastore.
//!
//! Uniqueness is enforced by `UNIQUE` constraints; status changes are guarded
//! `UPDATE ... WHERE status = ?` statements inside immediate transactions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use tracing::{debug, error, info};

use super::{
    device_key, enroll_guard, generate_id, require, DataStore, DeviceEnrollment, NewDevice,
    NewOrganization, StatusUpdate,
};
use crate::domain::{Credentials, Device, Enrollment, Organization, Status};
use crate::error::{IdentityError, IdentityResult};

const ENROLLMENT_SELECT: &str = r#"
    SELECT d.id, d.brand, d.model, d.serial_number, d.store_id, d.device_key,
           d.private_key, d.certificate, d.mqtt_url, d.mqtt_port,
           d.status, d.device_data,
           o.id, o.name, o.country, o.root_key, o.root_cert
    FROM device d
    JOIN organization o ON o.id = d.org_id
"#;

/// Enrollment row before the status code is decoded.
struct EnrollmentRow {
    enrollment: Enrollment,
    status_code: i64,
}

impl EnrollmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EnrollmentRow {
            enrollment: Enrollment {
                id: row.get(0)?,
                device: Device {
                    brand: row.get(1)?,
                    model: row.get(2)?,
                    serial_number: row.get(3)?,
                    store_id: row.get(4)?,
                    device_key: row.get(5)?,
                },
                credentials: Credentials {
                    private_key: row.get(6)?,
                    certificate: row.get(7)?,
                    mqtt_url: row.get(8)?,
                    mqtt_port: row.get(9)?,
                },
                // Replaced by `decode`
                status: Status::Waiting,
                device_data: row.get(11)?,
                organization: Organization {
                    id: row.get(12)?,
                    name: row.get(13)?,
                    country: row.get(14)?,
                    root_key: row.get(15)?,
                    root_cert: row.get(16)?,
                },
            },
            status_code: row.get(10)?,
        })
    }

    fn decode(self) -> IdentityResult<Enrollment> {
        let status = Status::from_code(self.status_code).ok_or_else(|| {
            IdentityError::InvalidState(format!(
                "device `{}` has unknown status code {}",
                self.enrollment.id, self.status_code
            ))
        })?;
        Ok(Enrollment {
            status,
            ..self.enrollment
        })
    }
}

fn storage(e: rusqlite::Error) -> IdentityError {
    error!(error = %e, "sqlite operation failed");
    IdentityError::Storage(e.to_string())
}

fn violates(e: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == extended_code
    )
}

fn is_primary_key_violation(e: &rusqlite::Error) -> bool {
    violates(e, rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    violates(e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) || is_primary_key_violation(e)
}

fn device_not_found(id: &str) -> IdentityError {
    IdentityError::NotFound(format!("device `{id}` not found"))
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening identity database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IdentityError::Storage(format!("{}: {e}", parent.display())))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(storage)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(storage)?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> IdentityResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(storage)?)
    }

    fn with_connection(conn: Connection) -> IdentityResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(storage)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> IdentityResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS organization (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                country TEXT NOT NULL DEFAULT '',
                root_key TEXT NOT NULL,
                root_cert TEXT NOT NULL,
                created INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS device (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL REFERENCES organization(id),
                brand TEXT NOT NULL,
                model TEXT NOT NULL,
                serial_number TEXT NOT NULL,
                store_id TEXT NOT NULL DEFAULT '',
                device_key TEXT NOT NULL DEFAULT '',
                private_key TEXT NOT NULL,
                certificate TEXT NOT NULL,
                mqtt_url TEXT NOT NULL,
                mqtt_port TEXT NOT NULL,
                status INTEGER NOT NULL,
                device_data TEXT NOT NULL DEFAULT '',
                created INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                modified INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE (brand, model, serial_number)
            );

            CREATE INDEX IF NOT EXISTS idx_device_org ON device(org_id);
            "#,
        )
        .map_err(storage)?;

        Ok(())
    }

    fn lock(&self) -> IdentityResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IdentityError::Storage("sqlite connection lock poisoned".to_string()))
    }

    fn query_organization(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> IdentityResult<Organization> {
        let sql = format!(
            "SELECT id, name, country, root_key, root_cert FROM organization WHERE {column} = ?1"
        );
        conn.query_row(&sql, [value], |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
                country: row.get(2)?,
                root_key: row.get(3)?,
                root_cert: row.get(4)?,
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                IdentityError::NotFound(format!("organization `{value}` not found"))
            }
            e => storage(e),
        })
    }

    fn query_enrollment(
        conn: &Connection,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> IdentityResult<Option<Enrollment>> {
        let sql = format!("{ENROLLMENT_SELECT} WHERE {filter}");
        conn.query_row(&sql, params, EnrollmentRow::from_row)
            .optional()
            .map_err(storage)?
            .map(EnrollmentRow::decode)
            .transpose()
    }

    fn status_of(conn: &Connection, id: &str) -> IdentityResult<Option<i64>> {
        conn.query_row("SELECT status FROM device WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage)
    }
}

impl DataStore for SqliteStore {
    fn create_organization(&self, organization: NewOrganization) -> IdentityResult<String> {
        require("name", &organization.name)?;

        let id = generate_id();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO organization (id, name, country, root_key, root_cert)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                organization.name,
                organization.country,
                organization.root_key,
                organization.root_cert
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                IdentityError::Duplicate(format!(
                    "organization `{}` already exists",
                    organization.name
                ))
            } else {
                storage(e)
            }
        })?;

        debug!(organization_id = %id, "stored organization");
        Ok(id)
    }

    fn get_organization(&self, id: &str) -> IdentityResult<Organization> {
        let conn = self.lock()?;
        Self::query_organization(&conn, "id", id)
    }

    fn get_organization_by_name(&self, name: &str) -> IdentityResult<Organization> {
        let conn = self.lock()?;
        Self::query_organization(&conn, "name", name)
    }

    fn list_organizations(&self) -> IdentityResult<Vec<Organization>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, country, root_key, root_cert FROM organization ORDER BY name")
            .map_err(storage)?;
        let organizations = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    country: row.get(2)?,
                    root_key: row.get(3)?,
                    root_cert: row.get(4)?,
                })
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(organizations)
    }

    fn create_device(&self, device: NewDevice) -> IdentityResult<String> {
        require("organization ID", &device.organization_id)?;
        require("brand", &device.brand)?;
        require("model name", &device.model)?;
        require("serial number", &device.serial_number)?;

        let id = device.id.clone().unwrap_or_else(generate_id);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;

        let org_exists: Option<String> = tx
            .query_row(
                "SELECT id FROM organization WHERE id = ?1",
                [&device.organization_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        if org_exists.is_none() {
            return Err(IdentityError::NotFound(format!(
                "organization `{}` not found",
                device.organization_id
            )));
        }

        tx.execute(
            "INSERT INTO device (id, org_id, brand, model, serial_number,
                                 private_key, certificate, mqtt_url, mqtt_port, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                device.organization_id,
                device.brand,
                device.model,
                device.serial_number,
                device.credentials.private_key,
                device.credentials.certificate,
                device.credentials.mqtt_url,
                device.credentials.mqtt_port,
                Status::Waiting.code()
            ],
        )
        .map_err(|e| {
            if is_primary_key_violation(&e) {
                IdentityError::Duplicate(format!("device id `{id}` is already in use"))
            } else if is_unique_violation(&e) {
                IdentityError::Duplicate(format!(
                    "the device `{}` is already registered",
                    device_key(&device.brand, &device.model, &device.serial_number)
                ))
            } else {
                storage(e)
            }
        })?;
        tx.commit().map_err(storage)?;

        debug!(device_id = %id, "stored device");
        Ok(id)
    }

    fn get_device(&self, brand: &str, model: &str, serial: &str) -> IdentityResult<Enrollment> {
        let conn = self.lock()?;
        Self::query_enrollment(
            &conn,
            "d.brand = ?1 AND d.model = ?2 AND d.serial_number = ?3",
            &[&brand, &model, &serial],
        )?
        .ok_or_else(|| {
            IdentityError::NotFound(format!(
                "device `{}` not found",
                device_key(brand, model, serial)
            ))
        })
    }

    fn get_device_by_id(&self, id: &str) -> IdentityResult<Enrollment> {
        let conn = self.lock()?;
        Self::query_enrollment(&conn, "d.id = ?1", &[&id])?.ok_or_else(|| device_not_found(id))
    }

    fn enroll_device(&self, enrollment: &DeviceEnrollment) -> IdentityResult<Enrollment> {
        let key = device_key(
            &enrollment.brand,
            &enrollment.model,
            &enrollment.serial_number,
        );
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;

        let current = Self::query_enrollment(
            &tx,
            "d.brand = ?1 AND d.model = ?2 AND d.serial_number = ?3",
            &[
                &enrollment.brand,
                &enrollment.model,
                &enrollment.serial_number,
            ],
        )?
        .ok_or_else(|| IdentityError::NotFound(format!("device `{key}` not found")))?;

        if current.status != Status::Waiting {
            return Err(enroll_guard(current.status, &key));
        }

        let changed = tx
            .execute(
                "UPDATE device
                 SET store_id = ?1, device_key = ?2, status = ?3,
                     modified = strftime('%s', 'now')
                 WHERE id = ?4 AND status = ?5",
                params![
                    enrollment.store_id,
                    enrollment.device_key,
                    Status::Enrolled.code(),
                    current.id,
                    Status::Waiting.code()
                ],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(enroll_guard(Status::Waiting, &key));
        }
        tx.commit().map_err(storage)?;

        Ok(Enrollment {
            device: Device {
                store_id: enrollment.store_id.clone(),
                device_key: enrollment.device_key.clone(),
                ..current.device
            },
            status: Status::Enrolled,
            ..current
        })
    }

    fn update_device_status(&self, id: &str, update: &StatusUpdate) -> IdentityResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE device
                 SET status = ?1, device_data = ?2, modified = strftime('%s', 'now')
                 WHERE id = ?3 AND status = ?4",
                params![
                    update.status.code(),
                    update.device_data,
                    id,
                    update.expected.code()
                ],
            )
            .map_err(storage)?;

        if changed == 0 {
            return match Self::status_of(&conn, id)? {
                None => Err(device_not_found(id)),
                Some(code) => Err(IdentityError::InvalidState(format!(
                    "device `{id}` has status code {code}, expected {}",
                    update.expected
                ))),
            };
        }
        Ok(())
    }

    fn update_device_data(&self, id: &str, device_data: &str) -> IdentityResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE device SET device_data = ?1, modified = strftime('%s', 'now') WHERE id = ?2",
                params![device_data, id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(device_not_found(id));
        }
        Ok(())
    }

    fn list_devices(&self, organization_id: &str) -> IdentityResult<Vec<Enrollment>> {
        let conn = self.lock()?;
        let sql = format!(
            "{ENROLLMENT_SELECT} WHERE d.org_id = ?1 ORDER BY d.brand, d.model, d.serial_number"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage)?;
        let rows = stmt
            .query_map([organization_id], EnrollmentRow::from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        rows.into_iter().map(EnrollmentRow::decode).collect()
    }
}
