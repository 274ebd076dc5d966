//! SQLite Record Store
//!
//! One SQLite database file per node, opened once per entity table. Each
//! table's connection sits behind its own lock, so writes to one table
//! serialize while writes to different tables only meet at SQLite's own
//! write lock. The database runs in WAL mode with `synchronous = FULL`,
//! which makes every committed write durable on return.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;

use super::schema::{ObjectType, Record, CREATE_TABLES};
use super::RecordStore;
use crate::error::{Error, Result};
use crate::id::RecordIdGenerator;

/// Time a connection waits for SQLite's write lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Record store backed by SQLite
pub struct SqliteRecordStore {
    users: Mutex<Connection>,
    patients: Mutex<Connection>,
    doctors: Mutex<Connection>,
    ids: RecordIdGenerator,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Create or open the record database at `path`
    pub fn open(path: impl AsRef<Path>, node_number: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let users = open_connection(&path)?;
        users.execute_batch(CREATE_TABLES)?;

        let store = Self {
            users: Mutex::new(users),
            patients: Mutex::new(open_connection(&path)?),
            doctors: Mutex::new(open_connection(&path)?),
            ids: RecordIdGenerator::new(node_number)?,
            path,
        };

        tracing::info!("Record store opened at {}", store.path.display());
        Ok(store)
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored records of a kind
    pub async fn count(&self, object_type: ObjectType) -> Result<u64> {
        let conn = self.connection(object_type).lock().await;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", object_type.schema().table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn connection(&self, object_type: ObjectType) -> &Mutex<Connection> {
        match object_type {
            ObjectType::User => &self.users,
            ObjectType::Patient => &self.patients,
            ObjectType::Doctor => &self.doctors,
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, object_type: ObjectType, data: &Record) -> Result<String> {
        let schema = object_type.schema();
        let id = match data.get(schema.id_column).and_then(|v| schema.identifier_of(v)) {
            Some(id) => id,
            None => self.ids.next_id(),
        };
        let bound = schema.bind(data, true)?;

        let columns: Vec<&str> = std::iter::once(schema.id_column)
            .chain(bound.iter().map(|(name, _)| *name))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let values = std::iter::once(rusqlite::types::Value::Text(id.clone()))
            .chain(bound.into_iter().map(|(_, value)| value));

        let conn = self.connection(object_type).lock().await;
        conn.execute(&sql, params_from_iter(values))
            .map_err(|e| write_error(object_type, e))?;

        tracing::debug!("Inserted {} {}", object_type, id);
        Ok(id)
    }

    async fn update(&self, object_type: ObjectType, id: &str, data: &Record) -> Result<()> {
        let schema = object_type.schema();
        let bound = schema.bind(data, false)?;
        if bound.is_empty() {
            return Err(Error::Validation(format!("No {} fields to update", object_type)));
        }

        let assignments: Vec<String> = bound
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{} = ?{}", name, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            schema.table,
            assignments.join(", "),
            schema.id_column,
            bound.len() + 1
        );
        let values = bound
            .into_iter()
            .map(|(_, value)| value)
            .chain(std::iter::once(rusqlite::types::Value::Text(id.to_string())));

        let conn = self.connection(object_type).lock().await;
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| write_error(object_type, e))?;

        if changed == 0 {
            return Err(not_found(object_type, id));
        }
        tracing::debug!("Updated {} {}", object_type, id);
        Ok(())
    }

    async fn delete(&self, object_type: ObjectType, id: &str) -> Result<()> {
        let schema = object_type.schema();
        let mut conn = self.connection(object_type).lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", schema.table, schema.id_column),
            params![id],
        )?;
        if removed == 0 {
            return Err(not_found(object_type, id));
        }

        // Patients and doctors go together with their login row.
        if schema.linked_user {
            let users = tx.execute("DELETE FROM users WHERE UserID = ?1", params![id])?;
            tracing::debug!("Removed {} linked user row(s) for {} {}", users, object_type, id);
        }

        tx.commit()?;
        tracing::debug!("Deleted {} {}", object_type, id);
        Ok(())
    }

    async fn get(&self, object_type: ObjectType, id: &str) -> Result<Option<Record>> {
        let schema = object_type.schema();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            schema.select_list(),
            schema.table,
            schema.id_column
        );

        let conn = self.connection(object_type).lock().await;
        let record = conn
            .query_row(&sql, params![id], |row| schema.read_row(row))
            .optional()?;
        Ok(record)
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    Ok(conn)
}

fn not_found(object_type: ObjectType, id: &str) -> Error {
    Error::NotFound {
        object_type: object_type.to_string(),
        id: id.to_string(),
    }
}

/// Map constraint failures to `IntegrityViolation`, everything else to storage errors
fn write_error(object_type: ObjectType, e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::IntegrityViolation {
                object_type: object_type.to_string(),
                reason: message.unwrap_or_else(|| err.to_string()),
            }
        }
        other => other.into(),
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(format!("SQLite error: {}", e))
    }
}
