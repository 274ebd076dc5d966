//! Entity schemas
//!
//! Describes the replicable entity kinds, their identifier column and the
//! attribute columns the record store accepts, and converts between JSON
//! payloads and SQLite values.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A record as it travels through the API and envelopes
pub type Record = Map<String, Value>;

/// Replicable entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    User,
    Patient,
    Doctor,
}

impl ObjectType {
    /// Every replicable kind
    pub const ALL: [ObjectType; 3] = [ObjectType::User, ObjectType::Patient, ObjectType::Doctor];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Patient => "patient",
            ObjectType::Doctor => "doctor",
        }
    }

    /// Storage schema for this kind
    pub fn schema(&self) -> &'static EntitySchema {
        match self {
            ObjectType::User => &USER,
            ObjectType::Patient => &PATIENT,
            ObjectType::Doctor => &DOCTOR,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(ObjectType::User),
            "patient" => Ok(ObjectType::Patient),
            "doctor" => Ok(ObjectType::Doctor),
            other => Err(Error::MalformedEnvelope(format!("unknown object_type '{}'", other))),
        }
    }
}

/// Storage type of an attribute column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// Calendar date stored as `YYYY-MM-DD`
    Date,
    Bool,
}

/// One attribute column
#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

/// Table layout for one entity kind
#[derive(Debug)]
pub struct EntitySchema {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [Column],
    /// Shares its identifier with a row in `users` that is removed alongside it
    pub linked_user: bool,
}

const fn col(name: &'static str, kind: ColumnKind, required: bool) -> Column {
    Column { name, kind, required }
}

static USER: EntitySchema = EntitySchema {
    table: "users",
    id_column: "UserID",
    columns: &[
        col("Username", ColumnKind::Text, true),
        col("Password", ColumnKind::Text, true),
        col("Role", ColumnKind::Text, true),
        col("IsActive", ColumnKind::Bool, false),
    ],
    linked_user: false,
};

static PATIENT: EntitySchema = EntitySchema {
    table: "patients",
    id_column: "PatientID",
    columns: &[
        col("Name", ColumnKind::Text, true),
        col("DateOfBirth", ColumnKind::Date, true),
        col("Gender", ColumnKind::Text, true),
        col("PhoneNumber", ColumnKind::Integer, true),
    ],
    linked_user: true,
};

static DOCTOR: EntitySchema = EntitySchema {
    table: "doctors",
    id_column: "DoctorID",
    columns: &[
        col("Name", ColumnKind::Text, true),
        col("Specialization", ColumnKind::Text, true),
        col("PhoneNumber", ColumnKind::Integer, true),
        col("DepartmentID", ColumnKind::Integer, false),
    ],
    linked_user: true,
};

/// DDL for every entity table
pub(crate) const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    UserID TEXT PRIMARY KEY,
    Username TEXT NOT NULL UNIQUE,
    Password TEXT NOT NULL,
    Role TEXT NOT NULL,
    IsActive INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS patients (
    PatientID TEXT PRIMARY KEY,
    Name TEXT NOT NULL,
    DateOfBirth TEXT NOT NULL,
    Gender TEXT NOT NULL,
    PhoneNumber INTEGER NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS doctors (
    DoctorID TEXT PRIMARY KEY,
    Name TEXT NOT NULL,
    Specialization TEXT NOT NULL,
    PhoneNumber INTEGER NOT NULL UNIQUE,
    DepartmentID INTEGER
);
"#;

impl EntitySchema {
    /// Identifier carried by a payload, if any
    ///
    /// Accepts either an object holding the identifier column or a bare
    /// string/number standing for the identifier itself.
    pub fn identifier_of(&self, payload: &Value) -> Option<String> {
        let raw = match payload {
            Value::Object(map) => map.get(self.id_column)?,
            other => other,
        };
        match raw {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Validate and convert the attribute columns present in `record`
    ///
    /// With `require_all` every required column must be present. The
    /// identifier column and unknown attributes are skipped.
    pub fn bind(&self, record: &Record, require_all: bool) -> Result<Vec<(&'static str, SqlValue)>> {
        let mut bound = Vec::new();
        let mut missing = Vec::new();

        for column in self.columns {
            match record.get(column.name) {
                Some(value) if !value.is_null() || !column.required => {
                    bound.push((column.name, to_sql(column, value)?));
                }
                _ if require_all && column.required => missing.push(column.name),
                _ => {}
            }
        }

        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        for key in record.keys() {
            if key != self.id_column && !self.columns.iter().any(|c| c.name == key) {
                tracing::debug!("Ignoring unknown {} attribute {}", self.table, key);
            }
        }

        Ok(bound)
    }

    /// `SELECT` list covering the identifier and every attribute
    pub(crate) fn select_list(&self) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns.iter().map(|c| c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rebuild a JSON record from a row produced by `select_list`
    pub(crate) fn read_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let mut record = Record::new();
        record.insert(self.id_column.to_string(), Value::String(row.get(0)?));
        for (i, column) in self.columns.iter().enumerate() {
            let value: SqlValue = row.get(i + 1)?;
            record.insert(column.name.to_string(), from_sql(column.kind, value));
        }
        Ok(record)
    }
}

fn to_sql(column: &Column, value: &Value) -> Result<SqlValue> {
    let invalid = |expected: &str| {
        Error::Validation(format!("{} must be {}, got {}", column.name, expected, value))
    };

    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match column.kind {
        ColumnKind::Text => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            _ => Err(invalid("text")),
        },
        ColumnKind::Integer => match value {
            Value::Number(n) => n.as_i64().map(SqlValue::Integer).ok_or_else(|| invalid("an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| invalid("an integer")),
            _ => Err(invalid("an integer")),
        },
        ColumnKind::Date => match value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|d| SqlValue::Text(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| invalid("a YYYY-MM-DD date")),
            _ => Err(invalid("a YYYY-MM-DD date")),
        },
        ColumnKind::Bool => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
            Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                Ok(SqlValue::Integer(n.as_i64().unwrap_or_default()))
            }
            _ => Err(invalid("a boolean")),
        },
    }
}

fn from_sql(kind: ColumnKind, value: SqlValue) -> Value {
    match (kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnKind::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(f)) => Value::from(f),
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Blob(b)) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_type_parsing() {
        assert_eq!("patient".parse::<ObjectType>().unwrap(), ObjectType::Patient);
        assert!(matches!("nurse".parse::<ObjectType>(), Err(Error::MalformedEnvelope(_))));
        assert_eq!(serde_json::to_value(ObjectType::Doctor).unwrap(), json!("doctor"));
    }

    #[test]
    fn test_identifier_of() {
        let schema = ObjectType::Patient.schema();
        assert_eq!(schema.identifier_of(&json!({"PatientID": "42"})), Some("42".into()));
        assert_eq!(schema.identifier_of(&json!({"PatientID": 42})), Some("42".into()));
        assert_eq!(schema.identifier_of(&json!("42")), Some("42".into()));
        assert_eq!(schema.identifier_of(&json!({"UserID": "42"})), None);
        assert_eq!(schema.identifier_of(&json!("  ")), None);
    }

    #[test]
    fn test_bind_reports_all_missing_fields() {
        let err = ObjectType::Doctor
            .schema()
            .bind(&record(json!({"Name": "House"})), true)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Specialization"));
        assert!(message.contains("PhoneNumber"));
        assert!(!message.contains("DepartmentID"));
    }

    #[test]
    fn test_bind_checks_types() {
        let schema = ObjectType::Patient.schema();
        let ok = schema
            .bind(
                &record(json!({
                    "Name": "Ann",
                    "DateOfBirth": "1990-01-01",
                    "Gender": "F",
                    "PhoneNumber": "5551234",
                    "Ward": "B"
                })),
                true,
            )
            .unwrap();
        assert_eq!(ok.len(), 4);
        assert!(ok.contains(&("PhoneNumber", SqlValue::Integer(5551234))));

        let bad_date = schema.bind(&record(json!({"DateOfBirth": "01/01/1990"})), false);
        assert!(matches!(bad_date, Err(Error::Validation(_))));
    }

    #[test]
    fn test_partial_bind_for_update() {
        let bound = ObjectType::Patient
            .schema()
            .bind(&record(json!({"PatientID": "1", "Gender": "M"})), false)
            .unwrap();
        assert_eq!(bound, vec![("Gender", SqlValue::Text("M".into()))]);
    }
}
