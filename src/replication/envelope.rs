//! Operation Envelope
//!
//! The unit of replication exchanged between nodes over HTTP as JSON:
//!
//! ```json
//! {"action": "insert", "object_type": "patient", "data": {...}, "request_id": "9f1c..."}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{ObjectType, Record};

/// Write action carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Insert, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Past tense used in response messages ("patient inserted successfully")
    pub fn past_tense(&self) -> &'static str {
        match self {
            Action::Insert => "inserted",
            Action::Update => "updated",
            Action::Delete => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Action::Insert),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(Error::MalformedEnvelope(format!("unknown action '{}'", other))),
        }
    }
}

/// A validated envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    pub object_type: ObjectType,
    /// Payload: full record for inserts, changed fields plus identifier for
    /// updates, identifier only for deletes
    pub data: Value,
    pub request_id: String,
}

impl Envelope {
    /// Wrap a committed local write
    pub fn new(action: Action, object_type: ObjectType, data: Value, request_id: String) -> Self {
        Self {
            action,
            object_type,
            data,
            request_id,
        }
    }

    /// Identifier of the record the envelope targets
    pub fn record_id(&self) -> Option<String> {
        self.object_type.schema().identifier_of(&self.data)
    }

    /// Payload as a record; a bare identifier becomes `{id_column: id}`
    pub fn record(&self) -> Record {
        match &self.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut record = Record::new();
                record.insert(self.object_type.schema().id_column.to_string(), other.clone());
                record
            }
        }
    }
}

/// Envelope as received off the wire, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl InboundEnvelope {
    /// Structural validation: payload present, known kind and action, request id
    pub fn validate(self) -> Result<Envelope> {
        let data = match self.data {
            Some(data) if !is_empty_payload(&data) => data,
            _ => {
                return Err(Error::MalformedEnvelope(format!(
                    "missing data to process for action {:?}, object_type {:?}",
                    self.action.as_deref().unwrap_or("?"),
                    self.object_type.as_deref().unwrap_or("?"),
                )))
            }
        };

        let object_type = self
            .object_type
            .ok_or_else(|| Error::MalformedEnvelope("missing object_type".into()))?
            .parse::<ObjectType>()?;
        let action = self
            .action
            .ok_or_else(|| Error::MalformedEnvelope("missing action".into()))?
            .parse::<Action>()?;

        let request_id = match self.request_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(Error::MalformedEnvelope("missing request_id".into())),
        };

        Ok(Envelope {
            action,
            object_type,
            data,
            request_id,
        })
    }
}

fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> InboundEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::new(
            Action::Insert,
            ObjectType::Patient,
            json!({"PatientID": "1", "Name": "Ann"}),
            "abc123".into(),
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "action": "insert",
                "object_type": "patient",
                "data": {"PatientID": "1", "Name": "Ann"},
                "request_id": "abc123"
            })
        );
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let envelope = inbound(json!({
            "action": "delete",
            "object_type": "doctor",
            "data": "d-9",
            "request_id": "r1"
        }))
        .validate()
        .unwrap();
        assert_eq!(envelope.action, Action::Delete);
        assert_eq!(envelope.record_id(), Some("d-9".into()));
        assert_eq!(envelope.record().get("DoctorID"), Some(&json!("d-9")));
    }

    #[test]
    fn test_validate_rejects_missing_or_empty_data() {
        for data in [None, Some(json!(null)), Some(json!({})), Some(json!(""))] {
            let mut envelope = inbound(json!({
                "action": "insert",
                "object_type": "user",
                "request_id": "r1"
            }));
            envelope.data = data;
            assert!(matches!(envelope.validate(), Err(Error::MalformedEnvelope(_))));
        }
    }

    #[test]
    fn test_validate_rejects_unknown_names_and_missing_request_id() {
        let unknown_type = inbound(json!({
            "action": "insert", "object_type": "nurse", "data": {"x": 1}, "request_id": "r"
        }));
        assert!(matches!(unknown_type.validate(), Err(Error::MalformedEnvelope(_))));

        let unknown_action = inbound(json!({
            "action": "upsert", "object_type": "user", "data": {"x": 1}, "request_id": "r"
        }));
        assert!(matches!(unknown_action.validate(), Err(Error::MalformedEnvelope(_))));

        let no_request = inbound(json!({
            "action": "insert", "object_type": "user", "data": {"x": 1}
        }));
        assert!(matches!(no_request.validate(), Err(Error::MalformedEnvelope(_))));
    }
}
