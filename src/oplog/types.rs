use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::time::now_iso8601;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OperationKind::Create),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record describing a single create/update/delete against a
/// note. This struct is both the change-log row (minus the local recorder
/// column) and the wire record carried inside an encrypted frame; payloads
/// never contain an `embeddings` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: String,
    pub note_id: String,
    pub operation_type: OperationKind,
    pub lamport_clock: u64,
    pub origin_device: String,
    /// ISO-8601 wall time on the originating device; informational only.
    pub timestamp: String,
    /// Serialised partial note as a JSON string.
    pub payload: String,
}

impl Operation {
    /// Builds a freshly identified operation for a local user action.
    pub fn originate(
        kind: OperationKind,
        note_id: impl Into<String>,
        payload: &serde_json::Value,
        lamport_clock: u64,
        origin_device: impl Into<String>,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4().to_string(),
            note_id: note_id.into(),
            operation_type: kind,
            lamport_clock,
            origin_device: origin_device.into(),
            timestamp: now_iso8601(),
            payload: payload.to_string(),
        }
    }

    pub fn payload_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serialises_to_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&OperationKind::Create).unwrap(),
            "\"create\""
        );
        assert_eq!(OperationKind::parse("delete"), Some(OperationKind::Delete));
        assert_eq!(OperationKind::parse("merge"), None);
    }

    #[test]
    fn operation_round_trips_through_json() {
        let op = Operation::originate(
            OperationKind::Update,
            "note-1",
            &json!({"title": "New"}),
            7,
            "device-a",
        );

        let encoded = serde_json::to_string(&op).unwrap();
        let decoded: Operation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.payload_value().unwrap(), json!({"title": "New"}));
    }
}
