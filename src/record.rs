//! Persisted form of an entity.
//!
//! A record is the minimal projection needed to reconstruct an equivalent
//! entity: the `type` discriminator that selects a factory, the lifecycle
//! timestamps, and whatever type-specific fields the entity itself chooses
//! to carry. The registry treats those extra fields as opaque JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Serialized, storable form of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityRecord {
    /// Type discriminator selecting the factory that rebuilds this record.
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Stable identity within the owning registry. Absent on records that
    /// have never been live; the registry assigns one on construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Creation time in epoch milliseconds, carried through reloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,

    /// Expiry time in epoch milliseconds. Absent or zero means the entity
    /// never expires on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_time: Option<i64>,

    /// Type-specific payload, opaque to the registry.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl EntityRecord {
    /// Creates an empty record for the given entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_create_time(mut self, create_time: i64) -> Self {
        self.create_time = Some(create_time);
        self
    }

    pub fn with_kill_time(mut self, kill_time: i64) -> Self {
        self.kill_time = Some(kill_time);
        self
    }

    /// Adds a type-specific field to the opaque payload.
    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Looks up a type-specific field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Sets a type-specific field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(name.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serde_round_trip() {
        let record = EntityRecord::new("ticker")
            .with_id("3")
            .with_create_time(1_700_000_000_000)
            .with_kill_time(1_700_000_600_000)
            .with_field("text", json!("hello"))
            .with_field("interval", json!(30));

        let serialized = serde_json::to_string(&record).unwrap();
        let parsed: EntityRecord = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.field("text"), Some(&json!("hello")));
    }

    #[test]
    fn test_optional_fields_stay_absent() {
        let record = EntityRecord::new("ticker");
        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.get("type"), Some(&json!("ticker")));
        assert!(!object.contains_key("id"));
        assert!(!object.contains_key("create_time"));
        assert!(!object.contains_key("kill_time"));
    }

    #[test]
    fn test_opaque_fields_flatten_into_the_object() {
        let record = EntityRecord::new("greeter").with_field("channel", json!("#general"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["channel"], json!("#general"));

        let parsed: EntityRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.field("channel"), Some(&json!("#general")));
    }
}
