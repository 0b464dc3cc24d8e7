//! Schema-light records.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the mandatory identity field.
pub const ID_FIELD: &str = "id";

/// An open set of fields, used for partial updates.
pub type Fields = Map<String, Value>;

/// A record: an open key/value map with a mandatory string `id`.
///
/// No schema is enforced beyond the `id`. Nested objects and arrays are
/// kept as-is.
///
/// # Invariants
///
/// - `id` is always present and is a JSON string
/// - `id` never changes after construction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    /// Creates a record holding only an `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self { fields }
    }

    /// Builds a record from a field map.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingId`] if `id` is absent or not a string.
    pub fn from_fields(fields: Fields) -> StorageResult<Self> {
        match fields.get(ID_FIELD) {
            Some(Value::String(_)) => Ok(Self { fields }),
            _ => Err(StorageError::MissingId),
        }
    }

    /// Builds a record from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingId`] if the value is not an object with
    /// a string `id`.
    pub fn from_value(value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            _ => Err(StorageError::MissingId),
        }
    }

    /// Returns the record id.
    pub fn id(&self) -> &str {
        match self.fields.get(ID_FIELD) {
            Some(Value::String(id)) => id,
            // Unreachable by construction.
            _ => "",
        }
    }

    /// Returns a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a field as a string slice, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Sets a field. Setting `id` is ignored.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a field in place. Setting `id` is ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != ID_FIELD {
            self.fields.insert(key, value.into());
        }
    }

    /// Merges a partial field set into this record, keeping the `id`.
    pub fn merge(&mut self, partial: &Fields) {
        for (key, value) in partial {
            if key != ID_FIELD {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Returns the underlying field map.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Consumes the record, returning its fields.
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Returns the record as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Fields::deserialize(deserializer)?;
        Record::from_fields(fields).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<Value> for Record {
    type Error = StorageError;

    fn try_from(value: Value) -> StorageResult<Self> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_string_id() {
        assert!(Record::from_value(json!({"email": "a@x.com"})).is_err());
        assert!(Record::from_value(json!({"id": 7})).is_err());
        assert!(Record::from_value(json!("r1")).is_err());
        assert_eq!(Record::from_value(json!({"id": "r1"})).unwrap().id(), "r1");
    }

    #[test]
    fn id_is_immutable() {
        let mut record = Record::new("r1").with("id", "other");
        assert_eq!(record.id(), "r1");

        let mut partial = Fields::new();
        partial.insert("id".into(), json!("r2"));
        partial.insert("email".into(), json!("b@x.com"));
        record.merge(&partial);

        assert_eq!(record.id(), "r1");
        assert_eq!(record.get_str("email"), Some("b@x.com"));
    }

    #[test]
    fn deserialize_rejects_missing_id() {
        let result: Result<Record, _> = serde_json::from_str(r#"{"name":"x"}"#);
        assert!(result.is_err());

        let record: Record = serde_json::from_str(r#"{"id":"a","tags":["x"]}"#).unwrap();
        assert_eq!(record.get("tags"), Some(&json!(["x"])));
    }

    #[test]
    fn serializes_as_plain_object() {
        let record = Record::new("r1").with("nested", json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": "r1", "nested": {"a": 1}})
        );
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_keeps_id_and_applies_other_fields(
                id in "[a-z0-9]{1,12}",
                fields in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8),
            ) {
                let mut record = Record::new(id.clone());
                let mut partial = Fields::new();
                for (key, value) in &fields {
                    partial.insert(key.clone(), json!(value));
                }
                record.merge(&partial);

                prop_assert_eq!(record.id(), id.as_str());
                for (key, value) in &fields {
                    if key != ID_FIELD {
                        prop_assert_eq!(record.get(key), Some(&json!(value)));
                    }
                }
            }
        }
    }
}
