//! Record abstractions consumed by the engine, plus an in-memory record and
//! store for hosts that do not bring their own.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{entity_handle, EntityLoader};

/// Ordered instance values per field name.
pub type FieldTable = BTreeMap<String, Vec<Value>>;

/// Read-only view of a record, as seen by the context builder.
pub trait RecordSnapshot {
    fn entity_type(&self) -> &str;

    fn id(&self) -> Option<Value>;

    /// Every field materialized to plain values, or `None` when the record
    /// has no field table yet.
    fn field_table(&self) -> Option<FieldTable>;
}

/// Write-back side used by the save trigger.
pub trait RecordMut: RecordSnapshot {
    fn set_field(&mut self, name: &str, items: Vec<Value>);
}

/// A plain record: entity type, optional id and field items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// `None` models a detached record whose fields cannot be enumerated.
    #[serde(default)]
    pub fields: Option<FieldTable>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: Some(FieldTable::new()),
        }
    }

    pub fn detached(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a field whose instances each carry a single `value` property.
    pub fn with_values<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values.into_iter().map(|v| item(v.into())).collect();
        self.set_field(name, items);
        self
    }

    pub fn items(&self, name: &str) -> Option<&[Value]> {
        self.fields.as_ref()?.get(name).map(Vec::as_slice)
    }

    /// `value` property of the instance at `delta`.
    pub fn value(&self, name: &str, delta: usize) -> Option<&Value> {
        self.items(name)?.get(delta)?.get("value")
    }
}

impl RecordSnapshot for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn id(&self) -> Option<Value> {
        self.id.clone()
    }

    fn field_table(&self) -> Option<FieldTable> {
        self.fields.clone()
    }
}

impl RecordMut for Record {
    fn set_field(&mut self, name: &str, items: Vec<Value>) {
        self.fields
            .get_or_insert_with(FieldTable::new)
            .insert(name.to_string(), items);
    }
}

/// Wraps a bare value as a field item: `{"value": v}`.
pub fn item(value: Value) -> Value {
    let mut m = Map::new();
    m.insert("value".into(), value);
    Value::Object(m)
}

/// Related records keyed by entity type and id, exposed to expressions
/// through `$services->load(type, id)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<(String, String), Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) {
        let key = record.id.as_ref().map(id_key).unwrap_or_default();
        self.records.insert((record.entity_type.clone(), key), record);
    }
}

impl EntityLoader for MemoryStore {
    fn load(&self, entity_type: &str, id: &Value) -> Option<Value> {
        self.records
            .get(&(entity_type.to_string(), id_key(id)))
            .and_then(entity_handle)
    }
}

// Ids compare by their printed form so `3` and `"3"` find the same record.
fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn with_values_wraps_items() {
        let r = Record::new("node").with_values("field_a", [1, 2]);
        assert_eq!(r.items("field_a").unwrap(), &[json!({"value": 1}), json!({"value": 2})]);
        assert_eq!(r.value("field_a", 1), Some(&json!(2)));
    }

    #[test]
    fn store_lookup_ignores_id_type() {
        let mut store = MemoryStore::new();
        store.insert(Record::new("user").with_id(7).with_values("name", ["ada"]));
        let hit = store.load("user", &json!("7")).unwrap();
        assert_eq!(hit["name"][0]["value"], json!("ada"));
        assert!(store.load("node", &json!(7)).is_none());
    }

    #[test]
    fn record_round_trips_through_json() {
        let r: Record = serde_json::from_value(json!({
            "entity_type": "node",
            "id": 1,
            "fields": {"title": [{"value": "x"}]}
        }))
        .unwrap();
        assert_eq!(r.value("title", 0), Some(&json!("x")));
        let detached: Record = serde_json::from_value(json!({"entity_type": "node"})).unwrap();
        assert!(detached.field_table().is_none());
    }
}
