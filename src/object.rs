//! Record and checked-state types shared by every store layer.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Normalized object identity. Identity values arrive as JSON strings or
/// numbers and are keyed internally by their string form.
pub type Id = String;

/// Tri-state checkbox value. "Unset" is represented as `Option::None` at
/// call sites, never as a fourth variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckedState {
    Unchecked,
    Checked,
    /// At least one descendant checked and at least one unchecked.
    Mixed,
}

impl CheckedState {
    /// Parse from the wire encoding: `false`, `true` or the string `"mixed"`.
    pub fn from_value(value: &Value) -> Option<CheckedState> {
        match value {
            Value::Bool(false) => Some(CheckedState::Unchecked),
            Value::Bool(true) => Some(CheckedState::Checked),
            Value::String(s) if s == "mixed" => Some(CheckedState::Mixed),
            _ => None,
        }
    }

    /// Wire encoding of this state.
    pub fn to_value(self) -> Value {
        match self {
            CheckedState::Unchecked => Value::Bool(false),
            CheckedState::Checked => Value::Bool(true),
            CheckedState::Mixed => Value::String("mixed".to_owned()),
        }
    }
}

impl Serialize for CheckedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CheckedState::Unchecked => serializer.serialize_bool(false),
            CheckedState::Checked => serializer.serialize_bool(true),
            CheckedState::Mixed => serializer.serialize_str("mixed"),
        }
    }
}

impl<'de> Deserialize<'de> for CheckedState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CheckedState::from_value(&value)
            .ok_or_else(|| de::Error::custom(format!("invalid checked state: {value}")))
    }
}

/// A keyed record held by the stores. Thin wrapper over a JSON object so
/// arbitrary application attributes survive round trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreObject {
    fields: Map<String, Value>,
}

impl StoreObject {
    pub fn new() -> Self {
        StoreObject { fields: Map::new() }
    }

    /// Build from a JSON value. Only objects are valid store records.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(StoreObject { fields }),
            other => Err(StoreError::InvalidObject(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.fields.get(property)
    }

    pub fn set(&mut self, property: &str, value: impl Into<Value>) {
        self.fields.insert(property.to_owned(), value.into());
    }

    pub fn remove_field(&mut self, property: &str) -> Option<Value> {
        self.fields.remove(property)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Identity under the given id property, normalized to a string key.
    /// String and number identities are accepted; anything else is treated
    /// as absent.
    pub fn identity(&self, id_property: &str) -> Option<Id> {
        match self.fields.get(id_property)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Checked state under the given attribute; `None` when unset or not a
    /// recognized encoding.
    pub fn checked(&self, attribute: &str) -> Option<CheckedState> {
        self.fields.get(attribute).and_then(CheckedState::from_value)
    }

    pub fn set_checked(&mut self, attribute: &str, state: CheckedState) {
        self.fields.insert(attribute.to_owned(), state.to_value());
    }

    /// Parent references under the given property. A scalar identity yields
    /// a one-element vector; an array yields every resolvable identity.
    pub fn parent_ids(&self, parent_property: &str) -> Vec<Id> {
        match self.fields.get(parent_property) {
            Some(Value::Array(values)) => values.iter().filter_map(value_as_id).collect(),
            Some(value) => value_as_id(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Merge server-provided fields into this record. Incoming values win;
    /// fields only present locally (client-side custom attributes) are
    /// retained.
    pub fn merge_from(&mut self, incoming: &StoreObject) {
        for (key, value) in &incoming.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

fn value_as_id(value: &Value) -> Option<Id> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<Map<String, Value>> for StoreObject {
    fn from(fields: Map<String, Value>) -> Self {
        StoreObject { fields }
    }
}
