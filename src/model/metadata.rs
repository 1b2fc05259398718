//! Free-form metadata tree
//!
//! Entities, observations, relationships, and cache entries all carry a
//! `metadata` map. Rather than re-export `serde_json::Value` directly (the
//! Store needs structural equality for `advanced_search`'s exact-match
//! filter, which `serde_json::Value` also provides, but well-known-key
//! accessors read more clearly against a crate-local type), metadata is a
//! small tagged tree with conversions to and from JSON at the storage
//! boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A metadata value: null, boolean, number, string, array, or nested object.
///
/// `BTreeMap` (not `HashMap`) keeps object key order deterministic, which
/// matters for `query_hash` canonicalization in the retriever's cache probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// An empty object, the default shape for a fresh entity/observation.
    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Look up a top-level key on an object; `None` on any other shape.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up a dotted path (`"janitor.level"`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Set a top-level key, converting `self` to an object first if needed.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !matches!(self, Value::Object(_)) {
            *self = Value::empty_object();
        }
        if let Value::Object(map) = self {
            map.insert(key.into(), value);
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The well-known `status` key, used by conflict detection.
    pub fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }

    /// The well-known `archived` key, folded into discontinued-status checks.
    pub fn archived(&self) -> bool {
        self.get("archived").and_then(Value::as_bool).unwrap_or(false)
    }

    /// The well-known `janitor.level` key, the hierarchical summary depth.
    pub fn janitor_level(&self) -> Option<f64> {
        self.get_path("janitor.level").and_then(Value::as_f64)
    }

    /// The well-known `is_global_user` key, gating the retriever's
    /// profile-boost multiplier.
    pub fn is_global_user(&self) -> bool {
        self.get("is_global_user")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Exact-match comparison used by `advanced_search`'s metadata filter:
    /// every key in `filter` must be present in `self` with an equal value.
    pub fn matches_all(&self, filter: &Value) -> bool {
        let Value::Object(filter_map) = filter else {
            return self == filter;
        };
        let Value::Object(self_map) = self else {
            return false;
        };
        filter_map
            .iter()
            .all(|(k, v)| self_map.get(k).is_some_and(|sv| sv == v))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty_object()
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::String(s),
            Json::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s),
            Value::Array(arr) => Json::Array(arr.into_iter().map(Json::from).collect()),
            Value::Object(map) => {
                Json::Object(map.into_iter().map(|(k, v)| (k, Json::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let json: Json = serde_json::json!({"status": "active", "janitor": {"level": 2}});
        let value = Value::from(json.clone());
        let back: Json = value.into();
        assert_eq!(json, back);
    }

    #[test]
    fn reads_well_known_keys() {
        let json: Json = serde_json::json!({"status": "discontinued", "archived": true});
        let value = Value::from(json);
        assert_eq!(value.status(), Some("discontinued"));
        assert!(value.archived());
    }

    #[test]
    fn dotted_path_reads_nested_level() {
        let json: Json = serde_json::json!({"janitor": {"level": 3}});
        let value = Value::from(json);
        assert_eq!(value.janitor_level(), Some(3.0));
    }

    #[test]
    fn matches_all_requires_every_filter_key() {
        let value = Value::from(serde_json::json!({"status": "active", "team": "infra"}));
        let filter = Value::from(serde_json::json!({"status": "active"}));
        assert!(value.matches_all(&filter));

        let mismatched = Value::from(serde_json::json!({"status": "discontinued"}));
        assert!(!value.matches_all(&mismatched));
    }
}
