//! Generic resource tree.
//!
//! Every managed resource, whatever its type, is held as an [`Object`]: a map
//! from field name to a tri-state [`Setting`]. Field values are [`Value`]s,
//! which are scalars, nested objects, ordered lists or set lists. Whether an
//! array is ordered or a set is decided by the field's schema when the
//! document is parsed with [`Object::from_json`].
//!
//! # Example
//!
//! ```
//! use hemmer_reconciler::value::{Object, Setting, Value};
//!
//! let pool = Object::new()
//!     .with("name", "pool-1")
//!     .with("tier", "ENTERPRISE")
//!     .with_cleared("publishing_options");
//!
//! assert_eq!(pool.get("tier"), Setting::Value(&Value::from("ENTERPRISE")));
//! assert!(pool.get("publishing_options").is_cleared());
//! assert!(pool.get("labels").is_unset());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::ReconcileError;
use crate::schema::{Block, FieldKind};

/// The state of a single field.
///
/// `Unset` means the caller expressed no opinion, `Cleared` asserts the field
/// must be empty, and `Value` carries a concrete value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Setting<T> {
    /// No opinion.
    #[default]
    Unset,
    /// Explicitly empty.
    Cleared,
    /// A concrete value.
    Value(T),
}

impl<T> Setting<T> {
    /// Borrow the contents.
    pub fn as_ref(&self) -> Setting<&T> {
        match self {
            Setting::Unset => Setting::Unset,
            Setting::Cleared => Setting::Cleared,
            Setting::Value(v) => Setting::Value(v),
        }
    }

    /// The value, if one is set.
    pub fn value(&self) -> Option<&T> {
        match self {
            Setting::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Consume the setting, returning the value if one is set.
    pub fn into_value(self) -> Option<T> {
        match self {
            Setting::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the caller expressed no opinion.
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Whether the field was explicitly cleared.
    pub fn is_cleared(&self) -> bool {
        matches!(self, Setting::Cleared)
    }

    /// Whether a concrete value is present.
    pub fn is_value(&self) -> bool {
        matches!(self, Setting::Value(_))
    }

    /// Map the contained value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Setting<U> {
        match self {
            Setting::Unset => Setting::Unset,
            Setting::Cleared => Setting::Cleared,
            Setting::Value(v) => Setting::Value(f(v)),
        }
    }
}

impl<T: Clone> Setting<&T> {
    /// Clone a borrowed setting into an owned one.
    pub fn cloned(self) -> Setting<T> {
        self.map(T::clone)
    }
}

/// A node of the resource tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A string. Enum and reference fields are strings as well.
    String(String),
    /// A nested object or a string-keyed map.
    Object(Object),
    /// A list compared position by position.
    List(Vec<Value>),
    /// A list compared by membership.
    Set(Vec<Value>),
}

impl Value {
    /// The string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object contents, if this is an object.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The elements of an ordered or set list.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// The value as a float, for integers and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Whether the value carries no material information.
    ///
    /// `false`, `0`, `""`, empty lists and objects whose fields are all zero
    /// or cleared are zero. The differ treats a zero value on one side as
    /// equivalent to an absent value on the other.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Object(o) => o.is_effectively_empty(),
            Value::List(items) | Value::Set(items) => items.is_empty(),
        }
    }

    /// A short name for the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Object(o) => o.to_json(),
            Value::List(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            },
        }
    }

    /// Convert a JSON value, using `kind` to decide list/set and nested shapes.
    ///
    /// Returns `Ok(None)` for JSON `null`.
    pub fn from_json(
        kind: Option<&FieldKind>,
        json: &serde_json::Value,
    ) -> Result<Option<Value>, ReconcileError> {
        let value = match json {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                let (element, is_set) = match kind {
                    Some(FieldKind::List(element)) => (Some(element.as_ref()), false),
                    Some(FieldKind::Set(element)) => (Some(element.as_ref()), true),
                    _ => (None, false),
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = Value::from_json(element, item)? {
                        values.push(v);
                    }
                }
                if is_set {
                    Value::Set(values)
                } else {
                    Value::List(values)
                }
            },
            serde_json::Value::Object(_) => match kind {
                Some(FieldKind::Object(block)) => Value::Object(Object::from_json(block, json)?),
                Some(FieldKind::Map(element)) => {
                    Value::Object(Object::from_json_map(element, json)?)
                },
                _ => Value::Object(Object::from_json(&Block::new(), json)?),
            },
        };
        Ok(Some(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Object(o) => o.serialize(serializer),
            Value::List(items) | Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

/// A shared empty object, used as the comparison target when one side of a
/// nested block is absent.
pub static EMPTY_OBJECT: Object = Object::new();

/// A set of named fields.
///
/// Absent keys are [`Setting::Unset`]; the map never stores `Unset`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    fields: BTreeMap<String, Setting<Value>>,
}

impl Object {
    /// Create an empty object.
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Setting<&Value> {
        match self.fields.get(name) {
            Some(setting) => setting.as_ref(),
            None => Setting::Unset,
        }
    }

    /// Set a field. Setting it to `Unset` removes it.
    pub fn set(&mut self, name: impl Into<String>, setting: Setting<Value>) {
        let name = name.into();
        match setting {
            Setting::Unset => {
                self.fields.remove(&name);
            },
            other => {
                self.fields.insert(name, other);
            },
        }
    }

    /// Set a field to a concrete value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .insert(name.into(), Setting::Value(value.into()));
    }

    /// Remove a field, returning its previous setting.
    pub fn remove(&mut self, name: &str) -> Setting<Value> {
        self.fields.remove(name).unwrap_or_default()
    }

    /// Builder form of [`Object::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder form of marking a field explicitly cleared.
    pub fn with_cleared(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), Setting::Cleared);
        self
    }

    /// Iterate over the fields that are set or cleared, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Setting<&Value>)> {
        self.fields
            .iter()
            .map(|(name, setting)| (name.as_str(), setting.as_ref()))
    }

    /// Number of fields that are set or cleared.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is set or cleared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether every field is cleared or holds a zero value.
    pub fn is_effectively_empty(&self) -> bool {
        self.fields.values().all(|setting| match setting {
            Setting::Value(v) => v.is_zero(),
            _ => true,
        })
    }

    /// Fill fields that are unset here from `other`.
    pub fn fill_missing_from(&mut self, other: &Object) {
        for (name, setting) in &other.fields {
            if !self.fields.contains_key(name) {
                self.fields.insert(name.clone(), setting.clone());
            }
        }
    }

    /// Convert to a JSON object. Cleared fields become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(name, setting)| {
                let json = match setting {
                    Setting::Value(v) => v.to_json(),
                    _ => serde_json::Value::Null,
                };
                (name.clone(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Parse a JSON object using `block` to shape nested fields.
    ///
    /// Missing keys stay unset and `null` marks a field as cleared. Keys the
    /// block does not declare are kept with a best-effort shape.
    pub fn from_json(block: &Block, json: &serde_json::Value) -> Result<Object, ReconcileError> {
        let map = expect_object(json)?;
        let mut obj = Object::new();
        for (name, value) in map {
            let kind = block.field(name).map(|desc| &desc.kind);
            let setting = match Value::from_json(kind, value)? {
                Some(v) => Setting::Value(v),
                None => Setting::Cleared,
            };
            obj.set(name.clone(), setting);
        }
        Ok(obj)
    }

    fn from_json_map(element: &FieldKind, json: &serde_json::Value) -> Result<Object, ReconcileError> {
        let map = expect_object(json)?;
        let mut obj = Object::new();
        for (key, value) in map {
            let setting = match Value::from_json(Some(element), value)? {
                Some(v) => Setting::Value(v),
                None => Setting::Cleared,
            };
            obj.set(key.clone(), setting);
        }
        Ok(obj)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, setting) in &self.fields {
            map.serialize_entry(name, &setting.value())?;
        }
        map.end()
    }
}

fn expect_object(
    json: &serde_json::Value,
) -> Result<&serde_json::Map<String, serde_json::Value>, ReconcileError> {
    json.as_object().ok_or_else(|| {
        ReconcileError::InvalidRequest(format!("expected a JSON object, got {}", json))
    })
}
