//! The in-memory tree that shapes are computed over.
//!
//! [`Value`] is plain JSON plus [`Opaque`] leaves: values that are atomic for
//! shape purposes but still carry data the codec must move across the wire.

mod equal;

pub use equal::deep_equal;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Number;
use shape_sync_path::{format_dot_path, join, parse_dot_path};

use crate::error::{Result, SyncError};

pub type Object = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    Opaque(Opaque),
}

/// Closed set of leaf kinds that are never decomposed into a shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Opaque {
    Date(DateTime<Utc>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Error(ErrorValue),
    /// Anything else the host cannot break down further.
    Unstructured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl Opaque {
    pub fn marker(&self) -> &'static str {
        match self {
            Opaque::Date(_) => "Date",
            Opaque::Map(_) => "Map",
            Opaque::Set(_) => "Set",
            Opaque::Error(_) => "Error",
            Opaque::Unstructured(_) => "Unstructured",
        }
    }
}

impl Value {
    /// Arrays and plain keyed nodes. Opaque values are leaves.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_composite()
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Value::Opaque(Opaque::Date(at))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Opaque(Opaque::Map(entries))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Opaque(Opaque::Set(items))
    }

    pub fn error(err: ErrorValue) -> Self {
        Value::Opaque(Opaque::Error(err))
    }

    /// Child reached by one unescaped path component.
    pub fn child(&self, component: &str) -> Option<&Value> {
        match self {
            Value::Object(obj) => obj.get(component),
            Value::Array(arr) => component.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, component: &str) -> Option<&mut Value> {
        match self {
            Value::Object(obj) => obj.get_mut(component),
            Value::Array(arr) => match component.parse::<usize>() {
                Ok(i) => arr.get_mut(i),
                Err(_) => None,
            },
            _ => None,
        }
    }

    pub fn get_components<S: AsRef<str>>(&self, components: &[S]) -> Option<&Value> {
        let mut node = self;
        for component in components {
            node = node.child(component.as_ref())?;
        }
        Some(node)
    }

    pub fn get_components_mut<S: AsRef<str>>(&mut self, components: &[S]) -> Option<&mut Value> {
        let mut node = self;
        for component in components {
            node = node.child_mut(component.as_ref())?;
        }
        Some(node)
    }

    /// Resolve a dot-path. `Ok(None)` means the path is well formed but
    /// does not exist in this value.
    pub fn get_path(&self, path: &str) -> Result<Option<&Value>> {
        let components =
            parse_dot_path(path).map_err(|err| SyncError::from_path_error(path, err))?;
        Ok(self.get_components(&components))
    }

    /// Dot-paths of every leaf under `path`, in lexicographic depth-first
    /// order. A leaf path yields itself.
    pub fn leaf_paths_under(&self, path: &str) -> Result<Vec<String>> {
        let components =
            parse_dot_path(path).map_err(|err| SyncError::from_path_error(path, err))?;
        let mut out = Vec::new();
        if let Some(node) = self.get_components(&components) {
            collect_leaf_paths(node, &format_dot_path(&components), &mut out);
        }
        Ok(out)
    }
}

fn collect_leaf_paths(node: &Value, prefix: &str, out: &mut Vec<String>) {
    match node {
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                collect_leaf_paths(item, &join(prefix, &i.to_string()), out);
            }
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort_unstable();
            for key in keys {
                collect_leaf_paths(&obj[key.as_str()], &join(prefix, key), out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

/// Non-finite floats have no JSON number form and become `Null`.
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Value::Object(iter.into_iter().collect())
    }
}
