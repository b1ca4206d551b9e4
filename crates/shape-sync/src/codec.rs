//! Leaf flattening aligned with [`Shape`] traversal order.
//!
//! Both directions walk arrays by index and objects by sorted key, depth
//! first, so the n-th flattened leaf always lands on the n-th leaf position of
//! the shape.
//!
//! Opaque leaves travel as tagged plain JSON:
//!
//! | kind | wire form |
//! |---|---|
//! | date | `{"__type":"Date","value":"2024-05-01T12:00:00Z"}` |
//! | map | `{"__type":"Map","value":[[k, v], ...]}` |
//! | set | `{"__type":"Set","value":[x, ...]}` |
//! | error | `{"__type":"Error","value":{"message":..,"name":..,"stack":..}}` |
//! | unstructured | `{"__type":"Unstructured","value":<raw json>}` |
//!
//! A plain object nested in an opaque payload that itself has a `__type` key
//! is wrapped as `{"__type":"Object","value":{..}}` so it is not read back as
//! a marker.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map};
use shape_sync_path::format_dot_path;

use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{Result, SyncError};
use crate::shape::Shape;
use crate::value::{ErrorValue, Opaque, Value};

pub const TYPE_KEY: &str = "__type";
pub const VALUE_KEY: &str = "value";
/// Marker for a plain object whose own keys include [`TYPE_KEY`].
pub const OBJECT_MARKER: &str = "Object";

type Json = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueCodec {
    max_depth: usize,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ValueCodec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Leaves of `value` in shape order, opaque leaves marshalled.
    pub fn flatten(&self, value: &Value) -> Result<Vec<Json>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.flatten_into(value, &mut path, &mut out)?;
        Ok(out)
    }

    fn flatten_into(
        &self,
        value: &Value,
        path: &mut Vec<String>,
        out: &mut Vec<Json>,
    ) -> Result<()> {
        self.check_depth(path)?;
        match value {
            Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    path.push(i.to_string());
                    self.flatten_into(item, path, out)?;
                    path.pop();
                }
            }
            Value::Object(obj) => {
                let mut keys: Vec<&String> = obj.keys().collect();
                keys.sort_unstable();
                for key in keys {
                    path.push(key.clone());
                    self.flatten_into(&obj[key.as_str()], path, out)?;
                    path.pop();
                }
            }
            leaf => out.push(marshal(leaf)),
        }
        Ok(())
    }

    /// Rebuild a value by consuming one leaf per leaf position of `shape`.
    pub fn unflatten(&self, leaves: &[Json], shape: &Shape) -> Result<Value> {
        let expected = shape.leaf_count();
        if leaves.len() != expected {
            return Err(SyncError::ShapeMismatch(format!(
                "shape has {expected} leaves, got {} values",
                leaves.len()
            )));
        }
        let mut cursor = leaves.iter();
        let mut path = Vec::new();
        self.unflatten_at(&mut cursor, shape, &mut path)
    }

    fn unflatten_at<'a, I>(
        &self,
        cursor: &mut I,
        shape: &Shape,
        path: &mut Vec<String>,
    ) -> Result<Value>
    where
        I: Iterator<Item = &'a Json>,
    {
        self.check_depth(path)?;
        match shape {
            Shape::Array { items } => {
                let mut arr = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    arr.push(self.unflatten_at(cursor, item, path)?);
                    path.pop();
                }
                Ok(Value::Array(arr))
            }
            Shape::Object { fields } => {
                let mut obj = crate::value::Object::with_capacity(fields.len());
                for (key, child) in fields {
                    path.push(key.clone());
                    obj.insert(key.clone(), self.unflatten_at(cursor, child, path)?);
                    path.pop();
                }
                Ok(Value::Object(obj))
            }
            leaf_shape => {
                let leaf = cursor.next().ok_or_else(|| {
                    SyncError::ShapeMismatch(format!(
                        "ran out of values at {:?}",
                        format_dot_path(path)
                    ))
                })?;
                decode_leaf(leaf, leaf_shape, &format_dot_path(path))
            }
        }
    }

    fn check_depth(&self, path: &[String]) -> Result<()> {
        if path.len() > self.max_depth {
            return Err(SyncError::CyclicStructure {
                path: format_dot_path(path),
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

/// [`ValueCodec::flatten`] with the default depth bound.
pub fn flatten(value: &Value) -> Result<Vec<Json>> {
    ValueCodec::default().flatten(value)
}

/// [`ValueCodec::unflatten`] with the default depth bound.
pub fn unflatten(leaves: &[Json], shape: &Shape) -> Result<Value> {
    ValueCodec::default().unflatten(leaves, shape)
}

/// Check a wire leaf against the leaf kind its shape position expects.
pub fn decode_leaf(leaf: &Json, shape: &Shape, path: &str) -> Result<Value> {
    let ok = match shape {
        Shape::Null => leaf.is_null(),
        Shape::Boolean => leaf.is_boolean(),
        Shape::Number => leaf.is_number(),
        Shape::String => leaf.is_string(),
        Shape::Opaque => return unmarshal_opaque(leaf).map(Value::Opaque),
        Shape::Array { .. } | Shape::Object { .. } => false,
    };
    if !ok {
        return Err(SyncError::ShapeMismatch(format!(
            "value at {path:?} does not fit {shape:?}: {leaf}"
        )));
    }
    Ok(Value::from(leaf.clone()))
}

/// Plain-JSON form of a value. Opaque values anywhere in the tree become
/// tagged markers.
pub fn marshal(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(arr) => Json::Array(arr.iter().map(marshal).collect()),
        Value::Object(obj) => {
            let fields: Map<String, Json> =
                obj.iter().map(|(k, v)| (k.clone(), marshal(v))).collect();
            if fields.contains_key(TYPE_KEY) {
                tagged(OBJECT_MARKER, Json::Object(fields))
            } else {
                Json::Object(fields)
            }
        }
        Value::Opaque(opaque) => marshal_opaque(opaque),
    }
}

fn tagged(marker: &str, payload: Json) -> Json {
    let mut tagged = Map::with_capacity(2);
    tagged.insert(TYPE_KEY.to_string(), Json::String(marker.to_string()));
    tagged.insert(VALUE_KEY.to_string(), payload);
    Json::Object(tagged)
}

pub fn marshal_opaque(opaque: &Opaque) -> Json {
    let payload = match opaque {
        Opaque::Date(at) => Json::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Opaque::Map(entries) => Json::Array(
            entries
                .iter()
                .map(|(k, v)| Json::Array(vec![marshal(k), marshal(v)]))
                .collect(),
        ),
        Opaque::Set(items) => Json::Array(items.iter().map(marshal).collect()),
        Opaque::Error(err) => json!({
            "message": err.message,
            "name": err.name,
            "stack": err.stack,
        }),
        Opaque::Unstructured(raw) => raw.clone(),
    };
    tagged(opaque.marker(), payload)
}

/// Inverse of [`marshal`]: any object carrying a string `__type` marker is
/// rebuilt as an opaque value, except the escaped plain-object form.
pub fn unmarshal(json: &Json) -> Result<Value> {
    match json {
        Json::Object(obj) => match obj.get(TYPE_KEY).and_then(Json::as_str) {
            Some(OBJECT_MARKER) => match obj.get(VALUE_KEY) {
                Some(Json::Object(fields)) => unmarshal_fields(fields),
                _ => Err(SyncError::MalformedOpaque(format!(
                    "object payload must be an object: {json}"
                ))),
            },
            Some(_) => unmarshal_opaque(json).map(Value::Opaque),
            None => unmarshal_fields(obj),
        },
        Json::Array(arr) => Ok(Value::Array(arr.iter().map(unmarshal).collect::<Result<_>>()?)),
        plain => Ok(Value::from(plain.clone())),
    }
}

fn unmarshal_fields(fields: &Map<String, Json>) -> Result<Value> {
    Ok(Value::Object(
        fields
            .iter()
            .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), unmarshal(v)?)) })
            .collect::<Result<_>>()?,
    ))
}

pub fn unmarshal_opaque(json: &Json) -> Result<Opaque> {
    let malformed = |why: &str| SyncError::MalformedOpaque(format!("{why}: {json}"));
    let obj = json.as_object().ok_or_else(|| malformed("expected a tagged object"))?;
    let marker = obj
        .get(TYPE_KEY)
        .and_then(Json::as_str)
        .ok_or_else(|| malformed("missing __type marker"))?;
    let payload = obj.get(VALUE_KEY).unwrap_or(&Json::Null);
    match marker {
        "Date" => {
            let text = payload
                .as_str()
                .ok_or_else(|| malformed("date payload must be a string"))?;
            let at =
                DateTime::parse_from_rfc3339(text).map_err(|err| malformed(&err.to_string()))?;
            Ok(Opaque::Date(at.with_timezone(&Utc)))
        }
        "Map" => {
            let entries = payload
                .as_array()
                .ok_or_else(|| malformed("map payload must be a list"))?;
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.as_array().map(Vec::as_slice) {
                    Some([k, v]) => out.push((unmarshal(k)?, unmarshal(v)?)),
                    _ => return Err(malformed("map entries must be [key, value] pairs")),
                }
            }
            Ok(Opaque::Map(out))
        }
        "Set" => {
            let items = payload.as_array().ok_or_else(|| malformed("set payload must be a list"))?;
            Ok(Opaque::Set(items.iter().map(unmarshal).collect::<Result<_>>()?))
        }
        "Error" => {
            let fields = payload
                .as_object()
                .ok_or_else(|| malformed("error payload must be an object"))?;
            let text = |key: &str| fields.get(key).and_then(Json::as_str).map(str::to_string);
            Ok(Opaque::Error(ErrorValue {
                name: text("name").unwrap_or_else(|| "Error".to_string()),
                message: text("message").unwrap_or_default(),
                stack: text("stack"),
            }))
        }
        "Unstructured" => Ok(Opaque::Unstructured(payload.clone())),
        other => Err(SyncError::MalformedOpaque(format!("unknown marker {other:?}"))),
    }
}
