//! Shape identity: canonical, value-independent fingerprints of a tree.
//!
//! The string hash and base-36 rendering follow the structural hash used for
//! JSON documents: a `djb2`-style state walked over UTF-16 code units, with
//! object keys always visited in sorted order. A shape's StructureID combines
//! that hash with a 32-bit FNV-1a hash of the same canonical form, giving 64
//! bits of identity. The SHA-256 signature is kept alongside for collision
//! diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shape_sync_path::format_dot_path;

use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{Result, SyncError};
use crate::value::Value;

pub type StructureId = String;

/// StructureID used by packets that carry a bare primitive.
pub const PRIMITIVE_STRUCTURE_ID: &str = "primitive";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    Null,
    Boolean,
    Number,
    String,
    Array { items: Vec<Shape> },
    Object { fields: BTreeMap<String, Shape> },
    Opaque,
}

impl Shape {
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Shape::Array { .. } | Shape::Object { .. })
    }

    /// Number of primitive and opaque positions, i.e. the length of the
    /// flattened value sequence.
    pub fn leaf_count(&self) -> usize {
        match self {
            Shape::Array { items } => items.iter().map(Shape::leaf_count).sum(),
            Shape::Object { fields } => fields.values().map(Shape::leaf_count).sum(),
            _ => 1,
        }
    }

    /// Shape of the node one component below this one.
    pub fn child(&self, component: &str) -> Option<&Shape> {
        match self {
            Shape::Object { fields } => fields.get(component),
            Shape::Array { items } => component.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDefinition {
    pub id: StructureId,
    pub shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl StructureDefinition {
    pub fn new(shape: Shape) -> Self {
        let canonical = canonical_form(&shape);
        Self {
            id: id_from_canonical(&canonical),
            signature: Some(sha256_hex(&canonical)),
            shape,
        }
    }

    /// Stored signature, or one computed from the shape for definitions
    /// that arrived without it.
    pub fn signature(&self) -> String {
        match &self.signature {
            Some(sig) => sig.clone(),
            None => signature_of(&self.shape),
        }
    }

    /// Describes how `id` or `signature` disagree with `shape`, if they do.
    pub fn mismatch(&self) -> Option<String> {
        let canonical = canonical_form(&self.shape);
        let expected = id_from_canonical(&canonical);
        if self.id != expected {
            return Some(format!("{} hashes to {expected}", self.id));
        }
        match &self.signature {
            Some(sig) if *sig != sha256_hex(&canonical) => {
                Some(format!("{} carries a foreign signature", self.id))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureInfo {
    pub id: StructureId,
    pub levels: usize,
}

/// Computes shapes with a bound on traversal depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeHasher {
    max_depth: usize,
}

impl Default for ShapeHasher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ShapeHasher {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn shape_of(&self, value: &Value) -> Result<Shape> {
        let mut path = Vec::new();
        self.shape_at(value, &mut path)
    }

    fn shape_at(&self, value: &Value, path: &mut Vec<String>) -> Result<Shape> {
        if path.len() > self.max_depth {
            return Err(SyncError::CyclicStructure {
                path: format_dot_path(path),
                limit: self.max_depth,
            });
        }
        Ok(match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Boolean,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Opaque(_) => Shape::Opaque,
            Value::Array(arr) => {
                let mut items = Vec::with_capacity(arr.len());
                for (i, item) in arr.iter().enumerate() {
                    path.push(i.to_string());
                    items.push(self.shape_at(item, path)?);
                    path.pop();
                }
                Shape::Array { items }
            }
            Value::Object(obj) => {
                let mut fields = BTreeMap::new();
                for (key, child) in obj {
                    path.push(key.clone());
                    fields.insert(key.clone(), self.shape_at(child, path)?);
                    path.pop();
                }
                Shape::Object { fields }
            }
        })
    }

    pub fn definition_of(&self, value: &Value) -> Result<StructureDefinition> {
        Ok(StructureDefinition::new(self.shape_of(value)?))
    }

    pub fn structure_info(&self, value: &Value) -> Result<StructureInfo> {
        let shape = self.shape_of(value)?;
        Ok(StructureInfo {
            id: id_of(&shape),
            levels: levels_of(&shape),
        })
    }
}

/// [`ShapeHasher::shape_of`] with the default depth bound.
pub fn shape_of(value: &Value) -> Result<Shape> {
    ShapeHasher::default().shape_of(value)
}

pub fn id_of(shape: &Shape) -> StructureId {
    id_from_canonical(&canonical_form(shape))
}

/// Maximum nesting depth. Leaves are 0, containers are one more than their
/// deepest child, and an empty container is 1.
pub fn levels_of(shape: &Shape) -> usize {
    match shape {
        Shape::Array { items } => 1 + items.iter().map(levels_of).max().unwrap_or(0),
        Shape::Object { fields } => 1 + fields.values().map(levels_of).max().unwrap_or(0),
        _ => 0,
    }
}

pub fn signature_of(shape: &Shape) -> String {
    sha256_hex(&canonical_form(shape))
}

/// Compact sorted-key serialization that both hashes are computed over.
pub fn canonical_form(shape: &Shape) -> String {
    let mut out = String::new();
    write_canonical(shape, &mut out);
    out
}

fn write_canonical(shape: &Shape, out: &mut String) {
    match shape {
        Shape::Null => out.push('N'),
        Shape::Boolean => out.push('B'),
        Shape::Number => out.push('#'),
        Shape::String => out.push('S'),
        Shape::Opaque => out.push('O'),
        Shape::Array { items } => {
            out.push('[');
            for item in items {
                write_canonical(item, out);
                out.push(';');
            }
            out.push(']');
        }
        Shape::Object { fields } => {
            // BTreeMap iteration is already lexicographic.
            out.push('{');
            for (key, child) in fields {
                push_quoted(key, out);
                out.push(':');
                write_canonical(child, out);
                out.push(',');
            }
            out.push('}');
        }
    }
}

fn push_quoted(key: &str, out: &mut String) {
    out.push('"');
    for ch in key.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

const START_STATE: i64 = 5381;
const CONST_STRING: i64 = 982_453_601;
const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[inline]
fn update_num(state: i64, num: i64) -> i64 {
    state.wrapping_shl(5).wrapping_add(state).wrapping_add(num)
}

fn update_str(mut state: i64, s: &str) -> i64 {
    let units: Vec<u16> = s.encode_utf16().collect();
    state = update_num(state, CONST_STRING);
    state = update_num(state, units.len() as i64);
    for u in units.iter().rev() {
        state = update_num(state, *u as i64);
    }
    state
}

fn hash_str(s: &str) -> u32 {
    (update_str(START_STATE, s) as u64 & 0xffff_ffff) as u32
}

fn fnv1a(s: &str) -> u32 {
    s.bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ b as u32).wrapping_mul(FNV_PRIME))
}

fn to_base36_u64(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = String::new();
    while n > 0 {
        let d = (n % 36) as u8;
        out.push(if d < 10 {
            (b'0' + d) as char
        } else {
            (b'a' + (d - 10)) as char
        });
        n /= 36;
    }
    out.chars().rev().collect()
}

fn id_from_canonical(canonical: &str) -> StructureId {
    format!(
        "{:0>7}{:0>7}",
        to_base36_u64(hash_str(canonical) as u64),
        to_base36_u64(fnv1a(canonical) as u64)
    )
}

fn sha256_hex(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
