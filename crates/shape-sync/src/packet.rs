//! Wire types.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::shape::{StructureDefinition, StructureId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PacketType {
    Full,
    ValuesOnly,
    Differential,
    Primitive,
    /// Any discriminant this version does not understand. Kept so that
    /// decode can report it instead of failing deserialization.
    Other(String),
}

impl PacketType {
    pub fn as_str(&self) -> &str {
        match self {
            PacketType::Full => "full",
            PacketType::ValuesOnly => "values-only",
            PacketType::Differential => "differential",
            PacketType::Primitive => "primitive",
            PacketType::Other(other) => other,
        }
    }
}

impl From<String> for PacketType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "full" => PacketType::Full,
            "values-only" => PacketType::ValuesOnly,
            "differential" => PacketType::Differential,
            "primitive" => PacketType::Primitive,
            _ => PacketType::Other(s),
        }
    }
}

impl From<PacketType> for String {
    fn from(t: PacketType) -> Self {
        match t {
            PacketType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    pub structure_id: StructureId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<StructureDefinition>,
    pub values: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PacketMetadata>,
}

impl Packet {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
