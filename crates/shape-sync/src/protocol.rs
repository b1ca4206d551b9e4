//! Packet selection and application.
//!
//! Encode decides per call:
//!
//! 1. non-composite value → `primitive`
//! 2. structure not known to the peer → `full` (shape + all leaves), and the
//!    definition is registered locally
//! 3. known, with an access pattern from the same tracked value this session
//!    last sent whole under the id → `differential` (touched leaves only)
//! 4. known → `values-only` (all leaves, no shape)
//!
//! Decode reverses this against the receiving [`Session`]. A `full` packet is
//! always what introduces an id to the receiver, so both registries agree on
//! every id a later packet can reference. A `full` definition whose id or
//! signature was not derived from its shape is refused.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value as Json};
use shape_sync_path::parse_dot_path;
use tracing::{debug, warn};

use crate::codec::{decode_leaf, marshal, unmarshal, unmarshal_opaque, ValueCodec};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::packet::{Packet, PacketMetadata, PacketType};
use crate::session::Session;
use crate::shape::{
    id_of, levels_of, Shape, ShapeHasher, StructureDefinition, StructureId, PRIMITIVE_STRUCTURE_ID,
};
use crate::size::{json_size, SizeReport};
use crate::tracker::{AccessPattern, Tracked, TrackedId};
use crate::value::Value;

/// Structure ids the peer is known to hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownStructures {
    ids: HashSet<StructureId>,
}

impl KnownStructures {
    pub fn none() -> Self {
        Self::default()
    }

    /// The peer named exactly one structure it expects.
    pub fn single(id: impl Into<StructureId>) -> Self {
        let mut ids = HashSet::with_capacity(1);
        ids.insert(id.into());
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<StructureId>) {
        self.ids.insert(id.into());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<StructureId> for KnownStructures {
    fn from_iter<I: IntoIterator<Item = StructureId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodeContext {
    pub known: KnownStructures,
    /// The tracked value being encoded, if any.
    pub source: Option<TrackedId>,
    pub access: Option<AccessPattern>,
}

impl EncodeContext {
    pub fn new(known: KnownStructures) -> Self {
        Self {
            known,
            source: None,
            access: None,
        }
    }

    /// Attach the access pattern recorded against `source`.
    pub fn with_access(mut self, source: TrackedId, pattern: AccessPattern) -> Self {
        self.source = Some(source);
        self.access = Some(pattern);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncProtocol {
    config: SyncConfig,
    hasher: ShapeHasher,
    codec: ValueCodec,
}

impl SyncProtocol {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            hasher: ShapeHasher::new(config.max_depth),
            codec: ValueCodec::new(config.max_depth),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A session whose registry is bounded by this protocol's config.
    pub fn new_session(&self) -> Session {
        Session::new(self.config.max_registry_entries)
    }

    pub fn definition_of(&self, value: &Value) -> Result<StructureDefinition> {
        self.hasher.definition_of(value)
    }

    pub fn encode(
        &self,
        value: &Value,
        ctx: &EncodeContext,
        session: &mut Session,
    ) -> Result<Packet> {
        if !value.is_composite() {
            return Ok(Packet {
                packet_type: PacketType::Primitive,
                structure_id: PRIMITIVE_STRUCTURE_ID.to_string(),
                structure: None,
                values: marshal(value),
                paths: None,
                metadata: None,
            });
        }

        let shape = self.hasher.shape_of(value)?;
        let id = id_of(&shape);

        if !ctx.known.contains(&id) {
            let values = Json::Array(self.codec.flatten(value)?);
            let levels = levels_of(&shape);
            let definition = StructureDefinition::new(shape);
            let collision_count = {
                let mut registry = session.registry().lock();
                let evicted = registry.put(definition.clone());
                let count = registry.collision_count();
                drop(registry);
                session.forget_evicted(&evicted);
                count
            };
            session.record_sent(&id, ctx.source);
            debug!(structure_id = %id, levels, "encoded full packet");
            return Ok(Packet {
                packet_type: PacketType::Full,
                structure_id: id,
                structure: Some(definition),
                values,
                paths: None,
                metadata: Some(PacketMetadata {
                    collision_count: Some(collision_count),
                    levels: Some(levels),
                    timestamp: None,
                }),
            });
        }

        // the peer's base is whatever this session last sent whole under the id
        let differential = match (&ctx.access, ctx.source) {
            (Some(pattern), Some(source))
                if self.config.differentials_enabled()
                    && session.last_sent_from(&id) == Some(source) =>
            {
                Some(pattern)
            }
            _ => None,
        };
        let packet = match differential {
            Some(pattern) => self.encode_differential(value, &shape, id, pattern, session)?,
            None => {
                let values = Json::Array(self.codec.flatten(value)?);
                session.record_sent(&id, ctx.source);
                Packet {
                    packet_type: PacketType::ValuesOnly,
                    values,
                    structure_id: id,
                    structure: None,
                    paths: None,
                    metadata: None,
                }
            }
        };
        // refresh recency on the sending side
        let _ = session.registry().lock().get(&packet.structure_id);
        debug!(
            structure_id = %packet.structure_id,
            kind = packet.packet_type.as_str(),
            "encoded packet for known structure"
        );
        Ok(packet)
    }

    fn encode_differential(
        &self,
        value: &Value,
        shape: &Shape,
        id: StructureId,
        pattern: &AccessPattern,
        session: &Session,
    ) -> Result<Packet> {
        let mut leaves = BTreeSet::new();
        for path in pattern.touched_paths() {
            leaves.extend(value.leaf_paths_under(&path)?);
        }
        let mut values = Map::with_capacity(leaves.len());
        for path in &leaves {
            if let Some(leaf) = value.get_path(path)? {
                values.insert(path.clone(), marshal(leaf));
            }
        }
        Ok(Packet {
            packet_type: PacketType::Differential,
            structure_id: id,
            structure: None,
            values: Json::Object(values),
            paths: Some(leaves.into_iter().collect()),
            metadata: Some(PacketMetadata {
                collision_count: Some(session.registry().collision_count()),
                levels: Some(levels_of(shape)),
                timestamp: Some(pattern.timestamp),
            }),
        })
    }

    /// Encode a tracked value, taking the access pattern from its tracker.
    pub fn encode_tracked(
        &self,
        tracked: &Tracked,
        known: KnownStructures,
        session: &mut Session,
    ) -> Result<Packet> {
        let mut ctx = EncodeContext::new(known);
        ctx.source = Some(tracked.id());
        if self.config.differentials_enabled() {
            ctx.access = Some(tracked.access_pattern()?);
        }
        self.encode(tracked.peek(), &ctx, session)
    }

    pub fn decode(&self, packet: &Packet, session: &mut Session) -> Result<Value> {
        match &packet.packet_type {
            PacketType::Primitive => unmarshal(&packet.values),
            PacketType::Full => {
                let definition = packet.structure.as_ref().ok_or_else(|| {
                    SyncError::ShapeMismatch(format!(
                        "full packet {} carries no structure",
                        packet.structure_id
                    ))
                })?;
                if definition.id != packet.structure_id {
                    return Err(SyncError::ShapeMismatch(format!(
                        "packet id {} does not match structure id {}",
                        packet.structure_id, definition.id
                    )));
                }
                if let Some(reason) = definition.mismatch() {
                    warn!(structure_id = %packet.structure_id, %reason, "rejected full packet");
                    return Err(SyncError::ShapeMismatch(format!("structure {reason}")));
                }
                let value = self.unflatten_packet(packet, &definition.shape)?;
                let evicted = session.registry().put(definition.clone());
                session.forget_evicted(&evicted);
                session.store_materialized(packet.structure_id.clone(), value.clone());
                Ok(value)
            }
            PacketType::ValuesOnly => {
                let definition = session
                    .registry()
                    .get(&packet.structure_id)
                    .ok_or_else(|| SyncError::UnknownStructure(packet.structure_id.clone()))?;
                let value = self.unflatten_packet(packet, &definition.shape)?;
                session.store_materialized(packet.structure_id.clone(), value.clone());
                Ok(value)
            }
            PacketType::Differential => {
                if session.registry().lock().get(&packet.structure_id).is_none() {
                    // a base without its definition is stale
                    session.forget_materialized(&packet.structure_id);
                    return Err(SyncError::UnknownStructure(packet.structure_id.clone()));
                }
                let prior = session
                    .materialized(&packet.structure_id)
                    .ok_or_else(|| SyncError::UnknownStructure(packet.structure_id.clone()))?;
                let patched = match apply_differential(prior, packet) {
                    Ok(patched) => patched,
                    Err(err) => {
                        warn!(
                            structure_id = %packet.structure_id,
                            error = %err,
                            "rejected differential packet"
                        );
                        return Err(err);
                    }
                };
                session.store_materialized(packet.structure_id.clone(), patched.clone());
                Ok(patched)
            }
            PacketType::Other(kind) => Err(SyncError::UnsupportedPacketType(kind.clone())),
        }
    }

    /// Decode against a definition the caller already holds, without a
    /// session. Differential packets need a session and are rejected.
    pub fn decode_with_definition(
        &self,
        packet: &Packet,
        definition: &StructureDefinition,
    ) -> Result<Value> {
        match &packet.packet_type {
            PacketType::Primitive => unmarshal(&packet.values),
            PacketType::Full | PacketType::ValuesOnly => {
                if packet.structure_id != definition.id {
                    return Err(SyncError::UnknownStructure(packet.structure_id.clone()));
                }
                self.unflatten_packet(packet, &definition.shape)
            }
            PacketType::Differential => {
                Err(SyncError::UnknownStructure(packet.structure_id.clone()))
            }
            PacketType::Other(kind) => Err(SyncError::UnsupportedPacketType(kind.clone())),
        }
    }

    fn unflatten_packet(&self, packet: &Packet, shape: &Shape) -> Result<Value> {
        let leaves = packet.values.as_array().ok_or_else(|| {
            SyncError::ShapeMismatch(format!(
                "{} packet values must be a list",
                packet.packet_type.as_str()
            ))
        })?;
        self.codec.unflatten(leaves, shape)
    }

    /// Plain JSON size of `value` against the serialized size of `packet`.
    pub fn size_report(&self, value: &Value, packet: &Packet) -> Result<SizeReport> {
        Ok(SizeReport {
            baseline_bytes: json_size(&marshal(value)),
            packet_bytes: json_size(&serde_json::to_value(packet)?),
        })
    }
}

/// Patch a copy of `prior`. Nothing is returned unless every path applied.
fn apply_differential(prior: &Value, packet: &Packet) -> Result<Value> {
    let values = packet.values.as_object().ok_or_else(|| {
        SyncError::ShapeMismatch("differential values must be a path map".to_string())
    })?;
    let paths: Vec<&String> = match &packet.paths {
        Some(paths) => paths.iter().collect(),
        None => values.keys().collect(),
    };
    let mut patched = prior.clone();
    for path in paths {
        let leaf = values
            .get(path.as_str())
            .ok_or_else(|| SyncError::invalid_path(path, "listed without a value"))?;
        let components = parse_dot_path(path).map_err(|err| SyncError::from_path_error(path, err))?;
        let target = patched
            .get_components_mut(&components)
            .ok_or_else(|| SyncError::invalid_path(path, "not present in the prior object"))?;
        let replacement = match &*target {
            Value::Opaque(_) => Value::Opaque(unmarshal_opaque(leaf)?),
            Value::Array(_) | Value::Object(_) => {
                return Err(SyncError::invalid_path(path, "does not name a leaf"));
            }
            primitive => decode_leaf(leaf, &leaf_shape(primitive), path)?,
        };
        *target = replacement;
    }
    Ok(patched)
}

fn leaf_shape(value: &Value) -> Shape {
    match value {
        Value::Null => Shape::Null,
        Value::Bool(_) => Shape::Boolean,
        Value::Number(_) => Shape::Number,
        Value::String(_) => Shape::String,
        Value::Opaque(_) | Value::Array(_) | Value::Object(_) => Shape::Opaque,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SharedRegistry;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn scalars_travel_as_primitive_packets() {
        let protocol = SyncProtocol::default();
        let mut session = protocol.new_session();
        let packet = protocol
            .encode(&v(json!("hi")), &EncodeContext::default(), &mut session)
            .unwrap();
        assert_eq!(packet.packet_type, PacketType::Primitive);
        assert_eq!(packet.structure_id, "primitive");
        assert_eq!(packet.values, json!("hi"));
        assert!(session.registry().lock().is_empty());
    }

    #[test]
    fn full_packet_registers_on_both_ends() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let mut receiver = protocol.new_session();
        let value = v(json!({"a": 1, "b": {"c": 2}}));
        let packet = protocol
            .encode(&value, &EncodeContext::default(), &mut sender)
            .unwrap();
        assert_eq!(packet.packet_type, PacketType::Full);
        assert!(sender.registry().contains(&packet.structure_id));
        let metadata = packet.metadata.clone().unwrap();
        assert_eq!(metadata.levels, Some(2));
        assert_eq!(metadata.collision_count, Some(0));

        assert_eq!(protocol.decode(&packet, &mut receiver).unwrap(), value);
        assert!(receiver.registry().contains(&packet.structure_id));
        assert_eq!(receiver.materialized(&packet.structure_id), Some(&value));
    }

    #[test]
    fn full_packet_with_mismatched_ids_is_rejected() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let mut packet = protocol
            .encode(&v(json!({"a": 1})), &EncodeContext::default(), &mut sender)
            .unwrap();
        packet.structure_id = "elsewhere".to_string();
        let mut receiver = protocol.new_session();
        assert!(matches!(
            protocol.decode(&packet, &mut receiver),
            Err(SyncError::ShapeMismatch(_))
        ));
        assert!(receiver.registry().lock().is_empty());
    }

    #[test]
    fn differential_failure_leaves_prior_untouched() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let mut receiver = protocol.new_session();
        let value = v(json!({"a": 1, "b": 2}));
        let full = protocol
            .encode(&value, &EncodeContext::default(), &mut sender)
            .unwrap();
        protocol.decode(&full, &mut receiver).unwrap();

        let bad = Packet {
            packet_type: PacketType::Differential,
            structure_id: full.structure_id.clone(),
            structure: None,
            values: json!({"a": 5, "zzz": 6}),
            paths: Some(vec!["a".to_string(), "zzz".to_string()]),
            metadata: None,
        };
        assert!(matches!(
            protocol.decode(&bad, &mut receiver),
            Err(SyncError::InvalidPath { .. })
        ));
        assert_eq!(receiver.materialized(&full.structure_id), Some(&value));
    }

    #[test]
    fn differential_kind_mismatch_is_rejected() {
        let prior = v(json!({"a": 1}));
        let packet = Packet {
            packet_type: PacketType::Differential,
            structure_id: "x".to_string(),
            structure: None,
            values: json!({"a": "one"}),
            paths: None,
            metadata: None,
        };
        assert!(matches!(
            apply_differential(&prior, &packet),
            Err(SyncError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn differential_rejects_composite_targets() {
        let prior = v(json!({"a": {"b": 1}}));
        let packet = Packet {
            packet_type: PacketType::Differential,
            structure_id: "x".to_string(),
            structure: None,
            values: json!({"a": {"b": 2}}),
            paths: None,
            metadata: None,
        };
        assert!(matches!(
            apply_differential(&prior, &packet),
            Err(SyncError::InvalidPath { .. })
        ));
    }

    #[test]
    fn decode_with_definition_checks_id() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let value = v(json!({"a": [1, 2]}));
        let definition = protocol.definition_of(&value).unwrap();
        let packet = protocol
            .encode(
                &value,
                &EncodeContext::new(KnownStructures::single(definition.id.clone())),
                &mut sender,
            )
            .unwrap();
        assert_eq!(packet.packet_type, PacketType::ValuesOnly);
        assert_eq!(protocol.decode_with_definition(&packet, &definition).unwrap(), value);

        let other = protocol.definition_of(&v(json!({"b": 1}))).unwrap();
        assert!(matches!(
            protocol.decode_with_definition(&packet, &other),
            Err(SyncError::UnknownStructure(_))
        ));
    }

    #[test]
    fn relabelled_full_packet_is_not_registered() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let mut packet = protocol
            .encode(&v(json!({"a": 1})), &EncodeContext::default(), &mut sender)
            .unwrap();
        let forged = "0000000aaaaaaa".to_string();
        packet.structure_id = forged.clone();
        if let Some(definition) = packet.structure.as_mut() {
            definition.id = forged.clone();
        }
        let mut receiver = protocol.new_session();
        assert!(matches!(
            protocol.decode(&packet, &mut receiver),
            Err(SyncError::ShapeMismatch(_))
        ));
        assert!(!receiver.registry().contains(&forged));
        assert!(receiver.materialized(&forged).is_none());
    }

    #[test]
    fn differential_base_survives_only_with_its_definition() {
        let protocol = SyncProtocol::default();
        let mut sender = protocol.new_session();
        let shared = SharedRegistry::with_capacity(1);
        let mut first = Session::with_registry(shared.clone());
        let mut second = Session::with_registry(shared.clone());

        let x = v(json!({"a": 1}));
        let full_x = protocol.encode(&x, &EncodeContext::default(), &mut sender).unwrap();
        protocol.decode(&full_x, &mut first).unwrap();
        let full_y = protocol
            .encode(&v(json!({"b": "y"})), &EncodeContext::default(), &mut sender)
            .unwrap();
        // evicts x from the registry both sessions share
        protocol.decode(&full_y, &mut second).unwrap();
        assert!(first.materialized(&full_x.structure_id).is_some());

        let patch = Packet {
            packet_type: PacketType::Differential,
            structure_id: full_x.structure_id.clone(),
            structure: None,
            values: json!({"a": 2}),
            paths: Some(vec!["a".to_string()]),
            metadata: None,
        };
        assert!(matches!(
            protocol.decode(&patch, &mut first),
            Err(SyncError::UnknownStructure(_))
        ));
        assert!(first.materialized(&full_x.structure_id).is_none());

        protocol.decode(&full_x, &mut first).unwrap();
        first.registry().lock().clear();
        assert!(matches!(
            protocol.decode(&patch, &mut first),
            Err(SyncError::UnknownStructure(_))
        ));
        assert!(first.materialized(&full_x.structure_id).is_none());
    }

    #[test]
    fn differential_needs_the_value_last_sent() {
        let protocol = SyncProtocol::default();
        let mut session = protocol.new_session();
        let a = Tracked::new(v(json!({"n": 1})));
        let b = Tracked::new(v(json!({"n": 2})));
        let full = protocol
            .encode_tracked(&a, KnownStructures::none(), &mut session)
            .unwrap();
        assert_eq!(session.last_sent_from(&full.structure_id), Some(a.id()));
        let known = || KnownStructures::single(full.structure_id.clone());

        let pattern = b.access_pattern().unwrap();
        let ctx = EncodeContext::new(known()).with_access(b.id(), pattern.clone());
        let packet = protocol.encode(b.peek(), &ctx, &mut session).unwrap();
        assert_eq!(packet.packet_type, PacketType::ValuesOnly);
        assert_eq!(session.last_sent_from(&full.structure_id), Some(b.id()));

        let ctx = EncodeContext::new(known()).with_access(b.id(), pattern);
        let packet = protocol.encode(b.peek(), &ctx, &mut session).unwrap();
        assert_eq!(packet.packet_type, PacketType::Differential);

        // untracked sends leave no base to diff against
        protocol
            .encode(b.peek(), &EncodeContext::new(known()), &mut session)
            .unwrap();
        assert_eq!(session.last_sent_from(&full.structure_id), None);
        let packet = protocol.encode_tracked(&b, known(), &mut session).unwrap();
        assert_eq!(packet.packet_type, PacketType::ValuesOnly);
    }
}
