use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{json, Value as Json};
use shape_sync::codec::{flatten, unflatten};
use shape_sync::shape::{id_of, shape_of};
use shape_sync::{
    deep_equal, EncodeContext, KnownStructures, Packet, PacketType, SyncProtocol, Value,
};

fn arb_leaf() -> impl Strategy<Value = Json> {
    prop_oneof![
        Just(Json::Null),
        any::<bool>().prop_map(Json::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z ]{0,8}".prop_map(Json::String),
    ]
}

fn arb_json() -> impl Strategy<Value = Json> {
    arb_leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Json::Array),
            prop::collection::btree_map("[a-z.~]{0,4}", inner, 0..6)
                .prop_map(|fields| Json::Object(fields.into_iter().collect())),
        ]
    })
}

/// Rebuild every object with its keys inserted in reverse order.
fn reversed(json: &Json) -> Value {
    match json {
        Json::Array(items) => Value::Array(items.iter().map(reversed).collect()),
        Json::Object(fields) => {
            let sorted: BTreeMap<&String, &Json> = fields.iter().collect();
            sorted
                .into_iter()
                .rev()
                .map(|(k, v)| (k.clone(), reversed(v)))
                .collect()
        }
        leaf => Value::from(leaf.clone()),
    }
}

proptest! {
    #[test]
    fn structure_id_ignores_key_order(json in arb_json()) {
        let forward = Value::from(json.clone());
        let backward = reversed(&json);
        prop_assert!(deep_equal(&forward, &backward));
        prop_assert_eq!(
            id_of(&shape_of(&forward).unwrap()),
            id_of(&shape_of(&backward).unwrap())
        );
    }

    #[test]
    fn unflatten_inverts_flatten(json in arb_json()) {
        let value = Value::from(json);
        let shape = shape_of(&value).unwrap();
        let leaves = flatten(&value).unwrap();
        prop_assert_eq!(leaves.len(), shape.leaf_count());
        let back = unflatten(&leaves, &shape).unwrap();
        prop_assert!(deep_equal(&back, &value));
    }

    #[test]
    fn fresh_encode_decodes_to_the_same_value(json in arb_json()) {
        let protocol = SyncProtocol::default();
        let mut server = protocol.new_session();
        let mut client = protocol.new_session();
        let value = Value::from(json);

        let packet = protocol
            .encode(&value, &EncodeContext::new(KnownStructures::none()), &mut server)
            .unwrap();
        let wire = Packet::from_json(&packet.to_json().unwrap()).unwrap();
        let decoded = protocol.decode(&wire, &mut client).unwrap();
        prop_assert!(deep_equal(&decoded, &value));

        if packet.packet_type == PacketType::Full {
            let again = protocol
                .encode(
                    &value,
                    &EncodeContext::new(KnownStructures::single(packet.structure_id.clone())),
                    &mut server,
                )
                .unwrap();
            prop_assert_eq!(&again.packet_type, &PacketType::ValuesOnly);
            prop_assert!(deep_equal(&protocol.decode(&again, &mut client).unwrap(), &value));
        }
    }
}
