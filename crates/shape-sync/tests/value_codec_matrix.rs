use chrono::{TimeZone, Utc};
use serde_json::json;
use shape_sync::codec::{flatten, marshal, unflatten, unmarshal, ValueCodec};
use shape_sync::shape::shape_of;
use shape_sync::{ErrorValue, Opaque, SyncError, Value};

fn record(id: i64, at_secs: i64) -> Value {
    let at = Utc.timestamp_opt(at_secs, 0).single().expect("valid timestamp");
    [
        ("id".to_string(), Value::from(id)),
        ("createdAt".to_string(), Value::date(at)),
        (
            "tags".to_string(),
            Value::set(vec![Value::from("a"), Value::from("b")]),
        ),
    ]
    .into_iter()
    .collect()
}

#[test]
fn value_codec_matrix_opaque_leaves_keep_their_slot() {
    let v = record(7, 1_700_000_000);
    let leaves = flatten(&v).unwrap();
    assert_eq!(leaves.len(), 3);
    assert_eq!(leaves[0], json!({"__type": "Date", "value": "2023-11-14T22:13:20Z"}));
    assert_eq!(leaves[1], json!(7));
    assert_eq!(leaves[2], json!({"__type": "Set", "value": ["a", "b"]}));

    let shape = shape_of(&v).unwrap();
    assert_eq!(unflatten(&leaves, &shape).unwrap(), v);
}

#[test]
fn value_codec_matrix_same_shape_different_values() {
    let a = record(1, 0);
    let b = record(2, 86_400);
    let shape = shape_of(&a).unwrap();
    assert_eq!(shape, shape_of(&b).unwrap());
    assert_eq!(unflatten(&flatten(&b).unwrap(), &shape).unwrap(), b);
}

#[test]
fn value_codec_matrix_opaque_slot_rejects_plain_leaf() {
    let shape = shape_of(&record(1, 0)).unwrap();
    let err = unflatten(&[json!(5), json!(1), json!(["a"])], &shape).unwrap_err();
    assert!(matches!(err, SyncError::MalformedOpaque(_)), "{err:?}");
}

#[test]
fn value_codec_matrix_malformed_markers() {
    for bad in [
        json!({"__type": "Date", "value": "not a date"}),
        json!({"__type": "Date", "value": 5}),
        json!({"__type": "Map", "value": [["only-key"]]}),
        json!({"__type": "Set", "value": {}}),
        json!({"__type": "Error", "value": "boom"}),
        json!({"__type": "Weird", "value": 1}),
    ] {
        let err = unmarshal(&bad).unwrap_err();
        assert!(matches!(err, SyncError::MalformedOpaque(_)), "{bad}: {err:?}");
    }
}

#[test]
fn value_codec_matrix_unstructured_and_error_round_trip() {
    let raw = Value::Opaque(Opaque::Unstructured(json!({"handle": 42})));
    assert_eq!(marshal(&raw), json!({"__type": "Unstructured", "value": {"handle": 42}}));
    assert_eq!(unmarshal(&marshal(&raw)).unwrap(), raw);

    let err = unmarshal(&json!({"__type": "Error", "value": {"message": "x"}})).unwrap();
    assert_eq!(
        err,
        Value::error(ErrorValue {
            name: "Error".to_string(),
            message: "x".to_string(),
            stack: None,
        })
    );
}

#[test]
fn value_codec_matrix_untagged_objects_stay_plain() {
    let v = unmarshal(&json!({"__type": 3, "value": 1})).unwrap();
    assert_eq!(v, Value::from(json!({"__type": 3, "value": 1})));
}

#[test]
fn value_codec_matrix_depth_bound() {
    let mut v = json!("leaf");
    for _ in 0..6 {
        v = json!({"n": v});
    }
    let v = Value::from(v);
    assert!(matches!(
        ValueCodec::new(3).flatten(&v),
        Err(SyncError::CyclicStructure { limit: 3, .. })
    ));
    assert_eq!(ValueCodec::new(6).flatten(&v).unwrap(), vec![json!("leaf")]);
}
