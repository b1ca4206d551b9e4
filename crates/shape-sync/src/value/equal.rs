use super::{Opaque, Value};

/// Deep equality that treats trees the way the wire sees them.
///
/// Differs from `==` in two places:
/// - numbers compare by numeric value (`1` equals `1.0`)
/// - set elements and map entries compare without regard to order
///
/// # Examples
///
/// ```
/// use shape_sync::value::{deep_equal, Value};
///
/// let a = Value::set(vec![Value::from(1), Value::from(2)]);
/// let b = Value::set(vec![Value::from(2), Value::from(1)]);
/// assert!(deep_equal(&a, &b));
/// ```
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,

        (Value::Array(arr_a), Value::Array(arr_b)) => {
            arr_a.len() == arr_b.len() && arr_a.iter().zip(arr_b).all(|(x, y)| deep_equal(x, y))
        }

        (Value::Object(obj_a), Value::Object(obj_b)) => {
            if obj_a.len() != obj_b.len() {
                return false;
            }
            for (key, val_a) in obj_a {
                match obj_b.get(key) {
                    Some(val_b) => {
                        if !deep_equal(val_a, val_b) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        }

        (Value::Opaque(a), Value::Opaque(b)) => opaque_equal(a, b),

        // Different types are never equal
        _ => false,
    }
}

fn opaque_equal(a: &Opaque, b: &Opaque) -> bool {
    match (a, b) {
        (Opaque::Date(a), Opaque::Date(b)) => a == b,
        (Opaque::Error(a), Opaque::Error(b)) => a == b,
        (Opaque::Unstructured(a), Opaque::Unstructured(b)) => a == b,
        (Opaque::Set(a), Opaque::Set(b)) => unordered_equal(a, b, |x, y| deep_equal(x, y)),
        (Opaque::Map(a), Opaque::Map(b)) => unordered_equal(a, b, |(ka, va), (kb, vb)| {
            deep_equal(ka, kb) && deep_equal(va, vb)
        }),
        _ => false,
    }
}

fn unordered_equal<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (i, y) in b.iter().enumerate() {
            if !used[i] && eq(x, y) {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}
