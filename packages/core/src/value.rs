//! JSON value ordering shared by bucket assembly and the in-memory document store

use serde_json::Value;
use std::cmp::Ordering;

/// Rank of a value's type: missing/null < bool < number < string < array < object
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Compare two JSON values for sorting
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(sa)), Some(Value::String(sb))) => sa.cmp(sb),
        (Some(Value::Number(na)), Some(Value::Number(nb))) => {
            match (na.as_i64(), nb.as_i64()) {
                (Some(ia), Some(ib)) => ia.cmp(&ib),
                _ => {
                    let fa = na.as_f64().unwrap_or(0.0);
                    let fb = nb.as_f64().unwrap_or(0.0);
                    fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Some(Value::Bool(ba)), Some(Value::Bool(bb))) => ba.cmp(bb),
        (Some(va @ Value::Array(_)), Some(vb @ Value::Array(_)))
        | (Some(va @ Value::Object(_)), Some(vb @ Value::Object(_))) => {
            va.to_string().cmp(&vb.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Equality with numeric normalisation (`1 == 1.0`)
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(Some(a), Some(b)) == Ordering::Equal
        }
        _ => a == b,
    }
}
