//! Structural equality over the JSON shape of replicated values.
//!
//! The delta detector never compares typed values directly; it serializes
//! them and asks [`equal`] whether two shapes match. Rules:
//! - arrays are ordered and must match element for element;
//! - keyed records must have identical key sets;
//! - numbers compare by value, so `1` and `1.0` are equal (point collections
//!   round-trip through both encodings);
//! - strings that both parse as RFC 3339 timestamps compare by instant;
//! - `null` equals only `null`; [`equal_field`] additionally treats a missing
//!   field as `null`.

use serde::Serialize;
use serde_json::{Number, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(left), Value::Bool(right)) => left == right,
        (Value::Number(left), Value::Number(right)) => numbers_equal(left, right),
        (Value::String(left), Value::String(right)) => left == right || same_instant(left, right),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(l, r)| equal(l, r))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, l)| right.get(key).is_some_and(|r| equal(l, r)))
        }
        _ => false,
    }
}

/// Compares two optional field values, treating a missing field as `null`.
pub fn equal_field(a: Option<&Value>, b: Option<&Value>) -> bool {
    equal(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

/// Compares two typed values by shape. A value that cannot be serialized
/// falls back to its `PartialEq` implementation.
pub fn equal_typed<T: Serialize + PartialEq>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(left), Ok(right)) => equal(&left, &right),
        _ => a == b,
    }
}

fn numbers_equal(left: &Number, right: &Number) -> bool {
    if left == right {
        return true;
    }
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return l == r;
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn same_instant(left: &str, right: &str) -> bool {
    if !looks_like_timestamp(left) || !looks_like_timestamp(right) {
        return false;
    }
    match (
        OffsetDateTime::parse(left, &Rfc3339),
        OffsetDateTime::parse(right, &Rfc3339),
    ) {
        (Ok(l), Ok(r)) => l == r,
        _ => false,
    }
}

// Cheap shape check so ordinary strings never hit the parser.
fn looks_like_timestamp(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 20 && bytes[4] == b'-' && bytes[7] == b'-' && bytes[10] == b'T'
}
