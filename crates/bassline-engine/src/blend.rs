//! Blend modes: how a contact resolves an incoming value against what it
//! already holds.
//!
//! Accept-last takes the incoming value verbatim. Merge applies a
//! commutative, associative, idempotent combine so that racing writers
//! converge regardless of arrival order.

use serde_json::Value;

use bassline_topology::BlendMode;

/// Resolve an incoming value against the current one under a blend mode.
pub fn resolve(mode: BlendMode, current: &Value, incoming: &Value) -> Value {
    match mode {
        BlendMode::AcceptLast => incoming.clone(),
        BlendMode::Merge => merge(current, incoming),
    }
}

/// Commutative, associative, idempotent combine of two JSON values.
///
/// - null is the identity
/// - objects merge key-wise, recursing on shared keys
/// - arrays union, with the operands ordered canonically so the result
///   does not depend on argument order
/// - numbers take the maximum
/// - booleans take logical or
/// - anything else falls back to the canonically larger serialization,
///   which keeps the combine deterministic for mismatched types
pub fn merge(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Null, x) | (x, Value::Null) => x.clone(),
        (Value::Object(ma), Value::Object(mb)) => {
            let mut out = ma.clone();
            for (k, vb) in mb {
                let merged = match ma.get(k) {
                    Some(va) => merge(va, vb),
                    None => vb.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (Value::Array(xs), Value::Array(ys)) => {
            // Union keyed on canonical serialization.
            let (first, second) = if canon(a) <= canon(b) { (xs, ys) } else { (ys, xs) };
            let mut out = first.clone();
            for y in second {
                if !out.contains(y) {
                    out.push(y.clone());
                }
            }
            Value::Array(out)
        }
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NEG_INFINITY);
            let fb = nb.as_f64().unwrap_or(f64::NEG_INFINITY);
            if fa >= fb { a.clone() } else { b.clone() }
        }
        (Value::Bool(ba), Value::Bool(bb)) => Value::Bool(*ba || *bb),
        _ => {
            if canon(a) >= canon(b) { a.clone() } else { b.clone() }
        }
    }
}

fn canon(v: &Value) -> String {
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_identity() {
        assert_eq!(merge(&Value::Null, &json!(5)), json!(5));
        assert_eq!(merge(&json!("x"), &Value::Null), json!("x"));
    }

    #[test]
    fn merge_is_commutative() {
        let cases = [
            (json!(3), json!(7)),
            (json!({"a": 1}), json!({"b": 2})),
            (json!([1, 2]), json!([2, 3])),
            (json!(true), json!(false)),
            (json!("abc"), json!(17)),
        ];
        for (a, b) in cases {
            assert_eq!(merge(&a, &b), merge(&b, &a), "a={a} b={b}");
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let v = json!({"a": [1, 2], "b": 9});
        assert_eq!(merge(&v, &v), v);
    }

    #[test]
    fn objects_merge_recursively() {
        let a = json!({"x": {"n": 1}, "only_a": true});
        let b = json!({"x": {"n": 4, "m": 2}});
        assert_eq!(
            merge(&a, &b),
            json!({"x": {"n": 4, "m": 2}, "only_a": true})
        );
    }

    #[test]
    fn accept_last_takes_incoming() {
        let out = resolve(BlendMode::AcceptLast, &json!(1), &json!(2));
        assert_eq!(out, json!(2));
    }
}
