//! The primitive gadget catalogue.
//!
//! A primitive group computes its boundary outputs as a pure function of its
//! named boundary inputs. Evaluation only fires once every input is non-null;
//! the engine writes the result back through its normal update path, so
//! non-idempotent gadgets are a correctness bug in the gadget, not the loop.

use std::collections::BTreeMap;

use serde_json::Value;

/// Evaluate a primitive by name over named, non-null inputs.
///
/// Returns `None` when the gadget is unknown or its inputs are insufficient.
pub fn evaluate(gadget: &str, inputs: &BTreeMap<String, Value>) -> Option<Value> {
    match gadget {
        "add" => fold_numbers(inputs, 0.0, |acc, n| acc + n),
        "multiply" => fold_numbers(inputs, 1.0, |acc, n| acc * n),
        "concat" => {
            if inputs.is_empty() {
                return None;
            }
            let mut out = String::new();
            for v in inputs.values() {
                match v {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Some(Value::String(out))
        }
        "gate" => {
            let control = inputs.get("control")?.as_bool()?;
            let value = inputs.get("value")?;
            control.then(|| value.clone())
        }
        "and" => fold_bools(inputs, |acc, b| acc && b),
        "or" => fold_bools(inputs, |acc, b| acc || b),
        "not" => {
            let (_, v) = inputs.iter().next()?;
            Some(Value::Bool(!v.as_bool()?))
        }
        _ => None,
    }
}

fn fold_numbers(
    inputs: &BTreeMap<String, Value>,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> Option<Value> {
    if inputs.is_empty() {
        return None;
    }
    let mut acc = init;
    for v in inputs.values() {
        acc = f(acc, v.as_f64()?);
    }
    serde_json::Number::from_f64(acc).map(Value::Number)
}

fn fold_bools(inputs: &BTreeMap<String, Value>, f: impl Fn(bool, bool) -> bool) -> Option<Value> {
    let mut iter = inputs.values();
    let mut acc = iter.next()?.as_bool()?;
    for v in iter {
        acc = f(acc, v.as_bool()?);
    }
    Some(Value::Bool(acc))
}
