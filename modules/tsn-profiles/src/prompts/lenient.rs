//! Deserializers that accept the loose shapes small models tend to emit
//! (numbers as strings, nulls for text) while still rejecting wrong types.

use std::collections::BTreeMap;

use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn number(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => Ok(s.trim().parse::<f64>().ok()),
        other => Err(format!("expected a number, got {other}")),
    }
}

/// Number, numeric string or null. Unparsable strings become `None`.
pub fn score<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    number(&value).map_err(D::Error::custom)
}

/// Like [`score`], truncated toward zero.
pub fn whole<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(number(&value)
        .map_err(D::Error::custom)?
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64))
}

/// String, null (empty) or a scalar rendered as text.
pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        v @ (Value::Number(_) | Value::Bool(_)) => Ok(v.to_string()),
        other => Err(D::Error::custom(format!("expected text, got {other}"))),
    }
}

/// Topic → weight. Entries whose weight is not a number are dropped.
pub fn weights<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(k, v)| number(&v).ok().flatten().map(|w| (k, w)))
            .collect()),
        other => Err(D::Error::custom(format!("expected an object, got {other}"))),
    }
}

/// Metric key → reason. Non-string reasons are rendered as text.
pub fn reasons<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        other => Err(D::Error::custom(format!("expected an object, got {other}"))),
    }
}
