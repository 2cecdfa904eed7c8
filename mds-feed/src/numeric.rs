//! Lenient numeric parsing for venue JSON, where prices arrive both as
//! numbers and as decimal strings. Missing or malformed values become zero.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_f64(&value))
}

pub(crate) fn value_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0.0,
    }
}

pub(crate) fn value_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_numbers_strings_and_garbage() {
        assert_eq!(value_f64(&json!(1.5)), 1.5);
        assert_eq!(value_f64(&json!("45000.25")), 45_000.25);
        assert_eq!(value_f64(&json!(null)), 0.0);
        assert_eq!(value_f64(&json!("not-a-number")), 0.0);
        assert_eq!(value_i64(&json!("1700000000000")), 1_700_000_000_000);
    }
}
