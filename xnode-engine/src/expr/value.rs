//! Coercions between JSON values and the expression language's scalars

use serde_json::{Number, Value};

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Integral numbers become JSON integers; NaN and infinities become null.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) if items.is_empty() => 0.0,
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        _ => f64::NAN,
    }
}

/// String form used by concatenation and `string()`.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| if v.is_null() { String::new() } else { to_display(v) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// `==` and `===` share one definition: numbers compare numerically
/// against numbers, numeric strings and booleans; everything else is
/// structural.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_) | Value::String(_) | Value::Bool(_))
        | (Value::String(_) | Value::Bool(_), Value::Number(_)) => {
            to_number(left) == to_number(right)
        }
        _ => left == right,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Approximate bytes held by a value, nested contents included.
///
/// Counting stops once `cap` is passed, so the cost is bounded by the cap
/// rather than by the size of the value.
pub fn footprint(value: &Value, cap: usize) -> usize {
    let mut total = 0usize;
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        total += match value {
            Value::String(s) => s.len() + 2,
            Value::Array(items) => {
                pending.extend(items.iter());
                2
            }
            Value::Object(map) => {
                pending.extend(map.values());
                2 + map.keys().map(|key| key.len() + 3).sum::<usize>()
            }
            _ => 8,
        };
        if total > cap {
            break;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_value_normalises_integers() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
        assert_eq!(number_value(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn test_loose_equality() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(loose_eq(&json!("2"), &json!(2)));
        assert!(loose_eq(&json!(true), &json!(1)));
        assert!(!loose_eq(&json!("a"), &json!(null)));
        assert!(loose_eq(&json!({"a": 1}), &json!({"a": 1})));
    }

    #[test]
    fn test_display() {
        assert_eq!(to_display(&json!([1, null, "x"])), "1,,x");
        assert_eq!(to_display(&json!({"a": 1})), "[object Object]");
        assert_eq!(to_display(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_footprint_counts_nested_values() {
        let inner = "x".repeat(100);
        assert_eq!(footprint(&json!(inner), usize::MAX), 102);
        assert_eq!(footprint(&json!([inner, inner]), usize::MAX), 206);
        assert_eq!(footprint(&json!({"k": [inner]}), usize::MAX), 2 + 4 + 2 + 102);
        assert_eq!(footprint(&json!(null), usize::MAX), 8);
    }

    #[test]
    fn test_footprint_stops_at_cap() {
        let items = vec![json!("abc"); 1000];
        assert!(footprint(&Value::Array(items), 50) <= 50 + 5);
    }
}
