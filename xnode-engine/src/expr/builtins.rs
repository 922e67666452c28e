//! Whitelisted functions callable from expressions
//!
//! Every builtin is pure: it sees only its arguments and returns a new
//! value. Method-style calls arrive with the receiver as the first
//! argument, so `s.toUpperCase()` and `upper(s)` resolve to the same entry.

use super::eval::SandboxError;
use super::value::{loose_eq, number_value, to_display, to_number, type_name};
use serde_json::Value;

/// Names that write to the evaluation log instead of returning a value.
pub fn is_log(name: &str) -> bool {
    matches!(name, "log" | "console.log")
}

pub fn call(name: &str, args: &[Value]) -> Result<Value, SandboxError> {
    let value = match name {
        // Strings and collections
        "len" | "length" => number_value(length(name, arg(name, args, 0)?)? as f64),
        "upper" | "toUpperCase" => Value::String(string_arg(name, args, 0)?.to_uppercase()),
        "lower" | "toLowerCase" => Value::String(string_arg(name, args, 0)?.to_lowercase()),
        "trim" => Value::String(string_arg(name, args, 0)?.trim().to_string()),
        "contains" | "includes" => Value::Bool(contains(name, args)?),
        "startsWith" => {
            let s = string_arg(name, args, 0)?;
            Value::Bool(s.starts_with(string_arg(name, args, 1)?))
        }
        "endsWith" => {
            let s = string_arg(name, args, 0)?;
            Value::Bool(s.ends_with(string_arg(name, args, 1)?))
        }
        "indexOf" => number_value(index_of(name, args)?),
        "replace" => {
            let s = string_arg(name, args, 0)?;
            let from = string_arg(name, args, 1)?;
            let to = string_arg(name, args, 2)?;
            Value::String(s.replacen(from, to, 1))
        }
        "split" => {
            let s = string_arg(name, args, 0)?;
            let sep = string_arg(name, args, 1)?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| Value::String(p.to_string())).collect()
            };
            Value::Array(parts)
        }
        "join" => {
            let items = array_arg(name, args, 0)?;
            let sep = match args.get(1) {
                Some(Value::String(s)) => s.as_str(),
                Some(other) => return Err(type_error(name, "string", other)),
                None => ",",
            };
            Value::String(
                items
                    .iter()
                    .map(|v| if v.is_null() { String::new() } else { to_display(v) })
                    .collect::<Vec<_>>()
                    .join(sep),
            )
        }
        "slice" | "substring" => slice(name, args)?,
        "keys" | "Object.keys" => match arg(name, args, 0)? {
            Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
            Value::Array(items) => Value::Array((0..items.len()).map(Value::from).collect()),
            other => return Err(type_error(name, "object", other)),
        },
        "values" | "Object.values" => match arg(name, args, 0)? {
            Value::Object(map) => Value::Array(map.values().cloned().collect()),
            Value::Array(items) => Value::Array(items.clone()),
            other => return Err(type_error(name, "object", other)),
        },

        // Conversions
        "number" | "Number" | "parseFloat" => number_value(to_number(arg(name, args, 0)?)),
        "parseInt" => number_value(to_number(arg(name, args, 0)?).trunc()),
        "string" | "String" | "toString" => Value::String(to_display(arg(name, args, 0)?)),
        "toFixed" => {
            let n = to_number(arg(name, args, 0)?);
            let digits = args.get(1).map(to_number).unwrap_or(0.0).clamp(0.0, 20.0) as usize;
            Value::String(format!("{:.*}", digits, n))
        }
        "JSON.stringify" => Value::String(
            serde_json::to_string(arg(name, args, 0)?).map_err(|e| SandboxError::Type {
                reason: format!("JSON.stringify failed: {}", e),
            })?,
        ),
        "JSON.parse" => {
            let text = string_arg(name, args, 0)?;
            serde_json::from_str(text).map_err(|e| SandboxError::Type {
                reason: format!("JSON.parse failed: {}", e),
            })?
        }

        // Math
        "abs" | "Math.abs" => number_value(num_arg(name, args, 0)?.abs()),
        "floor" | "Math.floor" => number_value(num_arg(name, args, 0)?.floor()),
        "ceil" | "Math.ceil" => number_value(num_arg(name, args, 0)?.ceil()),
        "round" | "Math.round" => number_value((num_arg(name, args, 0)? + 0.5).floor()),
        "sqrt" | "Math.sqrt" => number_value(num_arg(name, args, 0)?.sqrt()),
        "pow" | "Math.pow" => number_value(num_arg(name, args, 0)?.powf(num_arg(name, args, 1)?)),
        "min" | "Math.min" => number_value(
            numbers(args)
                .into_iter()
                .fold(f64::INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) }),
        ),
        "max" | "Math.max" => number_value(
            numbers(args)
                .into_iter()
                .fold(f64::NEG_INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) }),
        ),

        _ => {
            return Err(SandboxError::UnknownFunction {
                name: name.to_string(),
            })
        }
    };
    Ok(value)
}

/// `min`/`max` accept either variadic numbers or a single array.
fn numbers(args: &[Value]) -> Vec<f64> {
    match args {
        [Value::Array(items)] => items.iter().map(to_number).collect(),
        _ => args.iter().map(to_number).collect(),
    }
}

fn length(name: &str, value: &Value) -> Result<usize, SandboxError> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(type_error(name, "string or array", other)),
    }
}

fn contains(name: &str, args: &[Value]) -> Result<bool, SandboxError> {
    let needle = arg(name, args, 1)?;
    match arg(name, args, 0)? {
        Value::String(s) => Ok(s.contains(to_display(needle).as_str())),
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(map.contains_key(&to_display(needle))),
        other => Err(type_error(name, "string or array", other)),
    }
}

fn index_of(name: &str, args: &[Value]) -> Result<f64, SandboxError> {
    let needle = arg(name, args, 1)?;
    let found = match arg(name, args, 0)? {
        Value::String(s) => {
            let needle = to_display(needle);
            s.find(needle.as_str()).map(|byte| s[..byte].chars().count())
        }
        Value::Array(items) => items.iter().position(|item| loose_eq(item, needle)),
        other => return Err(type_error(name, "string or array", other)),
    };
    Ok(found.map(|i| i as f64).unwrap_or(-1.0))
}

fn slice(name: &str, args: &[Value]) -> Result<Value, SandboxError> {
    let resolve = |len: usize, value: Option<&Value>, default: usize| -> usize {
        match value {
            None | Some(Value::Null) => default,
            Some(v) => {
                let n = to_number(v);
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };

    match arg(name, args, 0)? {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let start = resolve(chars.len(), args.get(1), 0);
            let end = resolve(chars.len(), args.get(2), chars.len());
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        Value::Array(items) => {
            let start = resolve(items.len(), args.get(1), 0);
            let end = resolve(items.len(), args.get(2), items.len());
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        other => Err(type_error(name, "string or array", other)),
    }
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Value, SandboxError> {
    args.get(index).ok_or_else(|| SandboxError::Type {
        reason: format!("{} expects at least {} argument(s)", name, index + 1),
    })
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, SandboxError> {
    match arg(name, args, index)? {
        Value::String(s) => Ok(s),
        other => Err(type_error(name, "string", other)),
    }
}

fn array_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Vec<Value>, SandboxError> {
    match arg(name, args, index)? {
        Value::Array(items) => Ok(items),
        other => Err(type_error(name, "array", other)),
    }
}

fn num_arg(name: &str, args: &[Value], index: usize) -> Result<f64, SandboxError> {
    Ok(to_number(arg(name, args, index)?))
}

fn type_error(name: &str, expected: &str, found: &Value) -> SandboxError {
    SandboxError::Type {
        reason: format!("{} expects a {}, got {}", name, expected, type_name(found)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_ok(name: &str, args: Vec<Value>) -> Value {
        call(name, &args).unwrap()
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(call_ok("upper", vec![json!("abc")]), json!("ABC"));
        assert_eq!(call_ok("toLowerCase", vec![json!("AbC")]), json!("abc"));
        assert_eq!(call_ok("trim", vec![json!("  x ")]), json!("x"));
        assert_eq!(call_ok("len", vec![json!("héllo")]), json!(5));
        assert_eq!(call_ok("split", vec![json!("a,b"), json!(",")]), json!(["a", "b"]));
        assert_eq!(call_ok("join", vec![json!(["a", 1]), json!("-")]), json!("a-1"));
        assert_eq!(call_ok("replace", vec![json!("aa"), json!("a"), json!("b")]), json!("ba"));
    }

    #[test]
    fn test_slice_handles_negative_bounds() {
        assert_eq!(call_ok("slice", vec![json!("hello"), json!(-3)]), json!("llo"));
        assert_eq!(call_ok("slice", vec![json!([1, 2, 3]), json!(1), json!(2)]), json!([2]));
        assert_eq!(call_ok("substring", vec![json!("abc"), json!(2), json!(1)]), json!(""));
    }

    #[test]
    fn test_math_builtins() {
        assert_eq!(call_ok("Math.floor", vec![json!(1.7)]), json!(1));
        assert_eq!(call_ok("Math.round", vec![json!(2.5)]), json!(3));
        assert_eq!(call_ok("Math.round", vec![json!(-2.5)]), json!(-2));
        assert_eq!(call_ok("max", vec![json!(1), json!(5), json!(3)]), json!(5));
        assert_eq!(call_ok("Math.min", vec![json!([4, 2, 9])]), json!(2));
        assert_eq!(call_ok("Math.max", vec![]), Value::Null);
    }

    #[test]
    fn test_json_builtins() {
        assert_eq!(call_ok("JSON.stringify", vec![json!({"a": [1]})]), json!("{\"a\":[1]}"));
        assert_eq!(call_ok("JSON.parse", vec![json!("{\"a\":1}")]), json!({"a": 1}));
        assert!(call("JSON.parse", &[json!("{")]).is_err());
    }

    #[test]
    fn test_contains_and_index_of() {
        assert_eq!(call_ok("includes", vec![json!([1, 2]), json!(2)]), json!(true));
        assert_eq!(call_ok("contains", vec![json!("hello"), json!("ell")]), json!(true));
        assert_eq!(call_ok("indexOf", vec![json!("abc"), json!("z")]), json!(-1));
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            call("eval", &[json!("1")]),
            Err(SandboxError::UnknownFunction {
                name: "eval".to_string()
            })
        );
    }

    #[test]
    fn test_type_errors_name_the_function() {
        let err = call("upper", &[json!(1)]).unwrap_err();
        assert_eq!(err.to_string(), "upper expects a string, got number");
        let err = call("trim", &[]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
