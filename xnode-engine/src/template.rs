//! `{{dotted.path}}` interpolation against the execution context

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("Invalid template token regex"));

/// Replace every `{{path}}` in `template` with the value found at that
/// dotted path in `scope`.
///
/// A token whose path is missing (or resolves to null) is left verbatim.
/// Strings are inserted raw; any other value is inserted as compact JSON.
pub fn interpolate(template: &str, scope: &Value) -> String {
    TOKEN_PATTERN
        .replace_all(template, |caps: &Captures<'_>| {
            match lookup(scope, &caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Nested lookup by dot-separated keys. Array segments index by position.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = scope;
    for segment in path.trim().split('.') {
        let segment = segment.trim();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "inputs": {"topic": "rust"},
            "outputs": {
                "in1": {"text": "hello"},
                "http1": {"status": 200, "body": {"items": [1, 2]}},
                "empty": {"value": null}
            }
        })
    }

    #[test]
    fn test_string_values_inserted_raw() {
        assert_eq!(
            interpolate("Say {{ outputs.in1.text }} about {{inputs.topic}}", &scope()),
            "Say hello about rust"
        );
    }

    #[test]
    fn test_non_string_values_serialised_as_json() {
        assert_eq!(interpolate("{{outputs.http1.status}}", &scope()), "200");
        assert_eq!(
            interpolate("{{outputs.http1.body}}", &scope()),
            r#"{"items":[1,2]}"#
        );
        assert_eq!(interpolate("{{outputs.http1.body.items.1}}", &scope()), "2");
    }

    #[test]
    fn test_missing_path_left_verbatim() {
        assert_eq!(
            interpolate("a {{outputs.nope.text}} b", &scope()),
            "a {{outputs.nope.text}} b"
        );
        assert_eq!(interpolate("{{outputs.empty.value}}", &scope()), "{{outputs.empty.value}}");
    }

    #[test]
    fn test_text_without_tokens_unchanged() {
        assert_eq!(interpolate("plain {text}", &scope()), "plain {text}");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Templates without `{{` are returned unchanged.
        #[test]
        fn prop_plain_text_is_identity(text in "[^{}]{0,100}") {
            prop_assert_eq!(interpolate(&text, &json!({})), text);
        }

        /// Unresolvable tokens survive interpolation exactly.
        #[test]
        fn prop_unknown_tokens_survive(key in "[a-z]{1,10}") {
            let template = format!("x {{{{missing.{}}}}} y", key);
            prop_assert_eq!(interpolate(&template, &json!({"inputs": {}})), template);
        }
    }
}
