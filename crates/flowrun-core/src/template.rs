//! `{{ path }}` interpolation over JSON parameter trees.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.+?)\}\}").unwrap())
}

/// Replace every `{{ path }}` token found in string leaves of `params` with
/// the value at `path` in `data`.
///
/// A string consisting of exactly one token takes the referenced value with
/// its JSON type intact, unlike plain text substitution: `"{{count}}"` becomes
/// the number `3`, not the string `"3"`. Tokens embedded in longer text are
/// rendered as text. Tokens whose path does not resolve are left verbatim.
/// Non-string scalars pass through unchanged.
pub fn interpolate(params: &Value, data: &Value) -> Value {
    match params {
        Value::String(s) => interpolate_str(s, data),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, data)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_str(s: &str, data: &Value) -> Value {
    let re = token_re();

    if let Some(caps) = re.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str().len()) == Some(s.len());
        if whole {
            if let Some(value) = resolve_token(&caps[1], data) {
                return value;
            }
            return Value::String(s.to_string());
        }
    } else {
        return Value::String(s.to_string());
    }

    let replaced = re.replace_all(s, |caps: &regex::Captures<'_>| {
        match resolve_token(&caps[1], data) {
            Some(value) => render(&value),
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

/// Resolve the inside of a `{{ ... }}` token: a dotted path or `len(path)`.
fn resolve_token(token: &str, data: &Value) -> Option<Value> {
    let token = token.trim();
    if let Some(inner) = token
        .strip_prefix("len(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let n = match lookup_path(data, inner)? {
            Value::Array(items) => items.len(),
            Value::String(s) => s.chars().count(),
            Value::Object(map) => map.len(),
            Value::Null => 0,
            _ => return None,
        };
        return Some(Value::from(n as u64));
    }
    lookup_path(data, token).cloned()
}

/// Walk a dotted path (`a.b.0.c`, optional `$.` prefix) through objects and
/// arrays. `$` alone resolves to `data`.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let rest = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    if rest.is_empty() {
        return Some(data);
    }
    rest.split('.').try_fold(data, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_strings_unchanged() {
        let data = json!({"name": "Ann"});
        for s in ["", "hello", "{ name }", "{{", "price: $5 }}"] {
            assert_eq!(interpolate(&json!(s), &data), json!(s));
        }
    }

    #[test]
    fn test_embedded_tokens() {
        let data = json!({"lead": {"name": "Ann", "score": 9}, "rows": [1, 2, 3]});
        let params = json!({
            "subject": "Hello {{ lead.name }} ({{lead.score}})",
            "body": "Processed {{len($.rows)}} rows",
            "nested": ["{{lead.name}}", 5, true, null],
        });
        let out = interpolate(&params, &data);
        assert_eq!(out["subject"], "Hello Ann (9)");
        assert_eq!(out["body"], "Processed 3 rows");
        assert_eq!(out["nested"], json!(["Ann", 5, true, null]));
    }

    #[test]
    fn test_whole_token_keeps_type() {
        let data = json!({"rows": [{"a": 1}], "count": 2});
        let out = interpolate(&json!({"payload": "{{ rows }}", "n": "{{$.count}}"}), &data);
        assert_eq!(out["payload"], json!([{"a": 1}]));
        assert_eq!(out["n"], json!(2));

        // Surrounding text forces a string.
        let out = interpolate(&json!("{{count}} rows"), &data);
        assert_eq!(out, json!("2 rows"));
    }

    #[test]
    fn test_unresolved_left_verbatim() {
        let data = json!({"a": {"b": 1}});
        assert_eq!(
            interpolate(&json!("x {{a.c}} y {{ a.b }}"), &data),
            json!("x {{a.c}} y 1")
        );
        assert_eq!(interpolate(&json!("{{missing}}"), &data), json!("{{missing}}"));
    }

    #[test]
    fn test_lookup_path() {
        let data = json!({"a": [{"b": "x"}]});
        assert_eq!(lookup_path(&data, "a.0.b"), Some(&json!("x")));
        assert_eq!(lookup_path(&data, "$.a.0.b"), Some(&json!("x")));
        assert_eq!(lookup_path(&data, "$"), Some(&data));
        assert_eq!(lookup_path(&data, "a.1"), None);
        assert_eq!(lookup_path(&data, "a.0.b.c"), None);
    }
}
