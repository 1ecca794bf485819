//! Declarative data-cleaning operations used by `transform` nodes.
//!
//! Input is either one record or a sequence of records. Field operations apply
//! to every record of a sequence; `dropInvalid` only acts on sequences.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use flowrun_core::expr::is_truthy;
use flowrun_core::graph::TransformStep;

type Record = Map<String, Value>;

/// Apply one step.
pub fn apply(step: &TransformStep, data: Value) -> Value {
    match step {
        TransformStep::Trim { fields } => {
            map_records(data, &|record: &mut Record| trim_fields(record, fields))
        }
        TransformStep::TitleCase { fields } => {
            map_records(data, &|record: &mut Record| title_case_fields(record, fields))
        }
        TransformStep::NormalizePhone { field, country } => {
            map_records(data, &|record: &mut Record| {
                normalize_phone_field(record, field, country.as_deref())
            })
        }
        TransformStep::DropInvalid { rules } => drop_invalid(data, rules),
        TransformStep::Unsupported { op, .. } => {
            debug!(op = %op, "Unsupported transform op, passing data through");
            data
        }
    }
}

fn map_records(data: Value, f: &dyn Fn(&mut Record)) -> Value {
    match data {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| map_records(item, f))
                .collect(),
        ),
        Value::Object(mut record) => {
            f(&mut record);
            Value::Object(record)
        }
        other => other,
    }
}

fn trim_fields(record: &mut Record, fields: &[String]) {
    for field in fields {
        if let Some(Value::String(s)) = record.get_mut(field) {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
    }
}

fn title_case_fields(record: &mut Record, fields: &[String]) {
    for field in fields {
        if let Some(Value::String(s)) = record.get_mut(field) {
            *s = title_case(s);
        }
    }
}

/// Lowercase, then capitalize the first letter of each space-separated word.
/// Runs of spaces are kept as they are.
pub fn title_case(s: &str) -> String {
    s.to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn normalize_phone_field(record: &mut Record, field: &str, country: Option<&str>) {
    let Some(value) = record.get_mut(field) else {
        return;
    };
    if !is_truthy(value) {
        return;
    }
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return,
    };
    *value = Value::String(normalize_phone(&raw, country));
}

/// Keep only digits. For `MY`, numbers not already starting with the `60`
/// country code get it, replacing a single leading trunk `0`.
pub fn normalize_phone(raw: &str, country: Option<&str>) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match country {
        Some("MY") if !digits.starts_with("60") => {
            format!("60{}", digits.strip_prefix('0').unwrap_or(&digits))
        }
        _ => digits,
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

pub fn is_valid_email(s: &str) -> bool {
    email_re().is_match(s)
}

/// A parsed `field:constraint[:constraint...]` rule.
struct Rule<'a> {
    field: &'a str,
    required: bool,
    email: bool,
}

impl<'a> Rule<'a> {
    fn parse(rule: &'a str) -> Self {
        let mut parts = rule.split(':');
        let field = parts.next().unwrap_or_default();
        let mut parsed = Self {
            field,
            required: false,
            email: false,
        };
        for check in parts {
            match check {
                "required" => parsed.required = true,
                "email" => parsed.email = true,
                other => debug!(rule = %rule, constraint = %other, "Ignoring unknown constraint"),
            }
        }
        parsed
    }

    fn passes(&self, record: &Value) -> bool {
        let value = record.get(self.field);
        if self.required && !value.is_some_and(is_truthy) {
            return false;
        }
        if self.email && !value.and_then(Value::as_str).is_some_and(is_valid_email) {
            return false;
        }
        true
    }
}

fn drop_invalid(data: Value, rules: &[String]) -> Value {
    let Value::Array(items) = data else {
        return data;
    };
    let rules: Vec<Rule<'_>> = rules.iter().map(|r| Rule::parse(r)).collect();
    let before = items.len();
    let kept: Vec<Value> = items
        .into_iter()
        .filter(|item| rules.iter().all(|rule| rule.passes(item)))
        .collect();
    debug!(before, after = kept.len(), "Dropped invalid records");
    Value::Array(kept)
}
