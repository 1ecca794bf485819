use std::cmp::Ordering;

use serde_json::Value;

use super::parser::{BinaryOp, Expr};
use super::{ExprError, Scope};

impl Expr {
    /// Evaluate against `scope`. Reads only; never mutates the data.
    pub fn eval(&self, scope: &Scope<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Root => Ok(scope.root().clone()),
            Expr::Ident(name) => Ok(match scope.lookup(name) {
                Some(v) => v.clone(),
                None => scope.root().get(name).cloned().unwrap_or(Value::Null),
            }),
            Expr::Member(base, name) => member(&base.eval(scope)?, name),
            Expr::Index(base, index) => {
                let base = base.eval(scope)?;
                match index.eval(scope)? {
                    Value::Number(n) => match n.as_f64() {
                        Some(f) if f >= 0.0 && f.fract() == 0.0 => {
                            member(&base, &(f as u64).to_string())
                        }
                        _ => Ok(Value::Null),
                    },
                    Value::String(key) => member(&base, &key),
                    other => Err(ExprError::Eval(format!("invalid index: {}", other))),
                }
            }
            Expr::Len(arg) => length(&arg.eval(scope)?),
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.eval(scope)?))),
            Expr::Neg(inner) => Ok(number(-to_number(&inner.eval(scope)?))),
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, scope),
        }
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> Result<Value, ExprError> {
    let left = lhs.eval(scope)?;

    // Short-circuit operators yield an operand, not a bool.
    match op {
        BinaryOp::And if !is_truthy(&left) => return Ok(left),
        BinaryOp::Or if is_truthy(&left) => return Ok(left),
        BinaryOp::And | BinaryOp::Or => return rhs.eval(scope),
        _ => {}
    }

    let right = rhs.eval(scope)?;
    let result = match op {
        BinaryOp::Eq => loose_eq(&left, &right),
        BinaryOp::NotEq => !loose_eq(&left, &right),
        BinaryOp::StrictEq => strict_eq(&left, &right),
        BinaryOp::StrictNotEq => !strict_eq(&left, &right),
        BinaryOp::Lt => compare(&left, &right) == Some(Ordering::Less),
        BinaryOp::Le => matches!(compare(&left, &right), Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => compare(&left, &right) == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(
            compare(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(Value::Bool(result))
}

fn member(base: &Value, name: &str) -> Result<Value, ExprError> {
    match base {
        Value::Null => Err(ExprError::Eval(format!(
            "cannot read property '{}' of null",
            name
        ))),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) => Ok(match name {
            "length" => Value::from(items.len() as u64),
            _ => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
        }),
        Value::String(s) => Ok(match name {
            "length" => Value::from(s.chars().count() as u64),
            _ => name
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
        }),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Null),
    }
}

fn length(value: &Value) -> Result<Value, ExprError> {
    let n = match value {
        Value::Array(items) => items.len(),
        Value::String(s) => s.chars().count(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => return Err(ExprError::Eval(format!("len() of non-sequence: {}", other))),
    };
    Ok(Value::from(n as u64))
}

/// JavaScript-style truthiness over JSON values.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
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
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => to_number(a) == to_number(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{evaluate, Scope};
    use super::*;
    use serde_json::json;

    fn eval(src: &str, data: &Value) -> Value {
        evaluate(src, &Scope::new(data)).unwrap()
    }

    #[test]
    fn comparisons_coerce_like_javascript() {
        let data = json!({"age": "45", "score": 7, "name": "Ann"});
        assert_eq!(eval("$.age > 30", &data), json!(true));
        assert_eq!(eval("$.age == 45", &data), json!(true));
        assert_eq!(eval("$.age === 45", &data), json!(false));
        assert_eq!(eval("$.score >= 7 && $.score < 8", &data), json!(true));
        assert_eq!(eval("$.name < 'Bob'", &data), json!(true));
        assert_eq!(eval("$.name > 3", &data), json!(false));
        assert_eq!(eval("$.score !== '7'", &data), json!(true));
        assert_eq!(eval("-1 < $.score", &data), json!(true));
    }

    #[test]
    fn logical_operators_return_operands() {
        let data = json!({"rows": [1, 2], "empty": ""});
        assert_eq!(eval("$.empty || 'fallback'", &data), json!("fallback"));
        assert_eq!(eval("$.rows && $.rows.length", &data), json!(2));
        assert_eq!(eval("!$.empty", &data), json!(true));
        assert_eq!(eval("!($.rows.length == 2)", &data), json!(false));
    }

    #[test]
    fn access_paths() {
        let data = json!({"items": [{"name": "a"}, {"name": "b"}], "meta": {"k-1": 5}});
        assert_eq!(eval("$.items[1].name", &data), json!("b"));
        assert_eq!(eval("$.items.0.name", &data), json!("a"));
        assert_eq!(eval("$.meta['k-1']", &data), json!(5));
        assert_eq!(eval("$.items[5]", &data), Value::Null);
        assert_eq!(eval("len($.items[0].name)", &data), json!(1));
        assert_eq!(eval("len($.meta)", &data), json!(1));
        assert_eq!(eval("len($.nothing)", &data), json!(0));
    }

    #[test]
    fn null_member_access_is_an_error() {
        let data = json!({});
        assert!(evaluate("$.a.b", &Scope::new(&data)).is_err());
        assert!(evaluate("len(5)", &Scope::new(&data)).is_err());
    }

    #[test]
    fn equality_of_nulls_and_structures() {
        let data = json!({"a": null, "list": [1, 2]});
        assert_eq!(eval("$.a == null", &data), json!(true));
        assert_eq!(eval("$.missing == null", &data), json!(true));
        assert_eq!(eval("$.a == 0", &data), json!(false));
        assert_eq!(eval("$.list == $.list", &data), json!(true));
    }
}
