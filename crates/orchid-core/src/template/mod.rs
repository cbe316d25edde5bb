//! `${path}` template resolution.
//!
//! Values in step payloads may embed `${dotted.path}` placeholders,
//! resolved against the layered context (memory first, then input, then
//! the context root). Two rules matter:
//!
//! - a string that *is* exactly one placeholder resolves to the value
//!   at the path with its native type intact (`"${count}"` stays a
//!   number, `"${user}"` stays an object);
//! - a mixed string interpolates, stringifying each resolved value and
//!   coercing unresolved placeholders to empty text instead of failing.
//!
//! Two special forms carried over from the document notation: the
//! literal `Date.now()` token (current epoch milliseconds) and a
//! restricted `Math.floor(<arithmetic>)` form evaluated after
//! placeholder substitution; anything but digits and `+-*/().` inside
//! aborts to 0.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::context::ExecutionContext;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern"))
}

/// Resolves a payload structurally: placeholders in strings, recursion
/// through arrays and objects, everything else untouched.
pub fn resolve(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => resolve_string(text, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve(item, ctx)).collect()),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve(item, ctx));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

pub fn resolve_string(text: &str, ctx: &ExecutionContext) -> Value {
    if text.trim() == "Date.now()" {
        return Value::from(chrono::Utc::now().timestamp_millis());
    }

    let re = placeholder_re();
    let substituted = match re.find(text) {
        None => text.to_string(),
        Some(found) if found.start() == 0 && found.end() == text.len() => {
            // The whole string is one placeholder: native-typed value.
            let path = text[2..text.len() - 1].trim();
            return resolve_path(path, ctx).unwrap_or(Value::Null);
        }
        Some(_) => re
            .replace_all(text, |caps: &regex::Captures| {
                resolve_path(caps[1].trim(), ctx)
                    .map(|value| render_scalar(&value))
                    .unwrap_or_default()
            })
            .into_owned(),
    };

    if let Some(number) = math_floor(substituted.trim()) {
        return number;
    }
    Value::String(substituted)
}

fn resolve_path(path: &str, ctx: &ExecutionContext) -> Option<Value> {
    if path == "Date.now()" {
        return Some(Value::from(chrono::Utc::now().timestamp_millis()));
    }
    ctx.lookup(path)
}

/// String form of a resolved value for interpolation: scalars render
/// bare, structured values render as compact JSON.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Condition-mode substitution: placeholders become tokens the
/// expression grammar can re-read. Strings are quoted, numbers and
/// booleans stay literal, structured values embed as JSON, unresolved
/// paths become `undefined`.
pub(crate) fn resolve_for_condition(text: &str, ctx: &ExecutionContext) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures| {
            match resolve_path(caps[1].trim(), ctx) {
                None => "undefined".to_string(),
                Some(Value::String(string)) => {
                    serde_json::to_string(&string).unwrap_or_else(|_| "undefined".to_string())
                }
                Some(other) => serde_json::to_string(&other).unwrap_or_else(|_| "undefined".to_string()),
            }
        })
        .into_owned()
}

/// `Math.floor(<expr>)` over substituted text. Returns `None` when the
/// text is not the floor form at all; returns 0 when it is but the
/// inner expression is not plain arithmetic.
fn math_floor(text: &str) -> Option<Value> {
    let inner = text.strip_prefix("Math.floor(")?.strip_suffix(')')?;
    let allowed = inner
        .chars()
        .all(|c| c.is_ascii_digit() || "+-*/(). \t".contains(c));
    if !allowed {
        return Some(Value::from(0));
    }
    let result = match eval_arithmetic(inner) {
        Some(number) if number.is_finite() => number.floor() as i64,
        _ => 0,
    };
    Some(Value::from(result))
}

/// Tiny arithmetic evaluator: numbers, `+ - * /`, parentheses, unary
/// minus. Anything unexpected yields `None`.
fn eval_arithmetic(expr: &str) -> Option<f64> {
    let mut parser = Arith {
        chars: expr.chars().peekable(),
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.chars.next().is_some() {
        return None;
    }
    Some(value)
}

struct Arith<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl Arith<'_> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expr(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    value /= self.factor()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn factor(&mut self) -> Option<f64> {
        self.skip_ws();
        match self.chars.peek()? {
            '(' => {
                self.chars.next();
                let value = self.expr()?;
                self.skip_ws();
                match self.chars.next() {
                    Some(')') => Some(value),
                    _ => None,
                }
            }
            '-' => {
                self.chars.next();
                Some(-self.factor()?)
            }
            c if c.is_ascii_digit() => self.number(),
            _ => None,
        }
    }

    fn number(&mut self) -> Option<f64> {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            text.push(self.chars.next()?);
        }
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use serde_json::json;

    fn ctx_with(memory: Value) -> ExecutionContext {
        let mut ctx = ExecutionContext::create(ContextOptions::default());
        if let Value::Object(map) = memory {
            ctx.update_memory(map);
        }
        ctx
    }

    #[test]
    fn pure_reference_keeps_native_type() {
        let ctx = ctx_with(json!({ "count": 3, "user": { "name": "ada" }, "tags": [1, 2] }));
        assert_eq!(resolve_string("${count}", &ctx), json!(3));
        assert_eq!(resolve_string("${user}", &ctx), json!({ "name": "ada" }));
        assert_eq!(resolve_string("${tags}", &ctx), json!([1, 2]));
        assert_eq!(resolve_string("${memory.count}", &ctx), json!(3));
    }

    #[test]
    fn mixed_string_interpolates_as_text() {
        let ctx = ctx_with(json!({ "count": 3, "user": { "name": "ada" } }));
        assert_eq!(resolve_string("x${count}y", &ctx), json!("x3y"));
        assert_eq!(
            resolve_string("who: ${user}", &ctx),
            json!("who: {\"name\":\"ada\"}")
        );
    }

    #[test]
    fn unresolved_placeholders_never_fail() {
        let ctx = ctx_with(json!({}));
        assert_eq!(resolve_string("${missing}", &ctx), Value::Null);
        assert_eq!(resolve_string("a${missing}b", &ctx), json!("ab"));
    }

    #[test]
    fn input_and_identity_are_reachable() {
        let mut ctx = ExecutionContext::create(ContextOptions {
            agent_id: Some("triage".into()),
            input: json!({ "x": 5 }).as_object().cloned().unwrap(),
            ..ContextOptions::default()
        });
        ctx.set_value("noise", json!(1));
        assert_eq!(resolve_string("${input.x}", &ctx), json!(5));
        assert_eq!(resolve_string("${agent_id}", &ctx), json!("triage"));
    }

    #[test]
    fn memory_shadows_input() {
        let mut ctx = ExecutionContext::create(ContextOptions {
            input: json!({ "x": "from-input" }).as_object().cloned().unwrap(),
            ..ContextOptions::default()
        });
        ctx.set_value("x", json!("from-memory"));
        assert_eq!(resolve_string("${x}", &ctx), json!("from-memory"));
    }

    #[test]
    fn literal_dotted_key_wins() {
        let ctx = ctx_with(json!({ "svc.fetch": { "status": 200 } }));
        assert_eq!(
            resolve_string("${svc.fetch}", &ctx),
            json!({ "status": 200 })
        );
        assert_eq!(resolve_string("${svc.fetch.status}", &ctx), json!(200));
    }

    #[test]
    fn date_now_token_yields_milliseconds() {
        let ctx = ctx_with(json!({}));
        let before = chrono::Utc::now().timestamp_millis();
        let value = resolve_string("Date.now()", &ctx);
        let millis = value.as_i64().unwrap();
        assert!(millis >= before);
        assert!(resolve_string("${Date.now()}", &ctx).is_i64());
    }

    #[test]
    fn math_floor_runs_after_substitution() {
        let ctx = ctx_with(json!({ "total": 50 }));
        assert_eq!(
            resolve_string("Math.floor(${memory.total} / 7)", &ctx),
            json!(7)
        );
        assert_eq!(resolve_string("Math.floor((3 + 5) * 2)", &ctx), json!(16));
    }

    #[test]
    fn math_floor_aborts_to_zero_on_anything_else() {
        let ctx = ctx_with(json!({ "name": "ada" }));
        assert_eq!(
            resolve_string("Math.floor(${memory.name} / 2)", &ctx),
            json!(0)
        );
        assert_eq!(resolve_string("Math.floor(1 +)", &ctx), json!(0));
        assert_eq!(resolve_string("Math.floor(1 / 0)", &ctx), json!(0));
    }

    #[test]
    fn payloads_resolve_structurally() {
        let ctx = ctx_with(json!({ "ticket": { "id": "T-1" } }));
        let payload = json!({
            "id": "${ticket.id}",
            "labels": ["${ticket.id}", "new"],
            "nested": { "ref": "see ${ticket.id}" }
        });
        assert_eq!(
            resolve(&payload, &ctx),
            json!({
                "id": "T-1",
                "labels": ["T-1", "new"],
                "nested": { "ref": "see T-1" }
            })
        );
    }

    #[test]
    fn condition_mode_quotes_and_tokenizes() {
        let ctx = ctx_with(json!({ "name": "ada", "count": 3, "flag": true, "tags": ["a"] }));
        assert_eq!(
            resolve_for_condition("${name} === \"ada\"", &ctx),
            "\"ada\" === \"ada\""
        );
        assert_eq!(resolve_for_condition("${count} >= 3", &ctx), "3 >= 3");
        assert_eq!(resolve_for_condition("!${flag}", &ctx), "!true");
        assert_eq!(resolve_for_condition("${tags}", &ctx), "[\"a\"]");
        assert_eq!(resolve_for_condition("${missing}", &ctx), "undefined");
    }
}
