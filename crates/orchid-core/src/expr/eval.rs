//! Total evaluation over the condition AST.
//!
//! Comparison and truthiness follow the loose conventions agent authors
//! write against: `==`/`!=` coerce numerically when both sides look
//! numeric, `===`/`!==` never coerce, and empty string / 0 / false /
//! null are falsy. Evaluation cannot fail; anything outside the rules
//! below collapses to `null` or `false`.

use serde_json::Value;

use super::parser::{BinOp, Expr, StrMethod};
use crate::context::ExecutionContext;
use crate::template::render_scalar;

pub(super) fn eval(expr: &Expr, ctx: &ExecutionContext) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => ctx.lookup(path).unwrap_or(Value::Null),
        Expr::Length(inner) => match eval(inner, ctx) {
            Value::String(text) => Value::from(text.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            _ => Value::Null,
        },
        Expr::StrCall { recv, method, arg } => {
            let recv = eval(recv, ctx);
            let arg = eval(arg, ctx);
            Value::Bool(str_call(&recv, *method, &arg))
        }
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, ctx))),
        Expr::Binary { op, lhs, rhs } => match op {
            BinOp::Or => {
                let lhs = eval(lhs, ctx);
                if truthy(&lhs) {
                    lhs
                } else {
                    eval(rhs, ctx)
                }
            }
            BinOp::And => {
                let lhs = eval(lhs, ctx);
                if truthy(&lhs) {
                    eval(rhs, ctx)
                } else {
                    lhs
                }
            }
            BinOp::StrictEq => Value::Bool(strict_eq(&eval(lhs, ctx), &eval(rhs, ctx))),
            BinOp::StrictNe => Value::Bool(!strict_eq(&eval(lhs, ctx), &eval(rhs, ctx))),
            BinOp::LooseEq => Value::Bool(loose_eq(&eval(lhs, ctx), &eval(rhs, ctx))),
            BinOp::LooseNe => Value::Bool(!loose_eq(&eval(lhs, ctx), &eval(rhs, ctx))),
            BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => {
                Value::Bool(compare(*op, &eval(lhs, ctx), &eval(rhs, ctx)))
            }
        },
    }
}

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn strict_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    if strict_eq(lhs, rhs) {
        return true;
    }
    match (as_num(lhs), as_num(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_num(lhs), as_num(rhs)) {
        return match op {
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            _ => false,
        };
    }
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return match op {
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            _ => false,
        };
    }
    false
}

/// Numeric view used by loose equality and ordering. Booleans read as
/// 0/1 and numeric-looking strings parse; blank strings read as 0.
fn as_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

fn str_call(recv: &Value, method: StrMethod, arg: &Value) -> bool {
    match method {
        StrMethod::Includes => match recv {
            Value::String(text) => text.contains(&render_scalar(arg)),
            Value::Array(items) => items.iter().any(|item| loose_eq(item, arg)),
            _ => false,
        },
        StrMethod::StartsWith => match (recv, arg) {
            (Value::String(text), Value::String(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        StrMethod::EndsWith => match (recv, arg) {
            (Value::String(text), Value::String(suffix)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
    }
}
