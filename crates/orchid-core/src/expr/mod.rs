//! Boolean condition evaluation for document control flow.
//!
//! Conditions are small JS-flavored expressions authored inline:
//!
//! ```yaml
//! - condition:
//!     if: ${memory.score} >= 80 && !${input.dryRun}
//!     then:
//!       - respond: "passed"
//! ```
//!
//! [`evaluate`] runs the full pipeline: template substitution in
//! condition mode (strings quoted, structured values embedded as JSON,
//! unresolved placeholders becoming `undefined`), tokenizing, parsing
//! into a typed AST, and one total evaluation pass. It never fails;
//! malformed expressions log at debug level and evaluate to `false`.
//! Bare dotted paths left in the expression resolve against the
//! execution context at evaluation time, so `a.length > 2` and
//! `${a}.length > 2` agree.
//!
//! [`evaluate_switch`] is the companion for switch-style branching:
//! exact case match first, then glob patterns (`*`, `?`), with the
//! `default` arm left to the caller.

mod eval;
mod parser;
mod token;

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::template::{render_scalar, resolve_for_condition};

pub fn evaluate(expression: &str, ctx: &ExecutionContext) -> bool {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return false;
    }
    let substituted = resolve_for_condition(trimmed, ctx);
    match parser::parse(&substituted) {
        Ok(ast) => eval::truthy(&eval::eval(&ast, ctx)),
        Err(err) => {
            tracing::debug!(
                "[Evaluator] condition `{}` did not parse ({}), treating as false",
                substituted,
                err
            );
            false
        }
    }
}

/// Picks the case key matching `value`: exact match wins, then the
/// first glob pattern that matches. `default` never matches here; the
/// executor falls back to it when this returns `None`.
pub fn evaluate_switch<'a>(value: &Value, cases: &'a [String]) -> Option<&'a str> {
    let text = render_scalar(value);
    for case in cases {
        if case != "default" && *case == text {
            return Some(case.as_str());
        }
    }
    for case in cases {
        if case == "default" {
            continue;
        }
        if let Ok(pattern) = glob::Pattern::new(case) {
            if pattern.matches(&text) {
                return Some(case.as_str());
            }
        }
    }
    None
}
