// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression evaluation port.
//!
//! The full expression language lives outside the kernel; executors only
//! need a small seam to evaluate flow conditions, scripts, and FEEL
//! literals (`=`-prefixed). [`SimpleEval`] covers literals, variable
//! references, and binary comparisons, which is the subset the built-in
//! tests and timer/correlation paths rely on.

use crate::error::EngineError;
use flow_core::Variables;
use serde_json::Value;

/// Strip the FEEL marker from an expression, if present.
pub fn strip_feel(expression: &str) -> &str {
    expression.strip_prefix('=').unwrap_or(expression).trim()
}

fn dequote(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
}

/// Evaluation seam used by executors and timer/correlation preprocessing.
pub trait ExpressionEval: Send + Sync {
    /// Evaluate an expression against a variable scope.
    fn evaluate(&self, expression: &str, vars: &Variables) -> Result<Value, EngineError>;

    /// Evaluate as a guard condition. JSON truthiness: `false`, `null`,
    /// `0`, and `""` are false, everything else true.
    fn evaluate_bool(&self, expression: &str, vars: &Variables) -> Result<bool, EngineError> {
        Ok(truthy(&self.evaluate(expression, vars)?))
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Built-in evaluator for the literal/comparison subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEval;

impl SimpleEval {
    fn resolve(&self, operand: &str, vars: &Variables) -> Result<Value, EngineError> {
        let operand = operand.trim();
        if let Some(literal) = dequote(operand) {
            return Ok(Value::String(literal.to_string()));
        }
        if operand == "true" {
            return Ok(Value::Bool(true));
        }
        if operand == "false" {
            return Ok(Value::Bool(false));
        }
        if operand == "null" {
            return Ok(Value::Null);
        }
        if let Ok(number) = operand.parse::<f64>() {
            return Ok(serde_json::Number::from_f64(number)
                .map(Value::Number)
                .unwrap_or(Value::Null));
        }
        // Variable reference, with dot-path traversal into objects.
        let mut parts = operand.split('.');
        let root = parts.next().unwrap_or(operand);
        let mut current = vars
            .get(root)
            .cloned()
            .ok_or_else(|| EngineError::Expression(format!("unknown variable: {root}")))?;
        for part in parts {
            current = match current {
                Value::Object(ref map) => map.get(part).cloned().ok_or_else(|| {
                    EngineError::Expression(format!("unknown field: {operand}"))
                })?,
                _ => {
                    return Err(EngineError::Expression(format!(
                        "cannot traverse into non-object: {operand}"
                    )))
                }
            };
        }
        Ok(current)
    }

    fn compare(&self, op: &str, left: &Value, right: &Value) -> Result<bool, EngineError> {
        match op {
            "=" | "==" => Ok(left == right),
            "!=" => Ok(left != right),
            ">" | ">=" | "<" | "<=" => {
                let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                    return Err(EngineError::Expression(format!(
                        "ordering comparison needs numbers, got {left} {op} {right}"
                    )));
                };
                Ok(match op {
                    ">" => l > r,
                    ">=" => l >= r,
                    "<" => l < r,
                    _ => l <= r,
                })
            }
            _ => Err(EngineError::Expression(format!("unsupported operator: {op}"))),
        }
    }
}

impl ExpressionEval for SimpleEval {
    fn evaluate(&self, expression: &str, vars: &Variables) -> Result<Value, EngineError> {
        let body = strip_feel(expression);
        if body.is_empty() {
            return Err(EngineError::Expression("empty expression".into()));
        }

        // Binary comparison, longest operators first so `>=` is not split
        // as `>` + `=`.
        for op in ["!=", ">=", "<=", "==", ">", "<", "="] {
            if let Some((left, right)) = split_operator(body, op) {
                let left = self.resolve(left, vars)?;
                let right = self.resolve(right, vars)?;
                return Ok(Value::Bool(self.compare(op, &left, &right)?));
            }
        }

        self.resolve(body, vars)
    }
}

/// Split on an operator that appears outside string quotes.
fn split_operator<'a>(body: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let mut in_string = false;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i + op.len() <= bytes.len() {
        if !body.is_char_boundary(i) {
            i += 1;
            continue;
        }
        let c = bytes[i] as char;
        if c == '"' {
            in_string = !in_string;
        }
        if !in_string && body[i..].starts_with(op) {
            // Reject when part of a longer operator (`!=` scanned before
            // `=` ensures the reverse never happens).
            let prev = i.checked_sub(1).map(|p| bytes[p] as char);
            if matches!(prev, Some('!') | Some('>') | Some('<') | Some('=')) {
                i += 1;
                continue;
            }
            return Some((&body[..i], &body[i + op.len()..]));
        }
        i += 1;
    }
    None
}

#[cfg(test)]
#[path = "expression_tests.rs"]
mod tests;
