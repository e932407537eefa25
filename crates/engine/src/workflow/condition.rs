//! Boolean condition evaluation against an execution's data bag.
//!
//! Evaluation never errors. Anything that cannot be compared (a missing
//! field, a non-numeric value under `greater_than`, `contains` on a number)
//! evaluates to `false`, so a CONDITION step falls through to its default
//! branch instead of failing the execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// A single `{field, operator, value}` check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the data bag, e.g. `order.total`
    pub field: String,

    pub operator: Operator,

    /// Operand; unused by `is_empty` / `is_not_empty`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub combinator: Combinator,

    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn evaluate(&self, data: &Value) -> bool {
        match self.combinator {
            Combinator::And => self.conditions.iter().all(|c| c.evaluate(data)),
            Combinator::Or => self.conditions.iter().any(|c| c.evaluate(data)),
        }
    }
}

impl Condition {
    pub fn evaluate(&self, data: &Value) -> bool {
        let actual = lookup(data, &self.field).filter(|v| !v.is_null());

        match self.operator {
            Operator::IsEmpty => actual.map_or(true, is_empty),
            Operator::IsNotEmpty => actual.map_or(false, |v| !is_empty(v)),
            _ => {
                let Some(actual) = actual else {
                    return false;
                };
                let operand = self.value.as_ref().unwrap_or(&Value::Null);
                compare(self.operator, actual, operand)
            }
        }
    }
}

fn compare(operator: Operator, actual: &Value, operand: &Value) -> bool {
    match operator {
        Operator::Equals => loose_eq(actual, operand),
        Operator::NotEquals => !loose_eq(actual, operand),
        Operator::Contains => contains(actual, operand).unwrap_or(false),
        Operator::NotContains => contains(actual, operand).map_or(false, |found| !found),
        Operator::GreaterThan => numeric_cmp(actual, operand, |a, b| a > b),
        Operator::LessThan => numeric_cmp(actual, operand, |a, b| a < b),
        Operator::IsEmpty => is_empty(actual),
        Operator::IsNotEmpty => !is_empty(actual),
    }
}

/// Resolve a dotted path; numeric segments index into arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Equality that tolerates authored operands typed as strings (`"50"` vs `50`).
pub fn loose_eq(actual: &Value, operand: &Value) -> bool {
    if actual == operand {
        return true;
    }
    match (actual, operand) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_number(actual), as_number(operand)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

/// `None` when the field is neither a string nor an array.
fn contains(actual: &Value, operand: &Value) -> Option<bool> {
    match actual {
        Value::String(haystack) => {
            let needle = match operand {
                Value::String(s) => s.clone(),
                Value::Null => return Some(false),
                other => other.to_string(),
            };
            Some(haystack.contains(&needle))
        }
        Value::Array(items) => Some(items.iter().any(|item| loose_eq(item, operand))),
        _ => None,
    }
}

fn numeric_cmp(actual: &Value, operand: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(operand)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}
