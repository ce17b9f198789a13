//! Filter and update expressions.
//!
//! Filters travel inside `IndexQueryContext::filter` and update conditions as
//! serde-JSON bytes. They are evaluated with SQL-style three-valued logic:
//! comparisons against `Null` yield `Null`, and only a `Bool(true)` result
//! keeps a row. Arithmetic yields `Null` on a null operand, overflow or
//! division by zero.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::types::Value;

pub const PROP_VID: &str = "_vid";
pub const PROP_SRC: &str = "_src";
pub const PROP_DST: &str = "_dst";
pub const PROP_RANK: &str = "_ranking";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Constant {
        value: Value,
    },
    Property {
        name: String,
    },
    Relational {
        op: RelOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logical {
        op: LogicOp,
        operands: Vec<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
}

impl Expression {
    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant {
            value: value.into(),
        }
    }

    pub fn prop(name: impl Into<String>) -> Self {
        Expression::Property { name: name.into() }
    }

    pub fn rel(op: RelOp, left: Expression, right: Expression) -> Self {
        Expression::Relational {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn arith(op: ArithOp, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(operands: Vec<Expression>) -> Self {
        Expression::Logical {
            op: LogicOp::And,
            operands,
        }
    }

    pub fn or(operands: Vec<Expression>) -> Self {
        Expression::Logical {
            op: LogicOp::Or,
            operands,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a plain tree of owned values cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ErrorCode> {
        serde_json::from_slice(bytes).map_err(|_| ErrorCode::InvalidFilter)
    }

    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
        match self {
            Expression::Constant { value } => value.clone(),
            Expression::Property { name } => lookup(name).unwrap_or(Value::Null),
            Expression::Relational { op, left, right } => {
                let left = left.eval(lookup);
                let right = right.eval(lookup);
                if left.is_null() || right.is_null() {
                    return Value::Null;
                }
                let ordering = compare(&left, &right);
                let result = match (op, ordering) {
                    (RelOp::Eq, ordering) => ordering == Some(Ordering::Equal),
                    (RelOp::Ne, ordering) => ordering != Some(Ordering::Equal),
                    (_, None) => return Value::Null,
                    (RelOp::Lt, Some(ordering)) => ordering == Ordering::Less,
                    (RelOp::Le, Some(ordering)) => ordering != Ordering::Greater,
                    (RelOp::Gt, Some(ordering)) => ordering == Ordering::Greater,
                    (RelOp::Ge, Some(ordering)) => ordering != Ordering::Less,
                };
                Value::Bool(result)
            }
            Expression::Arithmetic { op, left, right } => {
                arithmetic(*op, &left.eval(lookup), &right.eval(lookup))
            }
            Expression::Logical { op, operands } => {
                let mut saw_null = false;
                for operand in operands {
                    match (op, operand.eval(lookup)) {
                        (LogicOp::And, Value::Bool(false)) => return Value::Bool(false),
                        (LogicOp::Or, Value::Bool(true)) => return Value::Bool(true),
                        (_, Value::Bool(_)) => {}
                        _ => saw_null = true,
                    }
                }
                if saw_null {
                    Value::Null
                } else {
                    Value::Bool(*op == LogicOp::And)
                }
            }
            Expression::Not { operand } => match operand.eval(lookup) {
                Value::Bool(v) => Value::Bool(!v),
                _ => Value::Null,
            },
        }
    }

    /// Whether the row described by `lookup` passes this filter.
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
        matches!(self.eval(lookup), Value::Bool(true))
    }
}

fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => a.checked_div(*b),
                ArithOp::Mod => a.checked_rem(*b),
            };
            result.map(Value::Int).unwrap_or(Value::Null)
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (as_f64(left), as_f64(right));
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div if b == 0.0 => return Value::Null,
                ArithOp::Div => a / b,
                ArithOp::Mod if b == 0.0 => return Value::Null,
                ArithOp::Mod => a % b,
            };
            Value::Float(result)
        }
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => Value::Str(format!("{a}{b}")),
        _ => Value::Null,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        _ => f64::NAN,
    }
}

/// Ordering between two non-null values; `None` when they are not comparable.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
