//! Formula evaluator
//!
//! Walks an AST to produce a [`Value`]. Evaluation is total: missing data,
//! null operands, division by zero, or type mismatches yield `Value::Null`
//! (or a false condition) instead of an error, because incomplete submissions
//! are the normal case in a reporting context, not an exceptional one.

use super::parser::{BinOp, Expr, Function};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Value type produced by evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A numeric value
    Number(f64),
    /// A text value
    Text(String),
    /// A boolean value
    Bool(bool),
    /// An array of raw records (e.g. a room list)
    Array(Vec<JsonValue>),
    /// Unknown / missing
    Null,
}

impl Value {
    /// Try to convert to f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Truthiness for conditions: false on anything that is not a true
    /// boolean or a non-zero number. A failed condition is "not met",
    /// never an error.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a raw sample field into a value
    pub fn from_json(raw: &JsonValue) -> Value {
        match raw {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(items) => Value::Array(items.clone()),
            JsonValue::Object(_) => Value::Null,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Array(items) => JsonValue::Array(items.clone()),
            Value::Null => JsonValue::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Array(items) => write!(f, "[{} items]", items.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

/// Variable bindings for one evaluation (element code -> resolved value)
pub type Bindings = HashMap<String, Value>;

/// Evaluate an expression against resolved variable bindings.
/// Unbound variables evaluate to null.
pub fn evaluate(expr: &Expr, vars: &Bindings) -> Value {
    match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Null => Value::Null,

        Expr::Var(code) => vars.get(code).cloned().unwrap_or(Value::Null),

        Expr::FunctionCall { func, args } => evaluate_function(*func, args, vars),

        Expr::BinaryOp { op, left, right } => evaluate_binary_op(*op, left, right, vars),

        Expr::Neg(operand) => match evaluate(operand, vars).as_number() {
            Some(n) => Value::Number(-n),
            None => Value::Null,
        },
    }
}

/// Evaluate a binary operation
fn evaluate_binary_op(op: BinOp, left: &Expr, right: &Expr, vars: &Bindings) -> Value {
    // Logical connectives short-circuit on the left operand
    match op {
        BinOp::And => {
            if !evaluate(left, vars).is_truthy() {
                return Value::Bool(false);
            }
            return Value::Bool(evaluate(right, vars).is_truthy());
        }
        BinOp::Or => {
            if evaluate(left, vars).is_truthy() {
                return Value::Bool(true);
            }
            return Value::Bool(evaluate(right, vars).is_truthy());
        }
        _ => {}
    }

    let left_val = evaluate(left, vars);
    let right_val = evaluate(right, vars);

    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (Some(l), Some(r)) = (left_val.as_number(), right_val.as_number()) else {
                return Value::Null;
            };
            let result = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Mod => l % r,
                _ => unreachable!(),
            };
            // Division by zero and overflow fall out here as null
            if result.is_finite() {
                Value::Number(result)
            } else {
                Value::Null
            }
        }

        BinOp::Eq => Value::Bool(values_equal(&left_val, &right_val)),
        BinOp::Ne => Value::Bool(!values_equal(&left_val, &right_val)),

        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            // Null or non-numeric operands: condition not met
            let (Some(l), Some(r)) = (left_val.as_number(), right_val.as_number()) else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinOp::Lt => l < r,
                BinOp::Le => l <= r,
                BinOp::Gt => l > r,
                BinOp::Ge => l >= r,
                _ => unreachable!(),
            })
        }

        BinOp::And | BinOp::Or => unreachable!(),
    }
}

/// Strict equality: no cross-type coercion, null equals only null
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => (l - r).abs() < 1e-10,
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

/// Evaluate a built-in function call
fn evaluate_function(func: Function, args: &[Expr], vars: &Bindings) -> Value {
    match func {
        Function::Ceil => match evaluate(&args[0], vars).as_number() {
            Some(n) => Value::Number(n.ceil()),
            None => Value::Null,
        },

        Function::Floor => match evaluate(&args[0], vars).as_number() {
            Some(n) => Value::Number(n.floor()),
            None => Value::Null,
        },

        // LEN of anything that is not an array is 0, not null
        Function::Len => match evaluate(&args[0], vars) {
            Value::Array(items) => Value::Number(items.len() as f64),
            _ => Value::Number(0.0),
        },

        Function::Year => match evaluate(&args[0], vars) {
            Value::Text(s) => leading_year(&s).map(Value::Number).unwrap_or(Value::Null),
            _ => Value::Null,
        },

        Function::CountIf => evaluate_count_if(args, vars),

        Function::SumArray => evaluate_sum_array(args, vars),

        Function::If => {
            if evaluate(&args[0], vars).is_truthy() {
                evaluate(&args[1], vars)
            } else {
                evaluate(&args[2], vars)
            }
        }
    }
}

/// Extract a leading 4-digit year from "YYYY" or "YYYY-MM-DD"
fn leading_year(s: &str) -> Option<f64> {
    let digits: String = s.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse::<f64>().ok()
    } else {
        None
    }
}

/// COUNT_IF(array, 'field', 'operator', threshold)
///
/// Unusable inputs (missing array, unknown operator, non-numeric threshold)
/// count zero elements rather than failing.
fn evaluate_count_if(args: &[Expr], vars: &Bindings) -> Value {
    let Value::Array(items) = evaluate(&args[0], vars) else {
        return Value::Number(0.0);
    };
    let Value::Text(field) = evaluate(&args[1], vars) else {
        return Value::Number(0.0);
    };
    let Value::Text(operator) = evaluate(&args[2], vars) else {
        return Value::Number(0.0);
    };
    let Some(threshold) = evaluate(&args[3], vars).as_number() else {
        return Value::Number(0.0);
    };

    let compare: fn(f64, f64) -> bool = match operator.as_str() {
        ">=" => |a, b| a >= b,
        ">" => |a, b| a > b,
        "<=" => |a, b| a <= b,
        "<" => |a, b| a < b,
        "==" => |a, b| a == b,
        "!=" => |a, b| a != b,
        _ => return Value::Number(0.0),
    };

    let count = items
        .iter()
        .filter_map(|item| record_field_number(item, &field))
        .filter(|value| compare(*value, threshold))
        .count();

    Value::Number(count as f64)
}

/// SUM_ARRAY(array, 'field') - non-numeric field values coerce to 0
fn evaluate_sum_array(args: &[Expr], vars: &Bindings) -> Value {
    let Value::Array(items) = evaluate(&args[0], vars) else {
        return Value::Number(0.0);
    };
    let Value::Text(field) = evaluate(&args[1], vars) else {
        return Value::Number(0.0);
    };

    let sum: f64 = items
        .iter()
        .map(|item| record_field_number(item, &field).unwrap_or(0.0))
        .sum();

    Value::Number(sum)
}

/// Numeric field of a nested record, accepting numeric strings
fn record_field_number(item: &JsonValue, field: &str) -> Option<f64> {
    match item.get(field)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_formula;
    use serde_json::json;

    fn eval(formula: &str, vars: &Bindings) -> Value {
        evaluate(&parse_formula(formula).unwrap(), vars)
    }

    fn bind(pairs: &[(&str, Value)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        let vars = Bindings::new();
        assert_eq!(eval("2 + 3 * 4", &vars), Value::Number(14.0));
        assert_eq!(eval("(2 + 3) * 4", &vars), Value::Number(20.0));
        assert_eq!(eval("10 % 3", &vars), Value::Number(1.0));
        assert_eq!(eval("-5 + 2", &vars), Value::Number(-3.0));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let vars = Bindings::new();
        assert_eq!(eval("1 / 0", &vars), Value::Null);
        assert_eq!(eval("1 % 0", &vars), Value::Null);
    }

    #[test]
    fn test_null_propagates_through_arithmetic() {
        let vars = bind(&[("E047", Value::Null)]);
        assert_eq!(eval("E047 / 12", &vars), Value::Null);
        assert_eq!(eval("E047 + 1", &vars), Value::Null);
        assert_eq!(eval("-E047", &vars), Value::Null);
    }

    #[test]
    fn test_unbound_variable_is_null() {
        let vars = Bindings::new();
        assert_eq!(eval("E999 * 2", &vars), Value::Null);
    }

    #[test]
    fn test_ceil() {
        let vars = Bindings::new();
        assert_eq!(eval("CEIL(2.1)", &vars), Value::Number(3.0));
        assert_eq!(eval("CEIL(2.9)", &vars), Value::Number(3.0));
        assert_eq!(eval("CEIL(2.0)", &vars), Value::Number(2.0));
        assert_eq!(eval("CEIL(-2.1)", &vars), Value::Number(-2.0));
        assert_eq!(eval("CEIL(null)", &vars), Value::Null);
    }

    #[test]
    fn test_floor() {
        let vars = Bindings::new();
        assert_eq!(eval("FLOOR(2.9)", &vars), Value::Number(2.0));
        assert_eq!(eval("FLOOR(-2.1)", &vars), Value::Number(-3.0));
        assert_eq!(eval("FLOOR(null)", &vars), Value::Null);
    }

    #[test]
    fn test_ceil_of_expression() {
        let vars = bind(&[("E047", Value::Number(25.0))]);
        assert_eq!(eval("CEIL(E047 / 12)", &vars), Value::Number(3.0));
    }

    #[test]
    fn test_ceil_null_upstream() {
        let vars = bind(&[("E047", Value::Null)]);
        assert_eq!(eval("CEIL(E047 / 12)", &vars), Value::Null);
    }

    #[test]
    fn test_len() {
        let rooms = Value::Array(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
        let vars = bind(&[
            ("E065", rooms),
            ("E066", Value::Null),
            ("E067", Value::Text("string".to_string())),
        ]);
        assert_eq!(eval("LEN(E065)", &vars), Value::Number(3.0));
        assert_eq!(eval("LEN(E066)", &vars), Value::Number(0.0));
        assert_eq!(eval("LEN(E067)", &vars), Value::Number(0.0));
    }

    #[test]
    fn test_year() {
        let vars = bind(&[
            ("E091", Value::Text("2016-09-01".to_string())),
            ("E092", Value::Text("invalid".to_string())),
            ("E093", Value::Null),
            ("E094", Value::Text("1998".to_string())),
        ]);
        assert_eq!(eval("YEAR(E091)", &vars), Value::Number(2016.0));
        assert_eq!(eval("YEAR(E092)", &vars), Value::Null);
        assert_eq!(eval("YEAR(E093)", &vars), Value::Null);
        assert_eq!(eval("YEAR(E094)", &vars), Value::Number(1998.0));
    }

    #[test]
    fn test_year_in_condition() {
        let vars = bind(&[("E091", Value::Text("2010-09-01".to_string()))]);
        assert_eq!(
            eval("IF(YEAR(E091) <= 2016, 73, 96)", &vars),
            Value::Number(73.0)
        );
    }

    #[test]
    fn test_year_null_condition_not_met() {
        // Unknown year cannot satisfy the comparison, so the else branch wins
        let vars = bind(&[("E091", Value::Null)]);
        assert_eq!(
            eval("IF(YEAR(E091) <= 2016, 73, 96)", &vars),
            Value::Number(96.0)
        );
    }

    #[test]
    fn test_count_if() {
        let rooms = Value::Array(vec![json!({"a": 100}), json!({"a": 80}), json!({"a": 96})]);
        let vars = bind(&[("E065", rooms), ("E066", Value::Null)]);
        assert_eq!(
            eval("COUNT_IF(E065, 'a', '>=', 96)", &vars),
            Value::Number(2.0)
        );
        assert_eq!(
            eval("COUNT_IF(E066, 'a', '>=', 96)", &vars),
            Value::Number(0.0)
        );
    }

    #[test]
    fn test_count_if_empty_array() {
        let vars = bind(&[("E065", Value::Array(vec![]))]);
        assert_eq!(
            eval("COUNT_IF(E065, 'a', '>=', 96)", &vars),
            Value::Number(0.0)
        );
    }

    #[test]
    fn test_count_if_skips_null_and_non_numeric_fields() {
        let rooms = Value::Array(vec![
            json!({"a": 100}),
            json!({"a": null}),
            json!({"b": 200}),
            json!({"a": "not a number"}),
            json!({"a": "98"}),
        ]);
        let vars = bind(&[("E065", rooms)]);
        assert_eq!(
            eval("COUNT_IF(E065, 'a', '>=', 96)", &vars),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_count_if_threshold_from_variable() {
        let rooms = Value::Array(vec![json!({"area": 100}), json!({"area": 80})]);
        let vars = bind(&[("E065", rooms), ("D063", Value::Number(90.0))]);
        assert_eq!(
            eval("COUNT_IF(E065, 'area', '>=', D063)", &vars),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_count_if_unknown_operator() {
        let rooms = Value::Array(vec![json!({"a": 100})]);
        let vars = bind(&[("E065", rooms)]);
        assert_eq!(
            eval("COUNT_IF(E065, 'a', '~', 96)", &vars),
            Value::Number(0.0)
        );
    }

    #[test]
    fn test_count_if_null_threshold() {
        let rooms = Value::Array(vec![json!({"a": 100})]);
        let vars = bind(&[("E065", rooms), ("D063", Value::Null)]);
        assert_eq!(
            eval("COUNT_IF(E065, 'a', '>=', D063)", &vars),
            Value::Number(0.0)
        );
    }

    #[test]
    fn test_sum_array() {
        let rooms = Value::Array(vec![
            json!({"area": 100}),
            json!({"area": 98}),
            json!({"area": "bad"}),
        ]);
        let vars = bind(&[("E065", rooms), ("E066", Value::Null)]);
        assert_eq!(
            eval("SUM_ARRAY(E065, 'area')", &vars),
            Value::Number(198.0)
        );
        assert_eq!(eval("SUM_ARRAY(E066, 'area')", &vars), Value::Number(0.0));
    }

    #[test]
    fn test_if_branches() {
        let yes = bind(&[("E104", Value::Text("yes".to_string()))]);
        let no = bind(&[("E104", Value::Text("no".to_string()))]);
        assert_eq!(eval("IF(E104 == 'yes', 54, 96)", &yes), Value::Number(54.0));
        assert_eq!(eval("IF(E104 == 'yes', 54, 96)", &no), Value::Number(96.0));
    }

    #[test]
    fn test_if_nested() {
        let vars = bind(&[
            ("E104", Value::Text("yes".to_string())),
            ("E047", Value::Number(24.0)),
        ]);
        assert_eq!(
            eval("IF(E104 == 'yes', IF(E047 > 0, 54, 61), 96)", &vars),
            Value::Number(54.0)
        );
    }

    #[test]
    fn test_if_null_condition_takes_else() {
        let vars = bind(&[("E104", Value::Null)]);
        assert_eq!(eval("IF(E104 == 'yes', 54, 96)", &vars), Value::Number(96.0));
    }

    #[test]
    fn test_logical_and_or() {
        let vars = bind(&[("D069", Value::Bool(true)), ("D070", Value::Bool(true))]);
        assert_eq!(eval("D069 AND D070", &vars), Value::Bool(true));

        let vars = bind(&[("D069", Value::Bool(true)), ("D070", Value::Bool(false))]);
        assert_eq!(eval("D069 AND D070", &vars), Value::Bool(false));
        assert_eq!(eval("D069 OR D070", &vars), Value::Bool(true));
    }

    #[test]
    fn test_or_short_circuits() {
        // E047 == 0 already holds; the null right side must not matter
        let vars = bind(&[
            ("E047", Value::Number(0.0)),
            ("D067", Value::Number(1.0)),
            ("D061", Value::Number(2.0)),
        ]);
        assert_eq!(eval("E047 == 0 OR D067 >= D061", &vars), Value::Bool(true));

        let vars = bind(&[("E047", Value::Number(0.0)), ("D067", Value::Null)]);
        assert_eq!(eval("E047 == 0 OR D067 >= D061", &vars), Value::Bool(true));
    }

    #[test]
    fn test_null_logical_operand_is_false() {
        let vars = bind(&[("D069", Value::Null), ("D070", Value::Bool(true))]);
        assert_eq!(eval("D069 AND D070", &vars), Value::Bool(false));
        assert_eq!(eval("D069 OR D070", &vars), Value::Bool(true));
    }

    #[test]
    fn test_equality_is_strict() {
        let vars = bind(&[("E104", Value::Text("yes".to_string()))]);
        assert_eq!(eval("E104 == 'yes'", &vars), Value::Bool(true));
        assert_eq!(eval("E104 == 'Yes'", &vars), Value::Bool(false));
        assert_eq!(eval("E104 != 'no'", &vars), Value::Bool(true));

        let vars = bind(&[("E001", Value::Null)]);
        assert_eq!(eval("E001 == null", &vars), Value::Bool(true));
        assert_eq!(eval("E001 == 0", &vars), Value::Bool(false));
    }

    #[test]
    fn test_comparison_with_null_is_false() {
        let vars = bind(&[("E047", Value::Null)]);
        assert_eq!(eval("E047 > 0", &vars), Value::Bool(false));
        assert_eq!(eval("E047 <= 0", &vars), Value::Bool(false));
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from_json(&json!(3.5)), Value::Number(3.5));
        assert_eq!(Value::from_json(&json!("yes")), Value::Text("yes".into()));
        assert_eq!(Value::from_json(&json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(
            Value::from_json(&json!([{"a": 1}])),
            Value::Array(vec![json!({"a": 1})])
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(2.0).to_string(), "2");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
