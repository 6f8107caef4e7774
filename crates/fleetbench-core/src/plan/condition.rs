//! `when` conditions on tasks.

use crate::error::ConfigError;
use crate::template::{is_identifier, unquote};
use crate::vars::{VarScope, render_value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison applied to a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    Equals(String),
    NotEquals(String),
    Defined,
    Undefined,
}

/// A condition such as `gpu_type == a100` or `probe is defined`.
///
/// Comparisons are made on the rendered value, so `iodepth == 16` holds for
/// both the number `16` and the string `"16"`. Comparing an undefined
/// variable is simply false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    pub var: String,
    pub test: Test,
}

impl Condition {
    /// Evaluates the condition against `scope`.
    pub fn evaluate(&self, scope: &VarScope) -> bool {
        let value = scope.get(&self.var);
        match &self.test {
            Test::Defined => value.is_some(),
            Test::Undefined => value.is_none(),
            Test::Equals(expected) => value.is_some_and(|v| render_value(v) == *expected),
            Test::NotEquals(expected) => value.is_some_and(|v| render_value(v) != *expected),
        }
    }
}

impl FromStr for Condition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let invalid = |reason: &str| ConfigError::InvalidCondition {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        // The variable name cannot hold '=' or '!', so the first operator is the real one.
        let comparison = ["==", "!="]
            .into_iter()
            .filter_map(|op| expr.find(op).map(|at| (at, op)))
            .min();

        let (var, test) = if let Some((at, op)) = comparison {
            let value = unquote(expr[at + op.len()..].trim()).to_string();
            let test = if op == "==" { Test::Equals(value) } else { Test::NotEquals(value) };
            (&expr[..at], test)
        } else if let Some(lhs) = expr.strip_suffix("is defined") {
            (lhs, Test::Defined)
        } else if let Some(lhs) = expr.strip_suffix("is undefined") {
            (lhs, Test::Undefined)
        } else if let Some(lhs) = expr.strip_suffix("is not defined") {
            (lhs, Test::Undefined)
        } else {
            return Err(invalid("expected '==', '!=', 'is defined' or 'is undefined'"));
        };

        let var = var.trim();
        if !is_identifier(var) {
            return Err(invalid("left-hand side must be a variable name"));
        }
        Ok(Self {
            var: var.to_string(),
            test,
        })
    }
}

impl TryFrom<String> for Condition {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.test {
            Test::Equals(v) => write!(f, "{} == '{}'", self.var, v),
            Test::NotEquals(v) => write!(f, "{} != '{}'", self.var, v),
            Test::Defined => write!(f, "{} is defined", self.var),
            Test::Undefined => write!(f, "{} is undefined", self.var),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_evaluate() {
        let scope = VarScope::new()
            .with_var("host", "gpu_type", json!("a100"))
            .with_var("host", "iodepth", json!(16));

        assert!("gpu_type == a100".parse::<Condition>().unwrap().evaluate(&scope));
        assert!("gpu_type == 'a100'".parse::<Condition>().unwrap().evaluate(&scope));
        assert!(!"gpu_type != a100".parse::<Condition>().unwrap().evaluate(&scope));
        assert!("iodepth == 16".parse::<Condition>().unwrap().evaluate(&scope));
        assert!("gpu_type is defined".parse::<Condition>().unwrap().evaluate(&scope));
        assert!("nic is undefined".parse::<Condition>().unwrap().evaluate(&scope));
        assert!("nic is not defined".parse::<Condition>().unwrap().evaluate(&scope));
    }

    #[test]
    fn test_undefined_comparisons_are_false() {
        let scope = VarScope::new();
        assert!(!"nic == eth0".parse::<Condition>().unwrap().evaluate(&scope));
        assert!(!"nic != eth0".parse::<Condition>().unwrap().evaluate(&scope));
    }

    #[test]
    fn test_invalid_conditions() {
        assert!("gpu_type".parse::<Condition>().is_err());
        assert!("1abc == x".parse::<Condition>().is_err());
        assert!("== x".parse::<Condition>().is_err());
    }

    #[test]
    fn test_display_reparses() {
        for expr in ["a == b", "a != 'b c'", "a is defined", "a is undefined"] {
            let cond: Condition = expr.parse().unwrap();
            assert_eq!(cond.to_string().parse::<Condition>().unwrap(), cond);
        }
    }

    #[test]
    fn test_values_containing_operators_reparse() {
        let values = ["a==b", "a!=b", "it's", "x is defined", " padded "];
        for value in values {
            for cond in [
                Condition {
                    var: "x".to_string(),
                    test: Test::Equals(value.to_string()),
                },
                Condition {
                    var: "x".to_string(),
                    test: Test::NotEquals(value.to_string()),
                },
            ] {
                assert_eq!(cond.to_string().parse::<Condition>().unwrap(), cond, "{}", cond);
            }
        }
        assert_eq!(
            "mode != a==b".parse::<Condition>().unwrap().test,
            Test::NotEquals("a==b".to_string())
        );
    }
}
