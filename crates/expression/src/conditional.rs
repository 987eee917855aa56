use foundation::Feature;

use crate::error::{EvalError, ParseError};
use crate::expression::{Defines, Expression};
use crate::value::Value;

/// Ordered `(condition, result)` pairs; the first true condition wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    branches: Vec<(Expression, Expression)>,
}

impl ConditionalExpression {
    pub fn new(
        conditions: &[(String, String)],
        feature: Option<&Feature>,
        defines: Option<&Defines>,
    ) -> Result<Self, ParseError> {
        let branches = conditions
            .iter()
            .map(|(condition, result)| {
                Ok((
                    Expression::new(condition, feature, defines)?,
                    Expression::new(result, feature, defines)?,
                ))
            })
            .collect::<Result<Vec<_>, ParseError>>()?;
        Ok(Self { branches })
    }

    pub fn from_pairs(branches: Vec<(Expression, Expression)>) -> Self {
        Self { branches }
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Result of the first branch whose condition is `true`, or `undefined`.
    ///
    /// Later branches are not evaluated once one matches.
    pub fn evaluate(&self, feature: &Feature) -> Result<Value, EvalError> {
        for (condition, result) in &self.branches {
            match condition.evaluate(feature)? {
                Value::Bool(true) => return result.evaluate(feature),
                Value::Bool(false) => {}
                other => return Err(EvalError::ConditionNotBoolean(other.to_string())),
            }
        }
        Ok(Value::Undefined)
    }
}
