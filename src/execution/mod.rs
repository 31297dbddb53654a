// # Bound Expressions and the Expression Executor
//
// CHECK constraints are verified against a pre-bound expression tree whose
// column references are catalog positions. The executor evaluates the tree
// over a DataChunk and produces a boolean-coded integer vector: non-zero is
// pass, zero is a violation, NULL entries are treated as pass by the
// verifier (SQL three-valued logic).

use serde::{Deserialize, Serialize};

use crate::common::ColumnId;
use crate::error::{DbError, Result};
use crate::types::Value;
use crate::vector::DataChunk;

/// Comparison and arithmetic operators supported in bound expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

/// A bound expression over catalog column positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    ColumnRef(ColumnId),
    Literal(Value),
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    IsNull(Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Convenience constructor for `left op right`.
    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Collects every column position the expression references.
    pub fn referenced_columns(&self) -> Vec<ColumnId> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    fn collect_columns(&self, out: &mut Vec<ColumnId>) {
        match self {
            Expression::ColumnRef(id) => out.push(*id),
            Expression::Literal(_) => {}
            Expression::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expression::IsNull(inner) | Expression::Not(inner) => inner.collect_columns(out),
        }
    }
}

/// Evaluates bound expressions over data chunks.
pub struct ExpressionExecutor;

impl ExpressionExecutor {
    /// Evaluates `expr` for every row of `chunk`, producing the boolean-coded
    /// integer vector consumed by constraint verification. `None` entries are
    /// SQL NULL results.
    pub fn execute_expression(
        expr: &Expression,
        chunk: &DataChunk,
    ) -> Result<Vec<Option<i64>>> {
        let mut result = Vec::with_capacity(chunk.len());
        for row in 0..chunk.len() {
            let value = Self::eval_row(expr, chunk, row)?;
            result.push(match value {
                Value::Null => None,
                Value::Boolean(b) => Some(b as i64),
                Value::Integer(v) => Some(v as i64),
                Value::BigInt(v) | Value::Timestamp(v) => Some(v),
                other => {
                    return Err(DbError::Internal(format!(
                        "expression produced non-integer result {:?}",
                        other
                    )));
                }
            });
        }
        Ok(result)
    }

    fn eval_row(expr: &Expression, chunk: &DataChunk, row: usize) -> Result<Value> {
        match expr {
            Expression::ColumnRef(id) => {
                if *id >= chunk.column_count() {
                    return Err(DbError::Internal(format!(
                        "expression references column {} of a {}-column chunk",
                        id,
                        chunk.column_count()
                    )));
                }
                Ok(chunk.value(*id, row).clone())
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Binary { left, op, right } => {
                let lhs = Self::eval_row(left, chunk, row)?;
                let rhs = Self::eval_row(right, chunk, row)?;
                Self::eval_binary(&lhs, *op, &rhs)
            }
            Expression::IsNull(inner) => {
                let value = Self::eval_row(inner, chunk, row)?;
                Ok(Value::Boolean(value.is_null()))
            }
            Expression::Not(inner) => match Self::eval_row(inner, chunk, row)? {
                Value::Null => Ok(Value::Null),
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                other => Err(DbError::Internal(format!(
                    "NOT applied to non-boolean {:?}",
                    other
                ))),
            },
        }
    }

    fn eval_binary(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value> {
        use BinaryOperator::*;

        // NULL propagation; AND/OR keep their short-circuit rules.
        if left.is_null() || right.is_null() {
            return match op {
                And if Self::is_false(left) || Self::is_false(right) => {
                    Ok(Value::Boolean(false))
                }
                Or if Self::is_true(left) || Self::is_true(right) => Ok(Value::Boolean(true)),
                _ => Ok(Value::Null),
            };
        }

        match op {
            And => Ok(Value::Boolean(Self::truthy(left)? && Self::truthy(right)?)),
            Or => Ok(Value::Boolean(Self::truthy(left)? || Self::truthy(right)?)),
            Add | Subtract | Multiply => {
                let (l, r) = (Self::numeric(left)?, Self::numeric(right)?);
                let result = match op {
                    Add => l + r,
                    Subtract => l - r,
                    _ => l * r,
                };
                Ok(Value::BigInt(result))
            }
            Equal | NotEqual | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
                let ordering = Self::compare(left, right)?;
                let pass = match op {
                    Equal => ordering == std::cmp::Ordering::Equal,
                    NotEqual => ordering != std::cmp::Ordering::Equal,
                    LessThan => ordering == std::cmp::Ordering::Less,
                    LessThanOrEqual => ordering != std::cmp::Ordering::Greater,
                    GreaterThan => ordering == std::cmp::Ordering::Greater,
                    _ => ordering != std::cmp::Ordering::Less,
                };
                Ok(Value::Boolean(pass))
            }
        }
    }

    fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
        match (left, right) {
            (Value::Varchar(a), Value::Varchar(b)) => Ok(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b).ok_or_else(|| {
                DbError::Internal("NaN comparison in expression".to_string())
            }),
            _ => {
                let (l, r) = (Self::numeric(left)?, Self::numeric(right)?);
                Ok(l.cmp(&r))
            }
        }
    }

    fn numeric(value: &Value) -> Result<i64> {
        match value {
            Value::Boolean(b) => Ok(*b as i64),
            Value::Integer(v) => Ok(*v as i64),
            Value::BigInt(v) | Value::Timestamp(v) => Ok(*v),
            other => Err(DbError::Internal(format!(
                "non-numeric operand {:?} in expression",
                other
            ))),
        }
    }

    fn truthy(value: &Value) -> Result<bool> {
        Ok(Self::numeric(value)? != 0)
    }

    fn is_false(value: &Value) -> bool {
        matches!(value, Value::Boolean(false)) || matches!(value, Value::Integer(0))
    }

    fn is_true(value: &Value) -> bool {
        matches!(value, Value::Boolean(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use crate::vector::Vector;

    fn int_chunk(values: Vec<Value>) -> DataChunk {
        DataChunk::from_columns(vec![
            Vector::with_values(DataType::Integer, values).unwrap()
        ])
        .unwrap()
    }

    #[test]
    fn test_column_greater_than_literal() {
        let expr = Expression::binary(
            Expression::ColumnRef(0),
            BinaryOperator::GreaterThan,
            Expression::Literal(Value::Integer(0)),
        );
        let chunk = int_chunk(vec![Value::Integer(5), Value::Integer(-1), Value::Null]);
        let result = ExpressionExecutor::execute_expression(&expr, &chunk).unwrap();
        assert_eq!(result, vec![Some(1), Some(0), None]);
    }

    #[test]
    fn test_null_and_false_is_false() {
        let expr = Expression::binary(
            Expression::Literal(Value::Null),
            BinaryOperator::And,
            Expression::Literal(Value::Boolean(false)),
        );
        let chunk = int_chunk(vec![Value::Integer(1)]);
        let result = ExpressionExecutor::execute_expression(&expr, &chunk).unwrap();
        assert_eq!(result, vec![Some(0)]);
    }

    #[test]
    fn test_referenced_columns_deduped() {
        let expr = Expression::binary(
            Expression::binary(
                Expression::ColumnRef(1),
                BinaryOperator::Add,
                Expression::ColumnRef(0),
            ),
            BinaryOperator::GreaterThan,
            Expression::ColumnRef(1),
        );
        assert_eq!(expr.referenced_columns(), vec![0, 1]);
    }

    #[test]
    fn test_out_of_range_column_is_internal_error() {
        let expr = Expression::ColumnRef(3);
        let chunk = int_chunk(vec![Value::Integer(1)]);
        assert!(matches!(
            ExpressionExecutor::execute_expression(&expr, &chunk),
            Err(DbError::Internal(_))
        ));
    }
}
