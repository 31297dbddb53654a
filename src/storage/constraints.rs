// Constraint verification for the table write paths.
//
// Append verifies against the full input chunk; Update verifies only the
// columns present in the update set. CHECK constraints evaluate through the
// expression executor over a mock chunk that places update columns at their
// catalog positions.

use crate::catalog::{Constraint, TableCatalogEntry};
use crate::common::ColumnId;
use crate::error::{DbError, Result};
use crate::execution::{Expression, ExpressionExecutor};
use crate::types::{DataType, Value};
use crate::vector::{DataChunk, Vector};

pub struct ConstraintVerifier;

impl ConstraintVerifier {
    /// Verifies every bound constraint against a full append chunk.
    pub fn verify_append(entry: &TableCatalogEntry, chunk: &DataChunk) -> Result<()> {
        for constraint in &entry.constraints {
            match constraint {
                Constraint::NotNull(column) => {
                    Self::verify_not_null(entry, chunk.column(*column), *column)?;
                }
                Constraint::Check { expression, .. } => {
                    Self::verify_check(expression, chunk)?;
                }
                Constraint::Unique { columns } => {
                    let column = Self::single_unique_column(columns)?;
                    if !chunk.column(column).all_unique() {
                        return Err(DbError::Constraint(format!(
                            "duplicate value in column \"{}\" violates UNIQUE constraint",
                            entry.columns[column].name
                        )));
                    }
                }
                Constraint::ForeignKey => {
                    return Err(DbError::NotImplemented(
                        "FOREIGN KEY constraints are not supported".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Verifies the constraints touched by an update of `column_ids`.
    pub fn verify_update(
        entry: &TableCatalogEntry,
        updates: &DataChunk,
        column_ids: &[ColumnId],
    ) -> Result<()> {
        for constraint in &entry.constraints {
            match constraint {
                Constraint::NotNull(column) => {
                    if let Some(pos) = column_ids.iter().position(|c| c == column) {
                        Self::verify_not_null(entry, updates.column(pos), *column)?;
                    }
                }
                Constraint::Check {
                    expression,
                    columns,
                } => {
                    let present = columns
                        .iter()
                        .filter(|c| column_ids.contains(*c))
                        .count();
                    if present == 0 {
                        continue;
                    }
                    if present < columns.len() {
                        // The un-updated referenced columns would have to be
                        // fetched from the base table.
                        return Err(DbError::NotImplemented(
                            "CHECK constraint references columns missing from the update set"
                                .to_string(),
                        ));
                    }
                    let mock = build_mock_chunk(&entry.types(), column_ids, updates)?;
                    Self::verify_check(expression, &mock)?;
                }
                Constraint::Unique { columns } => {
                    let column = Self::single_unique_column(columns)?;
                    if let Some(pos) = column_ids.iter().position(|c| *c == column) {
                        if !updates.column(pos).all_unique() {
                            return Err(DbError::Constraint(format!(
                                "duplicate value in column \"{}\" violates UNIQUE constraint",
                                entry.columns[column].name
                            )));
                        }
                    }
                }
                Constraint::ForeignKey => {
                    return Err(DbError::NotImplemented(
                        "FOREIGN KEY constraints are not supported".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn verify_not_null(
        entry: &TableCatalogEntry,
        vector: &Vector,
        column: ColumnId,
    ) -> Result<()> {
        if vector.has_null() {
            return Err(DbError::Constraint(format!(
                "NOT NULL constraint violated in column \"{}\"",
                entry.columns[column].name
            )));
        }
        Ok(())
    }

    fn verify_check(expression: &Expression, chunk: &DataChunk) -> Result<()> {
        let result = ExpressionExecutor::execute_expression(expression, chunk)
            .map_err(|e| DbError::Constraint(format!("CHECK constraint evaluation failed: {}", e)))?;
        if result.iter().any(|v| matches!(v, Some(0))) {
            return Err(DbError::Constraint(
                "CHECK constraint violated".to_string(),
            ));
        }
        Ok(())
    }

    fn single_unique_column(columns: &[ColumnId]) -> Result<ColumnId> {
        match columns {
            [column] => Ok(*column),
            _ => Err(DbError::NotImplemented(
                "multi-column UNIQUE constraints are not supported".to_string(),
            )),
        }
    }
}

/// Places the update vectors at their catalog positions so expressions and
/// indexes that reference catalog indices can evaluate against an update.
/// Positions outside the update set are NULL-filled.
pub fn build_mock_chunk(
    types: &[DataType],
    column_ids: &[ColumnId],
    updates: &DataChunk,
) -> Result<DataChunk> {
    let rows = updates.len();
    let mut columns: Vec<Vector> = types
        .iter()
        .map(|t| Vector {
            data_type: *t,
            values: vec![Value::Null; rows],
        })
        .collect();
    for (pos, &column) in column_ids.iter().enumerate() {
        if column >= types.len() {
            return Err(DbError::Catalog(format!(
                "update references column {} of a {}-column table",
                column,
                types.len()
            )));
        }
        columns[column] = updates.column(pos).clone();
    }
    DataChunk::from_columns(columns)
}
