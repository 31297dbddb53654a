use serde::{Deserialize, Serialize};

use crate::common::ColumnId;
use crate::execution::Expression;
use crate::types::DataType;

// Column definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// A bound table-level constraint, referencing columns by catalog position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constraint {
    NotNull(ColumnId),
    Check {
        expression: Expression,
        columns: Vec<ColumnId>,
    },
    Unique {
        columns: Vec<ColumnId>,
    },
    ForeignKey,
}

impl Constraint {
    /// Builds a CHECK constraint, binding its referenced-column list from
    /// the expression itself.
    pub fn check(expression: Expression) -> Self {
        let columns = expression.referenced_columns();
        Constraint::Check {
            expression,
            columns,
        }
    }
}

// Table metadata as the storage core consumes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCatalogEntry {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
}

impl TableCatalogEntry {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Column storage types in catalog order.
    pub fn types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().position(|c| c.name == name)
    }
}
