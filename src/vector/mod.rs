// # Vectors and DataChunks
//
// A `Vector` is one column's worth of values for a batch of rows; a
// `DataChunk` is an ordered set of equal-length vectors, optionally filtered
// through a selection vector. All table entry points (append, update, scan
// results) speak DataChunk.

use serde::{Deserialize, Serialize};

use crate::common::RowId;
use crate::error::{DbError, Result};
use crate::types::{DataType, Value};

/// One column's values for a batch of rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vector {
    pub data_type: DataType,
    pub values: Vec<Value>,
}

impl Vector {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            values: Vec::new(),
        }
    }

    /// Builds a vector after checking every value against the column type.
    pub fn with_values(data_type: DataType, values: Vec<Value>) -> Result<Self> {
        for value in &values {
            if !value.matches_type(data_type) {
                return Err(DbError::Catalog(format!(
                    "value {:?} does not match column type {:?}",
                    value, data_type
                )));
            }
        }
        Ok(Self { data_type, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if !value.matches_type(self.data_type) {
            return Err(DbError::Catalog(format!(
                "value {:?} does not match column type {:?}",
                value, self.data_type
            )));
        }
        self.values.push(value);
        Ok(())
    }

    /// Whether any entry is NULL.
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }

    /// Whether all non-NULL entries are distinct. NULLs never collide,
    /// matching SQL UNIQUE semantics.
    pub fn all_unique(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        for value in &self.values {
            if let Some(key) = value.index_key() {
                if !seen.insert(key) {
                    return false;
                }
            }
        }
        true
    }
}

/// An ordered batch of column vectors with a shared row count.
#[derive(Debug, Clone)]
pub struct DataChunk {
    columns: Vec<Vector>,
    selection: Option<Vec<usize>>,
}

impl DataChunk {
    /// An empty chunk with one vector per type.
    pub fn new(types: &[DataType]) -> Self {
        Self {
            columns: types.iter().map(|t| Vector::new(*t)).collect(),
            selection: None,
        }
    }

    /// Builds a chunk from pre-filled columns, requiring uniform length.
    pub fn from_columns(columns: Vec<Vector>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let len = first.len();
            if columns.iter().any(|c| c.len() != len) {
                return Err(DbError::Internal(
                    "data chunk columns differ in length".to_string(),
                ));
            }
        }
        Ok(Self {
            columns,
            selection: None,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Vector {
        &self.columns[index]
    }

    pub fn column_mut(&mut self, index: usize) -> &mut Vector {
        &mut self.columns[index]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Number of logical rows, after selection.
    pub fn len(&self) -> usize {
        match &self.selection {
            Some(sel) => sel.len(),
            None => self.columns.first().map_or(0, Vector::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_selection(&mut self, selection: Vec<usize>) {
        self.selection = Some(selection);
    }

    pub fn selection(&self) -> Option<&[usize]> {
        self.selection.as_deref()
    }

    /// Reads the logical row `row` of column `col`, resolving selection.
    pub fn value(&self, col: usize, row: usize) -> &Value {
        let physical = match &self.selection {
            Some(sel) => sel[row],
            None => row,
        };
        &self.columns[col].values[physical]
    }

    /// Appends one row of values, one per column.
    pub fn append_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DbError::Internal(format!(
                "row width {} does not match chunk width {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value.clone())?;
        }
        Ok(())
    }

    /// Materializes the selection vector, yielding a dense chunk.
    pub fn flatten(&self) -> Result<DataChunk> {
        let Some(sel) = &self.selection else {
            return Ok(self.clone());
        };
        let mut columns = Vec::with_capacity(self.columns.len());
        for source in &self.columns {
            let mut vector = Vector::new(source.data_type);
            for &idx in sel {
                let value = source.values.get(idx).ok_or_else(|| {
                    DbError::Internal(format!(
                        "selection index {} out of bounds for vector of {}",
                        idx,
                        source.len()
                    ))
                })?;
                vector.push(value.clone())?;
            }
            columns.push(vector);
        }
        DataChunk::from_columns(columns)
    }

    /// Checks that the chunk matches the table's column types and that the
    /// selection vector, if any, stays in bounds.
    pub fn verify_shape(&self, types: &[DataType]) -> Result<()> {
        if self.columns.len() != types.len() {
            return Err(DbError::Catalog(format!(
                "table has {} columns but {} were supplied",
                types.len(),
                self.columns.len()
            )));
        }
        for (column, expected) in self.columns.iter().zip(types) {
            if column.data_type != *expected {
                return Err(DbError::Catalog(format!(
                    "column type mismatch: expected {:?}, got {:?}",
                    expected, column.data_type
                )));
            }
        }
        if let Some(sel) = &self.selection {
            let physical = self.columns.first().map_or(0, Vector::len);
            if sel.iter().any(|&i| i >= physical) {
                return Err(DbError::Internal(
                    "selection vector references rows outside the chunk".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Generates the dense row-id vector `[start, start + count)`.
pub fn generate_row_sequence(start: RowId, count: usize) -> Vec<RowId> {
    (0..count as u64).map(|i| start + i).collect()
}

/// Sorts a row-id vector so ids sharing a chunk group together.
pub fn sort_row_ids(row_ids: &mut [RowId]) {
    row_ids.sort_unstable();
}
