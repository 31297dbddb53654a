use std::collections::HashMap;

use parking_lot::RwLock;

use crate::common::{ColumnId, RowId};
use crate::error::Result;
use crate::index::Index;
use crate::vector::DataChunk;

/// Single-column unique hash index.
///
/// Keys are the canonical byte encoding of the column value, so equality is
/// content-based for strings and bit-based for numerics. NULL keys are not
/// indexed, matching SQL UNIQUE semantics.
pub struct UniqueIndex {
    column: ColumnId,
    entries: RwLock<HashMap<Vec<u8>, RowId>>,
}

impl UniqueIndex {
    pub fn new(column: ColumnId) -> Self {
        Self {
            column,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn column(&self) -> ColumnId {
        self.column
    }

    pub fn contains_row(&self, row_id: RowId) -> bool {
        self.entries.read().values().any(|&r| r == row_id)
    }
}

impl Index for UniqueIndex {
    fn append(&self, chunk: &DataChunk, row_ids: &[RowId]) -> Result<bool> {
        debug_assert_eq!(chunk.len(), row_ids.len());
        let mut entries = self.entries.write();

        // Check the whole batch before inserting anything, so a duplicate
        // leaves the index untouched.
        let mut keys = Vec::with_capacity(row_ids.len());
        for i in 0..chunk.len() {
            let key = chunk.value(self.column, i).index_key();
            if let Some(key) = &key {
                if entries.contains_key(key) || keys.iter().any(|k: &Option<Vec<u8>>| {
                    k.as_ref() == Some(key)
                }) {
                    return Ok(false);
                }
            }
            keys.push(key);
        }

        for (key, &row_id) in keys.into_iter().zip(row_ids) {
            if let Some(key) = key {
                entries.insert(key, row_id);
            }
        }
        Ok(true)
    }

    fn delete(&self, chunk: &DataChunk, row_ids: &[RowId]) {
        debug_assert_eq!(chunk.len(), row_ids.len());
        let mut entries = self.entries.write();
        for (i, &row_id) in row_ids.iter().enumerate() {
            if let Some(key) = chunk.value(self.column, i).index_key() {
                if entries.get(&key) == Some(&row_id) {
                    entries.remove(&key);
                }
            }
        }
    }

    fn index_is_updated(&self, column_ids: &[ColumnId]) -> bool {
        column_ids.contains(&self.column)
    }

    fn cardinality(&self) -> usize {
        self.entries.read().len()
    }
}
