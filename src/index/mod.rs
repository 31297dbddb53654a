// Index Module
//
// The storage core treats every secondary index as a capability with three
// operations: append rows, delete rows, and answer whether a set of updated
// columns touches the indexed key. Index internals stay behind the trait;
// the one concrete implementation here is the single-column unique hash
// index used for PRIMARY KEY / UNIQUE enforcement.

pub mod unique;

pub use unique::UniqueIndex;

use crate::common::{ColumnId, RowId};
use crate::error::Result;
use crate::vector::DataChunk;

/// Secondary-index capability consumed by the table core.
///
/// `append` returns `Ok(false)` when a key already exists, which the table
/// turns into a constraint violation after rolling back the indexes it
/// already touched.
pub trait Index: Send + Sync {
    /// Inserts `row_ids[i]` under the key taken from logical row `i` of
    /// `chunk`. Key columns are read at their catalog positions.
    fn append(&self, chunk: &DataChunk, row_ids: &[RowId]) -> Result<bool>;

    /// Removes the entries for `row_ids`, keyed by the matching rows of
    /// `chunk`.
    fn delete(&self, chunk: &DataChunk, row_ids: &[RowId]);

    /// Whether updating `column_ids` can change this index's keys.
    fn index_is_updated(&self, column_ids: &[ColumnId]) -> bool;

    /// Number of indexed entries.
    fn cardinality(&self) -> usize;
}
