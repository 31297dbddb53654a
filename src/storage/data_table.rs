// # DataTable
//
// Top-level coordinator for one table: append, delete, update, snapshot
// scans and point fetches. Owns the per-column segment trees, the row-wise
// tree of version chunks, the secondary-index list and per-column
// statistics.
//
// Locking: appends serialize on the row tree's node lock (the append
// latch) and touch chunks under their exclusive locks; deletes and updates
// lock only the target chunk; readers take chunk locks shared. Statistics
// are written under those same locks and read without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::catalog::TableCatalogEntry;
use crate::common::{ColumnId, RowId, StringHandle, STORAGE_CHUNK_SIZE};
use crate::error::{DbError, Result};
use crate::index::Index;
use crate::storage::constraints::{build_mock_chunk, ConstraintVerifier};
use crate::storage::scan::{IndexScanState, TableScanState};
use crate::storage::segment::ColumnSegment;
use crate::storage::segment_tree::SegmentTree;
use crate::storage::statistics::ColumnStatistics;
use crate::storage::string_heap::StringHeap;
use crate::storage::version_chunk::{ColumnPointer, VersionChunk, VersionOp};
use crate::transaction::Transaction;
use crate::types::{self, DataType, Value};
use crate::vector::{generate_row_sequence, sort_row_ids, DataChunk};

/// Column storage shared between the table and its version chunks: the
/// chunks keep a back-reference so commit/rollback and chunk scans can
/// reach the base segments without going through the table.
pub struct TableData {
    pub types: Vec<DataType>,
    pub column_trees: Vec<SegmentTree<ColumnSegment>>,
    column_offsets: Vec<usize>,
    row_width: usize,
}

impl TableData {
    fn new(types: Vec<DataType>) -> Self {
        let mut column_offsets = Vec::with_capacity(types.len());
        let mut at = 0;
        for data_type in &types {
            column_offsets.push(at);
            at += data_type.width();
        }
        Self {
            column_trees: types.iter().map(|_| SegmentTree::new()).collect(),
            types,
            column_offsets,
            row_width: at,
        }
    }

    /// Byte width of one serialized row across all columns.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Byte offset of `column` within a serialized row.
    pub fn column_offset(&self, column: ColumnId) -> usize {
        self.column_offsets[column]
    }
}

pub struct DataTable {
    info: TableCatalogEntry,
    data: Arc<TableData>,
    row_tree: SegmentTree<VersionChunk>,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
    statistics: Vec<Mutex<ColumnStatistics>>,
    next_string_handle: AtomicU64,
}

impl DataTable {
    pub fn new(info: TableCatalogEntry) -> Self {
        let data = Arc::new(TableData::new(info.types()));
        let statistics = (0..info.columns.len())
            .map(|_| Mutex::new(ColumnStatistics::new()))
            .collect();
        let table = Self {
            info,
            data,
            row_tree: SegmentTree::new(),
            indexes: RwLock::new(Vec::new()),
            statistics,
            next_string_handle: AtomicU64::new(1),
        };
        // The table always has a tail chunk for appends to land in.
        let mut nodes = table.row_tree.node_lock();
        table.append_version_chunk_locked(&mut nodes, 0);
        drop(nodes);
        table
    }

    pub fn info(&self) -> &TableCatalogEntry {
        &self.info
    }

    pub fn types(&self) -> &[DataType] {
        &self.data.types
    }

    /// Total number of row slots ever allocated, live or deleted.
    pub fn cardinality(&self) -> u64 {
        match self.row_tree.tail() {
            Some(tail) => tail.start() + tail.count() as u64,
            None => 0,
        }
    }

    /// Advisory per-column summary; may lag concurrent writers.
    pub fn statistics(&self, column: ColumnId) -> ColumnStatistics {
        self.statistics[column].lock().clone()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.read().len()
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Appends a chunk of rows, assigning them the next dense row ids.
    /// Constraints and indexes are checked before any base mutation, so a
    /// failure leaves the table byte-identical.
    pub fn append(&self, txn: &mut Transaction, chunk: &DataChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        chunk.verify_shape(&self.data.types)?;
        let chunk = chunk.flatten()?;

        ConstraintVerifier::verify_append(&self.info, &chunk)?;

        // Append latch: the node lock serializes row-id allocation, the
        // chunk locks are taken per touched chunk inside the copy loop.
        let mut nodes = self.row_tree.node_lock();
        let tail = match nodes.last() {
            Some(tail) => Arc::clone(tail),
            None => return Err(DbError::Internal("table has no tail chunk".to_string())),
        };
        let row_start = tail.start() + tail.count() as u64;

        // Indexes fail before any base mutation.
        self.append_to_indexes(&chunk, row_start)?;

        for column in 0..self.data.types.len() {
            self.statistics[column].lock().update_vector(chunk.column(column));
        }

        let total = chunk.len();
        let mut offset = 0;
        let mut current = tail;
        while offset < total {
            let copied = self.copy_rows_into_chunk(&current, txn, &chunk, offset)?;
            offset += copied;
            if offset < total {
                let next_start = current.start() + STORAGE_CHUNK_SIZE as u64;
                debug!(next_start, "version chunk full, spilling append");
                current = self.append_version_chunk_locked(&mut nodes, next_start);
            }
        }
        debug!(rows = total, row_start, "append complete");
        Ok(())
    }

    /// Copies as many input rows as fit into `chunk`, reserving undo
    /// records first. Returns the number of rows taken (zero if full).
    fn copy_rows_into_chunk(
        &self,
        chunk: &Arc<VersionChunk>,
        txn: &mut Transaction,
        input: &DataChunk,
        offset: usize,
    ) -> Result<usize> {
        let mut guard = chunk.inner.write();
        let space = STORAGE_CHUNK_SIZE - guard.count;
        if space == 0 {
            return Ok(0);
        }
        let batch = space.min(input.len() - offset);
        guard.push_deleted_entries(chunk, txn, batch);

        for (column, data_type) in self.data.types.iter().enumerate() {
            let width = data_type.width();
            let mut cells = vec![0u8; batch * width];
            for i in 0..batch {
                let value = input.value(column, offset + i);
                let cell = &mut cells[i * width..(i + 1) * width];
                if *data_type == DataType::Varchar {
                    let handle = self.stage_string(&mut guard.heap, value)?;
                    types::encode_handle(handle, cell);
                } else {
                    types::encode_fixed(*data_type, value, cell)?;
                }
            }
            self.append_column_cells(column, &cells);
        }

        guard.count += batch;
        Ok(batch)
    }

    /// Moves a string value into `heap`, returning its cell handle.
    fn stage_string(&self, heap: &mut StringHeap, value: &Value) -> Result<StringHandle> {
        match value {
            Value::Null => Ok(types::NULL_HANDLE),
            Value::Varchar(text) => {
                let handle = self.next_string_handle.fetch_add(1, Ordering::SeqCst);
                heap.insert(handle, text.clone());
                Ok(handle)
            }
            other => Err(DbError::Internal(format!(
                "cannot store {:?} in a VARCHAR column",
                other
            ))),
        }
    }

    /// Appends encoded cells to a column's tail segment, allocating new
    /// segments as they fill. The caller holds the append latch.
    fn append_column_cells(&self, column: ColumnId, cells: &[u8]) {
        let tree = &self.data.column_trees[column];
        let width = self.data.types[column].width();
        let mut nodes = tree.node_lock();
        if nodes.is_empty() {
            SegmentTree::append_locked(&mut nodes, Arc::new(ColumnSegment::new(0, width)));
        }
        let mut remaining = cells;
        while !remaining.is_empty() {
            let tail = Arc::clone(&nodes[nodes.len() - 1]);
            let taken = tail.append_cells(remaining);
            remaining = &remaining[taken * width..];
            if !remaining.is_empty() {
                let start = tail.start() + tail.count() as u64;
                SegmentTree::append_locked(&mut nodes, Arc::new(ColumnSegment::new(start, width)));
            }
        }
    }

    /// Allocates the next version chunk, pinning each column's next free
    /// position as the chunk's column-pointer table.
    fn append_version_chunk_locked(
        &self,
        nodes: &mut Vec<Arc<VersionChunk>>,
        start: RowId,
    ) -> Arc<VersionChunk> {
        let column_start = self
            .data
            .column_trees
            .iter()
            .zip(&self.data.types)
            .map(|(tree, data_type)| match tree.tail() {
                Some(tail) => ColumnPointer {
                    segment_index: tree.len() - 1,
                    byte_offset: tail.count() * data_type.width(),
                },
                None => ColumnPointer {
                    segment_index: 0,
                    byte_offset: 0,
                },
            })
            .collect();
        let chunk = Arc::new(VersionChunk::new(start, Arc::clone(&self.data), column_start));
        SegmentTree::append_locked(nodes, Arc::clone(&chunk));
        chunk
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Appends `[row_start, row_start + n)` to every index in order. On the
    /// first refusal, entries already added to earlier indexes are removed
    /// again and the append fails as a constraint violation.
    fn append_to_indexes(&self, chunk: &DataChunk, row_start: RowId) -> Result<()> {
        let row_ids = generate_row_sequence(row_start, chunk.len());
        let indexes = self.indexes.read();
        let mut failed_index = None;
        for (i, index) in indexes.iter().enumerate() {
            if !index.append(chunk, &row_ids)? {
                failed_index = Some(i);
                break;
            }
        }
        if let Some(failed) = failed_index {
            for index in &indexes[..failed] {
                index.delete(chunk, &row_ids);
            }
            warn!(failed_index = failed, "index append refused, rolled back");
            return Err(DbError::Constraint(
                "PRIMARY KEY or UNIQUE constraint violated: duplicated key".to_string(),
            ));
        }
        Ok(())
    }

    /// Same discipline as [`append_to_indexes`] for updates, skipping
    /// indexes whose keys the update cannot touch and presenting the update
    /// columns at their catalog positions.
    fn update_indexes(
        &self,
        column_ids: &[ColumnId],
        updates: &DataChunk,
        row_ids: &[RowId],
    ) -> Result<()> {
        let mock = build_mock_chunk(&self.data.types, column_ids, updates)?;
        let indexes = self.indexes.read();
        let mut touched: Vec<&Arc<dyn Index>> = Vec::new();
        for index in indexes.iter() {
            if !index.index_is_updated(column_ids) {
                continue;
            }
            if !index.append(&mock, row_ids)? {
                for earlier in &touched {
                    earlier.delete(&mock, row_ids);
                }
                warn!("index update refused, rolled back");
                return Err(DbError::Constraint(
                    "PRIMARY KEY or UNIQUE constraint violated: duplicated key".to_string(),
                ));
            }
            touched.push(index);
        }
        Ok(())
    }

    /// Registers a new index, bootstrapping it from every row currently
    /// present (committed or in-progress).
    pub fn add_index(&self, index: Arc<dyn Index>) -> Result<()> {
        let all_columns: Vec<ColumnId> = (0..self.data.types.len()).collect();
        let mut state = self.init_index_scan();
        while !state.is_done() {
            let mut result = DataChunk::new(&self.data.types);
            let row_ids = self.create_index_scan(&mut state, &all_columns, &mut result)?;
            if row_ids.is_empty() {
                continue;
            }
            if !index.append(&result, &row_ids)? {
                return Err(DbError::Constraint(
                    "PRIMARY KEY or UNIQUE constraint violated: duplicated key".to_string(),
                ));
            }
        }
        self.indexes.write().push(index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Marks rows deleted. Row ids may span chunks; the table partitions
    /// them by owning chunk and processes each group under that chunk's
    /// exclusive lock, checking the whole group for conflicts before
    /// writing any undo record for it.
    pub fn delete(&self, txn: &mut Transaction, row_ids: &[RowId]) -> Result<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        let mut sorted = row_ids.to_vec();
        sort_row_ids(&mut sorted);

        let mut at = 0;
        while at < sorted.len() {
            let (_, chunk) = self.row_tree.lookup(sorted[at]).ok_or_else(|| {
                DbError::Internal(format!("row id {} out of range", sorted[at]))
            })?;
            let chunk_end = chunk.start() + STORAGE_CHUNK_SIZE as u64;
            let group_end = sorted[at..]
                .iter()
                .position(|&id| id >= chunk_end)
                .map(|p| at + p)
                .unwrap_or(sorted.len());
            self.delete_in_chunk(txn, &chunk, &sorted[at..group_end])?;
            at = group_end;
        }
        debug!(rows = sorted.len(), "delete complete");
        Ok(())
    }

    fn delete_in_chunk(
        &self,
        txn: &mut Transaction,
        chunk: &Arc<VersionChunk>,
        row_ids: &[RowId],
    ) -> Result<()> {
        let mut guard = chunk.inner.write();

        // Conflict check for the whole group first: a conflicting row must
        // not leave behind undo records for its neighbors.
        for &row_id in row_ids {
            let row_offset = (row_id - chunk.start()) as usize;
            if row_offset >= guard.count {
                return Err(DbError::Internal(format!(
                    "row id {} beyond chunk count {}",
                    row_id, guard.count
                )));
            }
            if guard.has_conflict(row_offset, txn) {
                return Err(DbError::TransactionConflict(format!(
                    "row {} is locked by another transaction",
                    row_id
                )));
            }
        }

        for &row_id in row_ids {
            let row_offset = (row_id - chunk.start()) as usize;
            if guard.is_deleted(row_offset) {
                continue;
            }
            let pre_image = chunk.serialize_row(row_offset);
            guard.push_tuple(chunk, txn, VersionOp::Delete, row_offset, pre_image);
            guard.set_deleted(row_offset);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Updates `column_ids` of the given rows in place. All row ids must
    /// lie in one version chunk. The whole batch is conflict-checked before
    /// the first undo record is written, so a conflicting update has zero
    /// side effects.
    pub fn update(
        &self,
        txn: &mut Transaction,
        row_ids: &[RowId],
        column_ids: &[ColumnId],
        updates: &DataChunk,
    ) -> Result<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        self.verify_update_shape(row_ids, column_ids, updates)?;
        let updates = updates.flatten()?;

        ConstraintVerifier::verify_update(&self.info, &updates, column_ids)?;

        let (_, chunk) = self.row_tree.lookup(row_ids[0]).ok_or_else(|| {
            DbError::Internal(format!("row id {} out of range", row_ids[0]))
        })?;
        let chunk_end = chunk.start() + STORAGE_CHUNK_SIZE as u64;
        if row_ids.iter().any(|&id| id < chunk.start() || id >= chunk_end) {
            return Err(DbError::Internal(
                "update batch spans multiple version chunks".to_string(),
            ));
        }

        let mut guard = chunk.inner.write();

        // Batch-first conflict detection: no undo records on failure.
        for &row_id in row_ids {
            let row_offset = (row_id - chunk.start()) as usize;
            if row_offset >= guard.count {
                return Err(DbError::Internal(format!(
                    "row id {} beyond chunk count {}",
                    row_id, guard.count
                )));
            }
            if guard.has_conflict(row_offset, txn) {
                return Err(DbError::TransactionConflict(format!(
                    "row {} is locked by another transaction",
                    row_id
                )));
            }
        }

        // Index maintenance before base mutation, so a duplicated key
        // propagates with the table untouched.
        self.update_indexes(column_ids, &updates, row_ids)?;

        for &row_id in row_ids {
            let row_offset = (row_id - chunk.start()) as usize;
            let pre_image = chunk.serialize_row(row_offset);
            guard.push_tuple(&chunk, txn, VersionOp::Update, row_offset, pre_image);
        }

        let mut scratch = StringHeap::new();
        for (pos, &column) in column_ids.iter().enumerate() {
            let data_type = self.data.types[column];
            let width = data_type.width();
            let vector = updates.column(pos);
            self.statistics[column].lock().update_vector(vector);
            for (i, &row_id) in row_ids.iter().enumerate() {
                let mut cell = vec![0u8; width];
                let value = &vector.values[i];
                if data_type == DataType::Varchar {
                    let handle = self.stage_string(&mut scratch, value)?;
                    types::encode_handle(handle, &mut cell);
                } else {
                    types::encode_fixed(data_type, value, &mut cell)?;
                }
                let (_, segment) =
                    self.data.column_trees[column].lookup(row_id).ok_or_else(|| {
                        DbError::Internal(format!(
                            "row {} missing from column {} segments",
                            row_id, column
                        ))
                    })?;
                segment.write_cell(row_id, &cell);
            }
        }
        guard.heap.merge(scratch);
        debug!(rows = row_ids.len(), columns = column_ids.len(), "update complete");
        Ok(())
    }

    fn verify_update_shape(
        &self,
        row_ids: &[RowId],
        column_ids: &[ColumnId],
        updates: &DataChunk,
    ) -> Result<()> {
        if column_ids.is_empty() {
            return Err(DbError::Catalog("update without columns".to_string()));
        }
        if updates.column_count() != column_ids.len() {
            return Err(DbError::Catalog(format!(
                "update chunk has {} columns for {} column ids",
                updates.column_count(),
                column_ids.len()
            )));
        }
        if updates.len() != row_ids.len() {
            return Err(DbError::Internal(format!(
                "update chunk has {} rows for {} row ids",
                updates.len(),
                row_ids.len()
            )));
        }
        for (pos, &column) in column_ids.iter().enumerate() {
            let expected = self.data.types.get(column).ok_or_else(|| {
                DbError::Catalog(format!(
                    "update references column {} of a {}-column table",
                    column,
                    self.data.types.len()
                ))
            })?;
            if updates.column(pos).data_type != *expected {
                return Err(DbError::Catalog(format!(
                    "column type mismatch: expected {:?}, got {:?}",
                    expected,
                    updates.column(pos).data_type
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scan / Fetch
    // ------------------------------------------------------------------

    /// Captures the snapshot bounds for a new scan.
    pub fn init_scan(&self) -> TableScanState {
        let last_chunk_index = self.row_tree.len().saturating_sub(1);
        let last_chunk_count = self.row_tree.tail().map_or(0, |tail| tail.count());
        TableScanState {
            chunk_index: 0,
            offset: 0,
            last_chunk_index,
            last_chunk_count,
            done: false,
        }
    }

    /// Produces the next batch of at most VECTOR_SIZE visible rows,
    /// projecting `column_ids`. An empty result means the scan is drained.
    pub fn scan(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        state: &mut TableScanState,
    ) -> Result<DataChunk> {
        let projected: Vec<DataType> = column_ids.iter().map(|&c| self.data.types[c]).collect();
        let mut result = DataChunk::new(&projected);
        while !state.done {
            let chunk = self.row_tree.get(state.chunk_index).ok_or_else(|| {
                DbError::Internal(format!("scan chunk {} missing", state.chunk_index))
            })?;
            let bound = if state.chunk_index == state.last_chunk_index {
                state.last_chunk_count
            } else {
                chunk.count()
            };
            state.offset = chunk.scan_step(txn, column_ids, &mut result, state.offset, bound)?;
            if state.offset >= bound {
                if state.chunk_index == state.last_chunk_index {
                    state.done = true;
                } else {
                    state.chunk_index += 1;
                    state.offset = 0;
                }
            }
            if !result.is_empty() {
                break;
            }
        }
        Ok(result)
    }

    /// Point lookups. Row ids are sorted so ids of one chunk group
    /// together; rows invisible or deleted for this snapshot are omitted.
    pub fn fetch(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        row_ids: &[RowId],
    ) -> Result<DataChunk> {
        let projected: Vec<DataType> = column_ids.iter().map(|&c| self.data.types[c]).collect();
        let mut result = DataChunk::new(&projected);
        let mut sorted = row_ids.to_vec();
        sort_row_ids(&mut sorted);
        for &row_id in &sorted {
            let (_, chunk) = self.row_tree.lookup(row_id).ok_or_else(|| {
                DbError::Internal(format!("row id {} out of range", row_id))
            })?;
            let row_offset = (row_id - chunk.start()) as usize;
            chunk.retrieve_tuple_data(txn, column_ids, row_offset, &mut result)?;
        }
        Ok(result)
    }

    /// Starts an index-bootstrap scan over all current insertions.
    pub fn init_index_scan(&self) -> IndexScanState {
        IndexScanState {
            chunk_index: 0,
            offset: 0,
            last_chunk_index: self.row_tree.len().saturating_sub(1),
            done: false,
        }
    }

    /// Produces the next batch for index bootstrap, returning the row ids
    /// matching the rows appended to `result`.
    pub fn create_index_scan(
        &self,
        state: &mut IndexScanState,
        column_ids: &[ColumnId],
        result: &mut DataChunk,
    ) -> Result<Vec<RowId>> {
        let mut row_ids = Vec::new();
        while !state.done {
            let chunk = self.row_tree.get(state.chunk_index).ok_or_else(|| {
                DbError::Internal(format!("scan chunk {} missing", state.chunk_index))
            })?;
            let bound = chunk.count();
            let (next, mut emitted) =
                chunk.index_scan_step(column_ids, result, state.offset)?;
            state.offset = next;
            row_ids.append(&mut emitted);
            if state.offset >= bound {
                if state.chunk_index == state.last_chunk_index {
                    state.done = true;
                } else {
                    state.chunk_index += 1;
                    state.offset = 0;
                }
            }
            if !row_ids.is_empty() {
                break;
            }
        }
        Ok(row_ids)
    }
}
