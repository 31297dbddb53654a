// # Version Chunks
//
// A VersionChunk is a horizontal slab of up to STORAGE_CHUNK_SIZE rows
// spanning all columns. It is the unit of locking and version tracking:
// writers take its lock exclusively, readers take it shared. Per-row version
// chains live in an arena owned by the chunk; the undo buffer of the writing
// transaction holds (chunk, row, node) triples into that arena, and commit
// or rollback mutate the arena, never the slot layout.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{ColumnId, RowId, StringHandle, STORAGE_CHUNK_SIZE, VECTOR_SIZE};
use crate::error::{DbError, Result};
use crate::storage::data_table::TableData;
use crate::storage::segment_tree::SegmentNode;
use crate::storage::string_heap::StringHeap;
use crate::transaction::{Transaction, UndoEntry};
use crate::types::{self, DataType, Value};
use crate::vector::DataChunk;

/// Stable index of a version node within its chunk's arena.
pub type NodeId = u32;

/// The operation a version node records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    Insert,
    Delete,
    Update,
}

/// One link of a newest-first version chain.
///
/// `version_number` at or above TRANSACTION_ID_START marks an uncommitted
/// node owned by that transaction; below it, a commit timestamp. Insert
/// nodes carry no pre-image; Delete/Update nodes carry the serialized row
/// as it was before the operation.
#[derive(Debug)]
pub struct VersionNode {
    pub version_number: u64,
    pub op: VersionOp,
    pub prev: Option<NodeId>,
    pub tuple_data: Option<Vec<u8>>,
}

/// Handle into a column's segment arena: where this chunk's rows begin.
#[derive(Debug, Clone, Copy)]
pub struct ColumnPointer {
    pub segment_index: usize,
    pub byte_offset: usize,
}

/// Lock-protected mutable state of a chunk.
pub struct ChunkData {
    pub(crate) count: usize,
    pub(crate) version_slots: Vec<Option<NodeId>>,
    pub(crate) nodes: Vec<VersionNode>,
    pub(crate) deleted: Vec<bool>,
    pub(crate) heap: StringHeap,
}

/// Where a row's visible image comes from, relative to one snapshot.
enum RowImage {
    Skip,
    Base,
    Node(NodeId),
}

/// A row slab with per-row version chains, a string heap and a
/// reader/writer lock.
pub struct VersionChunk {
    start: RowId,
    table: Arc<TableData>,
    column_start: Vec<ColumnPointer>,
    pub(crate) inner: RwLock<ChunkData>,
}

/// Snapshot visibility in one comparison: a version belongs to this
/// transaction, or committed at or before its snapshot began. Commit
/// timestamps and start times both sit below TRANSACTION_ID_START, so an
/// uncommitted foreign id can never pass the `<=` arm.
pub fn version_is_visible(version_number: u64, txn: &Transaction) -> bool {
    version_number == txn.id || version_number <= txn.start_time
}

impl VersionChunk {
    pub fn new(start: RowId, table: Arc<TableData>, column_start: Vec<ColumnPointer>) -> Self {
        Self {
            start,
            table,
            column_start,
            inner: RwLock::new(ChunkData {
                count: 0,
                version_slots: vec![None; STORAGE_CHUNK_SIZE],
                nodes: Vec::new(),
                deleted: vec![false; STORAGE_CHUNK_SIZE],
                heap: StringHeap::new(),
            }),
        }
    }

    pub fn start(&self) -> RowId {
        self.start
    }

    pub fn count(&self) -> usize {
        self.inner.read().count
    }

    pub fn table(&self) -> &Arc<TableData> {
        &self.table
    }

    /// Column-pointer table recorded at chunk creation.
    pub fn column_start(&self, column: ColumnId) -> ColumnPointer {
        self.column_start[column]
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Produces the next batch of at most VECTOR_SIZE visible rows from
    /// `[from, bound)`, projecting `column_ids` into `result`. Returns the
    /// offset the scan should resume from.
    pub fn scan_step(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        result: &mut DataChunk,
        from: usize,
        bound: usize,
    ) -> Result<usize> {
        let guard = self.inner.read();
        let bound = bound.min(guard.count);
        let end = (from + VECTOR_SIZE).min(bound);
        for row_offset in from..end {
            match guard.resolve_row(row_offset, txn) {
                RowImage::Skip => continue,
                RowImage::Base => {
                    let row = self.materialize_base(&guard, column_ids, row_offset)?;
                    result.append_row(&row)?;
                }
                RowImage::Node(node) => {
                    let image = guard.nodes[node as usize]
                        .tuple_data
                        .as_deref()
                        .ok_or_else(|| {
                            DbError::Internal("version node without pre-image".to_string())
                        })?;
                    let row = self.materialize_image(&guard, column_ids, image)?;
                    result.append_row(&row)?;
                }
            }
        }
        Ok(end)
    }

    /// Single-row materialization with the scan visibility rule. Returns
    /// false when the row is invisible or deleted for this snapshot.
    pub fn retrieve_tuple_data(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        row_offset: usize,
        result: &mut DataChunk,
    ) -> Result<bool> {
        let guard = self.inner.read();
        if row_offset >= guard.count {
            return Err(DbError::Internal(format!(
                "row offset {} beyond chunk count {}",
                row_offset, guard.count
            )));
        }
        match guard.resolve_row(row_offset, txn) {
            RowImage::Skip => Ok(false),
            RowImage::Base => {
                let row = self.materialize_base(&guard, column_ids, row_offset)?;
                result.append_row(&row)?;
                Ok(true)
            }
            RowImage::Node(node) => {
                let image = guard.nodes[node as usize]
                    .tuple_data
                    .as_deref()
                    .ok_or_else(|| {
                        DbError::Internal("version node without pre-image".to_string())
                    })?;
                let row = self.materialize_image(&guard, column_ids, image)?;
                result.append_row(&row)?;
                Ok(true)
            }
        }
    }

    /// Index-bootstrap scan step: emits every row present in the chunk,
    /// committed or in-progress, minus deleted ones. Returns (new offset,
    /// row ids emitted).
    pub fn index_scan_step(
        &self,
        column_ids: &[ColumnId],
        result: &mut DataChunk,
        from: usize,
    ) -> Result<(usize, Vec<RowId>)> {
        let guard = self.inner.read();
        let end = (from + VECTOR_SIZE).min(guard.count);
        let mut row_ids = Vec::new();
        for row_offset in from..end {
            if guard.deleted[row_offset] {
                continue;
            }
            let row = self.materialize_base(&guard, column_ids, row_offset)?;
            result.append_row(&row)?;
            row_ids.push(self.start + row_offset as u64);
        }
        Ok((end, row_ids))
    }

    /// Serializes the current base image of one row across all columns,
    /// in catalog order. This is the pre-image pushed into undo buffers.
    pub fn serialize_row(&self, row_offset: usize) -> Vec<u8> {
        let row = self.start + row_offset as u64;
        let mut image = vec![0u8; self.table.row_width()];
        let mut at = 0;
        for (column, data_type) in self.table.types.iter().enumerate() {
            let width = data_type.width();
            if let Some((_, segment)) = self.table.column_trees[column].lookup(row) {
                segment.read_cell(row, &mut image[at..at + width]);
            }
            at += width;
        }
        image
    }

    /// Writes a serialized row image back into the base segments,
    /// reversing an update.
    pub fn restore_row(&self, row_offset: usize, image: &[u8]) {
        let row = self.start + row_offset as u64;
        let mut at = 0;
        for (column, data_type) in self.table.types.iter().enumerate() {
            let width = data_type.width();
            if let Some((_, segment)) = self.table.column_trees[column].lookup(row) {
                segment.write_cell(row, &image[at..at + width]);
            }
            at += width;
        }
    }

    fn materialize_base(
        &self,
        guard: &ChunkData,
        column_ids: &[ColumnId],
        row_offset: usize,
    ) -> Result<Vec<Value>> {
        let row = self.start + row_offset as u64;
        let mut values = Vec::with_capacity(column_ids.len());
        for &column in column_ids {
            let data_type = self.table.types[column];
            let mut cell = vec![0u8; data_type.width()];
            let (_, segment) = self.table.column_trees[column].lookup(row).ok_or_else(|| {
                DbError::Internal(format!("row {} missing from column {} segments", row, column))
            })?;
            segment.read_cell(row, &mut cell);
            values.push(self.decode_cell(guard, data_type, &cell)?);
        }
        Ok(values)
    }

    fn materialize_image(
        &self,
        guard: &ChunkData,
        column_ids: &[ColumnId],
        image: &[u8],
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(column_ids.len());
        for &column in column_ids {
            let data_type = self.table.types[column];
            let at = self.table.column_offset(column);
            let cell = &image[at..at + data_type.width()];
            values.push(self.decode_cell(guard, data_type, cell)?);
        }
        Ok(values)
    }

    fn decode_cell(&self, guard: &ChunkData, data_type: DataType, cell: &[u8]) -> Result<Value> {
        if data_type == DataType::Varchar {
            let handle: StringHandle = types::decode_handle(cell);
            if handle == types::NULL_HANDLE {
                return Ok(Value::Null);
            }
            let text = guard.heap.get(handle).ok_or_else(|| {
                DbError::Internal(format!("dangling string handle {}", handle))
            })?;
            Ok(Value::Varchar(text.to_string()))
        } else {
            Ok(types::decode_fixed(data_type, cell))
        }
    }
}

impl SegmentNode for VersionChunk {
    fn segment_start(&self) -> RowId {
        self.start
    }

    fn segment_count(&self) -> usize {
        self.count()
    }
}

impl ChunkData {
    /// Head of the version chain for a row, if any.
    pub fn version_info(&self, row_offset: usize) -> Option<NodeId> {
        self.version_slots[row_offset]
    }

    pub fn is_deleted(&self, row_offset: usize) -> bool {
        self.deleted[row_offset]
    }

    pub fn set_deleted(&mut self, row_offset: usize) {
        self.deleted[row_offset] = true;
    }

    pub fn clear_deleted(&mut self, row_offset: usize) {
        self.deleted[row_offset] = false;
    }

    pub fn node(&self, id: NodeId) -> &VersionNode {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut VersionNode {
        &mut self.nodes[id as usize]
    }

    /// First-writer-wins test: the row conflicts when its head version was
    /// written by another live transaction, or committed after this
    /// transaction's snapshot began. One comparison covers both cases
    /// because live ids sit above every start time.
    pub fn has_conflict(&self, row_offset: usize, txn: &Transaction) -> bool {
        match self.version_slots[row_offset] {
            None => false,
            Some(head) => {
                let version = self.nodes[head as usize].version_number;
                version != txn.id && version > txn.start_time
            }
        }
    }

    /// Reserves `count` version slots at the chunk tail marked "newly
    /// inserted" and chains them into the transaction's undo buffer, so a
    /// rollback marks them deleted. Does not advance `self.count`.
    pub fn push_deleted_entries(
        &mut self,
        chunk: &Arc<VersionChunk>,
        txn: &mut Transaction,
        count: usize,
    ) {
        for i in 0..count {
            let row_offset = self.count + i;
            debug_assert!(row_offset < STORAGE_CHUNK_SIZE);
            let node = self.nodes.len() as NodeId;
            self.nodes.push(VersionNode {
                version_number: txn.id,
                op: VersionOp::Insert,
                prev: self.version_slots[row_offset],
                tuple_data: None,
            });
            self.version_slots[row_offset] = Some(node);
            txn.undo.push(UndoEntry {
                chunk: Arc::clone(chunk),
                row_offset,
                node,
            });
        }
    }

    /// Copies the pre-image of one row into the undo buffer and prepends
    /// the new version node to the row's chain.
    pub fn push_tuple(
        &mut self,
        chunk: &Arc<VersionChunk>,
        txn: &mut Transaction,
        op: VersionOp,
        row_offset: usize,
        pre_image: Vec<u8>,
    ) {
        debug_assert!(matches!(op, VersionOp::Delete | VersionOp::Update));
        let node = self.nodes.len() as NodeId;
        self.nodes.push(VersionNode {
            version_number: txn.id,
            op,
            prev: self.version_slots[row_offset],
            tuple_data: Some(pre_image),
        });
        self.version_slots[row_offset] = Some(node);
        txn.undo.push(UndoEntry {
            chunk: Arc::clone(chunk),
            row_offset,
            node,
        });
    }

    /// Walks the version chain for `row_offset`, newest first, and decides
    /// where the row's image comes from for this snapshot.
    ///
    /// The first visible node decides liveness; its image is the base data
    /// when it is the head, otherwise the pre-image captured by the oldest
    /// non-visible node above it. A chain that bottoms out on a non-visible
    /// Insert means the row is not yet born for this reader.
    fn resolve_row(&self, row_offset: usize, txn: &Transaction) -> RowImage {
        let Some(head) = self.version_slots[row_offset] else {
            return if self.deleted[row_offset] {
                RowImage::Skip
            } else {
                RowImage::Base
            };
        };

        let mut current = Some(head);
        let mut last_unvisible: Option<NodeId> = None;
        while let Some(id) = current {
            let node = &self.nodes[id as usize];
            if version_is_visible(node.version_number, txn) {
                if node.op == VersionOp::Delete {
                    return RowImage::Skip;
                }
                return match last_unvisible {
                    None => RowImage::Base,
                    Some(above) => match self.nodes[above as usize].tuple_data {
                        Some(_) => RowImage::Node(above),
                        None => RowImage::Skip,
                    },
                };
            }
            last_unvisible = Some(id);
            current = node.prev;
        }

        // No visible node in the chain: the row's state predates every
        // version. The oldest node's pre-image is that state, unless the
        // chain bottoms out on an insertion, in which case the row does
        // not exist yet for this reader.
        match last_unvisible {
            Some(oldest_id) => {
                let oldest = &self.nodes[oldest_id as usize];
                if oldest.op == VersionOp::Insert || oldest.tuple_data.is_none() {
                    RowImage::Skip
                } else {
                    RowImage::Node(oldest_id)
                }
            }
            None => RowImage::Base,
        }
    }
}
