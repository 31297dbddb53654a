// # Transactions, Undo Buffers and the Transaction Manager
//
// Snapshot-isolated MVCC with first-writer-wins conflict detection. Commit
// timestamps and snapshot start times come from a single logical clock, so
// a snapshot taken after a commit always orders after it. Live transaction
// ids grow from TRANSACTION_ID_START in a separate counter; a version
// number below that boundary is a commit timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{Timestamp, TransactionId, TRANSACTION_ID_START};
use crate::storage::version_chunk::{NodeId, VersionChunk, VersionOp};

/// One undo record: which chunk, which row slot, which arena node.
pub struct UndoEntry {
    pub chunk: Arc<VersionChunk>,
    pub row_offset: usize,
    pub node: NodeId,
}

/// Ordered per-transaction undo log. Owns the pre-images through the
/// version nodes it references.
#[derive(Default)]
pub struct UndoBuffer {
    entries: Vec<UndoEntry>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An in-flight transaction: identity, snapshot time and undo log.
pub struct Transaction {
    pub id: TransactionId,
    pub start_time: Timestamp,
    pub undo: UndoBuffer,
}

impl Transaction {
    pub fn undo_entry_count(&self) -> usize {
        self.undo.len()
    }
}

/// Hands out transactions and applies commit/rollback to their undo logs.
pub struct TransactionManager {
    /// Logical clock shared between snapshot starts and commit timestamps.
    clock: AtomicU64,
    next_id: AtomicU64,
    /// Serializes commits so timestamp assignment and version rewriting
    /// are not interleaved between two committers.
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Begins a transaction with a fresh id and the current snapshot time.
    pub fn begin(&self) -> Transaction {
        let id = TRANSACTION_ID_START + self.next_id.fetch_add(1, Ordering::SeqCst);
        let start_time = self.clock.load(Ordering::SeqCst);
        debug!(id, start_time, "begin transaction");
        Transaction {
            id,
            start_time,
            undo: UndoBuffer::new(),
        }
    }

    /// Commits: every version node written by the transaction has its
    /// version number rewritten from the transaction id to the commit
    /// timestamp, making the writes visible to later snapshots.
    pub fn commit(&self, txn: Transaction) -> Timestamp {
        let _guard = self.commit_lock.lock();
        let commit_ts = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert!(commit_ts < TRANSACTION_ID_START);
        for entry in &txn.undo.entries {
            let mut chunk = entry.chunk.inner.write();
            let node = chunk.node_mut(entry.node);
            debug_assert_eq!(node.version_number, txn.id);
            node.version_number = commit_ts;
        }
        debug!(
            id = txn.id,
            commit_ts,
            undo_entries = txn.undo.entries.len(),
            "commit transaction"
        );
        commit_ts
    }

    /// Rolls back: undo entries are unwound in reverse order. Inserts are
    /// marked deleted, updates restore the pre-image into the base
    /// segments and unlink the head, deletes clear the bit and unlink.
    pub fn rollback(&self, txn: Transaction) {
        for entry in txn.undo.entries.iter().rev() {
            let mut chunk = entry.chunk.inner.write();
            debug_assert_eq!(chunk.version_info(entry.row_offset), Some(entry.node));
            let (op, prev, image) = {
                let node = chunk.node(entry.node);
                (node.op, node.prev, node.tuple_data.clone())
            };
            match op {
                VersionOp::Insert => {
                    chunk.set_deleted(entry.row_offset);
                }
                VersionOp::Update => {
                    if let Some(image) = image {
                        entry.chunk.restore_row(entry.row_offset, &image);
                    }
                    chunk.version_slots[entry.row_offset] = prev;
                }
                VersionOp::Delete => {
                    chunk.clear_deleted(entry.row_offset);
                    chunk.version_slots[entry.row_offset] = prev;
                }
            }
        }
        debug!(
            id = txn.id,
            undo_entries = txn.undo.entries.len(),
            "rollback transaction"
        );
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
