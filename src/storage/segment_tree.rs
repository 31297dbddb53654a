use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::RowId;

/// A node keyed by its starting row id.
pub trait SegmentNode {
    fn segment_start(&self) -> RowId;
    fn segment_count(&self) -> usize;
}

/// Ordered append-only collection of segments in row-id space.
///
/// Lookup is O(log n) by binary search on `start`. Appends go through the
/// write side of the node list, which doubles as the tree's `node_lock`:
/// the table-level append path holds that guard while it allocates at the
/// tail.
pub struct SegmentTree<N: SegmentNode> {
    nodes: RwLock<Vec<Arc<N>>>,
}

impl<N: SegmentNode> SegmentTree<N> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn root(&self) -> Option<Arc<N>> {
        self.nodes.read().first().cloned()
    }

    pub fn tail(&self) -> Option<Arc<N>> {
        self.nodes.read().last().cloned()
    }

    pub fn get(&self, index: usize) -> Option<Arc<N>> {
        self.nodes.read().get(index).cloned()
    }

    /// Returns the segment whose `[start, start + count)` range contains
    /// `row`, together with its position in the tree.
    pub fn lookup(&self, row: RowId) -> Option<(usize, Arc<N>)> {
        let nodes = self.nodes.read();
        let index = match nodes.binary_search_by(|n| n.segment_start().cmp(&row)) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let node = &nodes[index];
        if row < node.segment_start() + node.segment_count() as u64 {
            Some((index, Arc::clone(node)))
        } else {
            None
        }
    }

    /// Appends a segment at the tail without taking the node lock again;
    /// used from code that already holds the guard from [`node_lock`].
    pub fn append_locked(nodes: &mut Vec<Arc<N>>, node: Arc<N>) {
        if let Some(tail) = nodes.last() {
            debug_assert_eq!(
                tail.segment_start() + tail.segment_count() as u64,
                node.segment_start()
            );
        }
        nodes.push(node);
    }

    /// Appends a segment at the tail.
    pub fn append_segment(&self, node: Arc<N>) {
        let mut nodes = self.nodes.write();
        Self::append_locked(&mut nodes, node);
    }

    /// Takes the tree's node lock. Holding the guard serializes tail
    /// allocation against every other writer.
    pub fn node_lock(&self) -> RwLockWriteGuard<'_, Vec<Arc<N>>> {
        self.nodes.write()
    }
}

impl<N: SegmentNode> Default for SegmentTree<N> {
    fn default() -> Self {
        Self::new()
    }
}
