use parking_lot::RwLock;

use crate::common::{RowId, BLOCK_SIZE};
use crate::storage::segment_tree::SegmentNode;

/// A fixed-capacity byte buffer holding a contiguous run of one column's
/// values, starting at row `start`.
///
/// The buffer lock is a short-lived data-copy lock; statement-level
/// serialization comes from the owning chunk's lock.
pub struct ColumnSegment {
    start: RowId,
    width: usize,
    inner: RwLock<SegmentData>,
}

struct SegmentData {
    count: usize,
    offset: usize,
    data: Vec<u8>,
}

impl ColumnSegment {
    pub fn new(start: RowId, width: usize) -> Self {
        debug_assert!(width > 0 && width <= BLOCK_SIZE);
        Self {
            start,
            width,
            inner: RwLock::new(SegmentData {
                count: 0,
                offset: 0,
                data: vec![0u8; BLOCK_SIZE],
            }),
        }
    }

    pub fn start(&self) -> RowId {
        self.start
    }

    pub fn count(&self) -> usize {
        self.inner.read().count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows this segment can still take.
    pub fn remaining(&self) -> usize {
        let inner = self.inner.read();
        (BLOCK_SIZE - inner.offset) / self.width
    }

    pub fn contains(&self, row: RowId) -> bool {
        row >= self.start && row < self.start + self.count() as u64
    }

    /// Bulk-appends up to `remaining()` cells from `cells` (already encoded,
    /// `width` bytes each). Returns how many were taken.
    pub fn append_cells(&self, cells: &[u8]) -> usize {
        debug_assert_eq!(cells.len() % self.width, 0);
        let mut inner = self.inner.write();
        let available = (BLOCK_SIZE - inner.offset) / self.width;
        let requested = cells.len() / self.width;
        let taken = requested.min(available);
        let bytes = taken * self.width;
        let offset = inner.offset;
        inner.data[offset..offset + bytes].copy_from_slice(&cells[..bytes]);
        inner.offset += bytes;
        inner.count += taken;
        debug_assert_eq!(inner.offset, inner.count * self.width);
        taken
    }

    /// Copies the cell for `row` into `out`.
    pub fn read_cell(&self, row: RowId, out: &mut [u8]) {
        debug_assert!(self.contains(row));
        debug_assert_eq!(out.len(), self.width);
        let inner = self.inner.read();
        let pos = (row - self.start) as usize * self.width;
        out.copy_from_slice(&inner.data[pos..pos + self.width]);
    }

    /// Overwrites the cell for `row` in place. Callers hold the owning
    /// chunk's exclusive lock.
    pub fn write_cell(&self, row: RowId, bytes: &[u8]) {
        debug_assert!(self.contains(row));
        debug_assert_eq!(bytes.len(), self.width);
        let mut inner = self.inner.write();
        let pos = (row - self.start) as usize * self.width;
        inner.data[pos..pos + self.width].copy_from_slice(bytes);
    }
}

impl SegmentNode for ColumnSegment {
    fn segment_start(&self) -> RowId {
        self.start()
    }

    fn segment_count(&self) -> usize {
        self.count()
    }
}
