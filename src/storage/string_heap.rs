use std::collections::HashMap;

use crate::common::StringHandle;

/// Append-only string storage for one version chunk.
///
/// VARCHAR cells hold handles into the heap of the chunk that owns the row.
/// Handles are allocated from a table-level counter so a heap merge never
/// has to rebase cells already written to segments. Entries are never
/// removed: pre-images in version chains keep referencing old handles.
#[derive(Debug, Default)]
pub struct StringHeap {
    entries: HashMap<StringHandle, String>,
}

impl StringHeap {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, handle: StringHandle, value: String) {
        debug_assert_ne!(handle, 0, "handle 0 is the NULL handle");
        self.entries.insert(handle, value);
    }

    pub fn get(&self, handle: StringHandle) -> Option<&str> {
        self.entries.get(&handle).map(String::as_str)
    }

    /// Moves every entry of `other` into this heap.
    pub fn merge(&mut self, other: StringHeap) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
