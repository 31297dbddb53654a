// # Common Types and Constants
//
// Shared identifiers and the compile-time storage geometry used across all
// laminar-db modules. Everything row-id-addressed (segments, chunks, scans)
// speaks in terms of these aliases.

// ============================================================================
// Type Aliases - Shared Identifiers
// ============================================================================

/// Dense 64-bit row identifier, monotonically assigned at append.
pub type RowId = u64;

/// Transaction identifier. Live transactions carry ids at or above
/// [`TRANSACTION_ID_START`]; committed versions carry timestamps below it.
pub type TransactionId = u64;

/// Logical commit/snapshot timestamp. Always below [`TRANSACTION_ID_START`].
pub type Timestamp = u64;

/// Zero-based column position within a table's catalog entry.
pub type ColumnId = usize;

/// Handle into a chunk's string heap. Zero is the NULL handle.
pub type StringHandle = u64;

// ============================================================================
// Storage Geometry - Compile-time constants (exposed for testing)
// ============================================================================

/// Capacity of one column segment's byte buffer.
pub const BLOCK_SIZE: usize = 16384;

/// Maximum number of rows per version chunk.
pub const STORAGE_CHUNK_SIZE: usize = 1024;

/// Maximum number of rows a single scan step materializes.
pub const VECTOR_SIZE: usize = 256;

/// Boundary between commit timestamps and live transaction ids.
///
/// A version number `v` is visible to a transaction `t` iff
/// `v == t.id || v <= t.start_time`; the boundary makes that single
/// comparison correct because every start time is below it and every
/// in-flight transaction id is above it.
pub const TRANSACTION_ID_START: u64 = 1 << 62;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_fits_in_block_for_widest_type() {
        // A chunk's rows for one column never need more than two segments.
        assert!(STORAGE_CHUNK_SIZE * 8 <= 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_vector_size_divides_chunk() {
        assert_eq!(STORAGE_CHUNK_SIZE % VECTOR_SIZE, 0);
    }

    #[test]
    fn test_transaction_id_boundary() {
        assert!(TRANSACTION_ID_START > u64::MAX / 4);
    }
}
