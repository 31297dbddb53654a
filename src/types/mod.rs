// # Value Types and the Fixed-Width Cell Codec
//
// Every column stores fixed-width cells: numeric types store their native
// little-endian encoding, VARCHAR stores an 8-byte handle into the owning
// chunk's string heap. NULLs are materialized as type-specific sentinels,
// so the storage layer never carries a separate validity mask.

use serde::{Deserialize, Serialize};

use crate::common::StringHandle;
use crate::error::{DbError, Result};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Timestamp,
    Varchar,
}

impl DataType {
    /// Width in bytes of one storage cell of this type.
    pub fn width(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Integer => 4,
            DataType::BigInt | DataType::Double | DataType::Timestamp => 8,
            DataType::Varchar => 8,
        }
    }
}

// Null sentinels. The minimum of each domain is reserved; handle 0 is the
// NULL string handle.
pub const NULL_BOOLEAN: i8 = i8::MIN;
pub const NULL_INTEGER: i32 = i32::MIN;
pub const NULL_BIGINT: i64 = i64::MIN;
pub const NULL_DOUBLE: f64 = f64::MIN;
pub const NULL_TIMESTAMP: i64 = i64::MIN;
pub const NULL_HANDLE: StringHandle = 0;

/// An owned value as it appears in vectors and scan results.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Timestamp(i64),
    Varchar(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type this value belongs to, or `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Double(_) => Some(DataType::Double),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Varchar(_) => Some(DataType::Varchar),
        }
    }

    /// Whether this value can be stored in a column of `data_type`.
    pub fn matches_type(&self, data_type: DataType) -> bool {
        match self.data_type() {
            None => true,
            Some(t) => t == data_type,
        }
    }

    /// Canonical byte encoding used as an index key. Content-based for
    /// strings, bit-based for numerics. NULL has no key.
    pub fn index_key(&self) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(vec![*b as u8]),
            Value::Integer(v) => Some(v.to_le_bytes().to_vec()),
            Value::BigInt(v) | Value::Timestamp(v) => Some(v.to_le_bytes().to_vec()),
            Value::Double(v) => Some(v.to_bits().to_le_bytes().to_vec()),
            Value::Varchar(s) => Some(s.as_bytes().to_vec()),
        }
    }
}

/// Encode a non-VARCHAR value (or NULL) into its fixed-width cell.
///
/// `out` must be exactly `data_type.width()` bytes.
pub fn encode_fixed(data_type: DataType, value: &Value, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), data_type.width());
    match (data_type, value) {
        (DataType::Boolean, Value::Boolean(b)) => out[0] = *b as u8,
        (DataType::Boolean, Value::Null) => out[0] = NULL_BOOLEAN as u8,
        (DataType::Integer, Value::Integer(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (DataType::Integer, Value::Null) => out.copy_from_slice(&NULL_INTEGER.to_le_bytes()),
        (DataType::BigInt, Value::BigInt(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (DataType::BigInt, Value::Null) => out.copy_from_slice(&NULL_BIGINT.to_le_bytes()),
        (DataType::Double, Value::Double(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (DataType::Double, Value::Null) => out.copy_from_slice(&NULL_DOUBLE.to_le_bytes()),
        (DataType::Timestamp, Value::Timestamp(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (DataType::Timestamp, Value::Null) => out.copy_from_slice(&NULL_TIMESTAMP.to_le_bytes()),
        (DataType::Varchar, _) => {
            return Err(DbError::Internal(
                "varchar cells are encoded through the string heap".to_string(),
            ));
        }
        (t, v) => {
            return Err(DbError::Internal(format!(
                "cannot store {:?} in a {:?} column",
                v, t
            )));
        }
    }
    Ok(())
}

/// Encode a string-heap handle into a VARCHAR cell.
pub fn encode_handle(handle: StringHandle, out: &mut [u8]) {
    debug_assert_eq!(out.len(), 8);
    out.copy_from_slice(&handle.to_le_bytes());
}

/// Decode a VARCHAR cell back into its heap handle.
pub fn decode_handle(bytes: &[u8]) -> StringHandle {
    StringHandle::from_le_bytes(bytes.try_into().unwrap_or([0u8; 8]))
}

/// Decode a non-VARCHAR cell, mapping the sentinel back to NULL.
pub fn decode_fixed(data_type: DataType, bytes: &[u8]) -> Value {
    debug_assert_eq!(bytes.len(), data_type.width());
    match data_type {
        DataType::Boolean => {
            let v = bytes[0] as i8;
            if v == NULL_BOOLEAN {
                Value::Null
            } else {
                Value::Boolean(v != 0)
            }
        }
        DataType::Integer => {
            let v = i32::from_le_bytes(bytes.try_into().unwrap_or([0u8; 4]));
            if v == NULL_INTEGER {
                Value::Null
            } else {
                Value::Integer(v)
            }
        }
        DataType::BigInt => {
            let v = i64::from_le_bytes(bytes.try_into().unwrap_or([0u8; 8]));
            if v == NULL_BIGINT {
                Value::Null
            } else {
                Value::BigInt(v)
            }
        }
        DataType::Double => {
            let v = f64::from_le_bytes(bytes.try_into().unwrap_or([0u8; 8]));
            if v == NULL_DOUBLE {
                Value::Null
            } else {
                Value::Double(v)
            }
        }
        DataType::Timestamp => {
            let v = i64::from_le_bytes(bytes.try_into().unwrap_or([0u8; 8]));
            if v == NULL_TIMESTAMP {
                Value::Null
            } else {
                Value::Timestamp(v)
            }
        }
        DataType::Varchar => {
            // Handle cells must be resolved against the owning chunk's heap.
            debug_assert!(false, "varchar cells are decoded through the string heap");
            Value::Null
        }
    }
}
