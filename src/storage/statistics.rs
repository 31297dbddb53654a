use serde::{Deserialize, Serialize};

use crate::types::Value;
use crate::vector::Vector;

/// Per-column running min/max/has-null summary.
///
/// Updated under the append latch (Append) or the chunk lock (Update), so
/// values are consistent with the base data at the point of update. Reads
/// are advisory for planning and may observe stale values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub has_null: bool,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl ColumnStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one value into the summary.
    pub fn update_value(&mut self, value: &Value) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        match &self.min {
            Some(min) if value >= min => {}
            _ => self.min = Some(value.clone()),
        }
        match &self.max {
            Some(max) if value <= max => {}
            _ => self.max = Some(value.clone()),
        }
    }

    /// Folds a whole vector into the summary.
    pub fn update_vector(&mut self, vector: &Vector) {
        for value in &vector.values {
            self.update_value(value);
        }
    }
}
