use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One row of a metric time series, immutable once read.
///
/// Extra CSV columns that are not part of the minimal schema are carried
/// along verbatim in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub series_id: String,
    /// Epoch seconds.
    pub timestamp: i64,
    pub value: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Name of the CSV file this row came from.
    pub source_file: String,
}
