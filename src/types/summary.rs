use serde::{Deserialize, Serialize};

/// What the loader did, surfaced to the report so partial coverage is
/// always disclosed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub files_attempted: usize,
    pub files_succeeded: usize,
    pub files_skipped: usize,
    pub rows_read: usize,
    /// Malformed rows dropped under the lenient row policy.
    pub rows_skipped: usize,
    /// Set when the sample cap or file limit cut loading short, or when
    /// bad files were skipped.
    pub truncated: bool,
    pub streaming: bool,
    pub cache_hits: usize,
}

impl LoadSummary {
    pub fn is_empty(&self) -> bool {
        self.rows_read == 0
    }
}
