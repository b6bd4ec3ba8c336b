use serde::Serialize;

/// Aggregate result of a bulk operation.
///
/// Skips cover rows already in the requested state, rows that no longer exist
/// and rows rejected by per-row validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub requested: u64,
    pub succeeded: u64,
    pub skipped: u64,
}

impl BulkOutcome {
    pub fn new(requested: u64, succeeded: u64) -> Self {
        Self {
            requested,
            succeeded,
            skipped: requested.saturating_sub(succeeded),
        }
    }
}

/// Whether a batch with invalid rows is applied partially or rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchMode {
    #[default]
    Partial,
    AllOrNothing,
}
