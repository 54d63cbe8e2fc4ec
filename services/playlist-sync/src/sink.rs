//!
//! src/sink.rs
//!
//! Destinations that receive the new-track set. Stores can also be read
//! back, which is what makes them usable as a dedup reference
//!

use crate::errors::SyncError;
use crate::types::TrackRecord;

/// Append-only record store (ledger file, spreadsheet)
pub trait TrackStore {
    fn label(&self) -> &str;

    fn read_all(&self) -> Result<Vec<TrackRecord>, SyncError>;

    /// Returns the number of rows written
    fn append(&self, records: &[TrackRecord]) -> Result<usize, SyncError>;
}

/// Write-only destination (the output playlist)
pub trait TrackSink {
    fn label(&self) -> &str;

    fn deliver(&self, records: &[TrackRecord]) -> Result<usize, SyncError>;
}

/// Result of one sink stage of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Pending,
    Skipped,
    Written(usize),
    Failed(String)
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}
