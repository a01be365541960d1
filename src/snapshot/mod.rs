pub mod store;

use crate::models::AggregatedRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
pub use store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Initializing,
    Updated,
    Empty,
    Error,
}

/// One published aggregation result. Never mutated once published; status
/// changes publish a new `Snapshot` sharing the same records.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generated_at: Option<DateTime<Utc>>,
    pub records: Arc<Vec<AggregatedRecord>>,
    pub exchanges: Vec<String>,
    pub status: SnapshotStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Snapshot {
    pub fn initializing(exchanges: Vec<String>) -> Self {
        Self {
            generated_at: None,
            records: Arc::new(Vec::new()),
            exchanges,
            status: SnapshotStatus::Initializing,
            last_success: None,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
