use super::{Snapshot, SnapshotStatus};
use crate::models::AggregatedRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the currently published snapshot. Writers swap in a whole new
/// `Arc<Snapshot>`; readers clone the `Arc` and never see a partial write.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new(exchanges: Vec<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(Snapshot::initializing(exchanges)))),
        }
    }

    /// The latest published snapshot. Never waits on a refresh cycle.
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.read().clone()
    }

    /// Replaces records and timestamps wholesale and marks the snapshot updated.
    pub fn publish(
        &self,
        records: Vec<AggregatedRecord>,
        exchanges: Vec<String>,
        generated_at: DateTime<Utc>,
    ) {
        let next = Snapshot {
            generated_at: Some(generated_at),
            records: Arc::new(records),
            exchanges,
            status: SnapshotStatus::Updated,
            last_success: Some(Utc::now()),
            error: None,
        };
        *self.inner.write() = Arc::new(next);
    }

    /// Keeps the previous records and success timestamp.
    pub fn mark_empty(&self) {
        self.transition(SnapshotStatus::Empty, None);
    }

    /// Keeps the previous records and success timestamp.
    pub fn mark_error(&self, detail: String) {
        self.transition(SnapshotStatus::Error, Some(detail));
    }

    fn transition(&self, status: SnapshotStatus, error: Option<String>) {
        let mut guard = self.inner.write();
        let next = Snapshot {
            status,
            error,
            ..(**guard).clone()
        };
        *guard = Arc::new(next);
    }
}
