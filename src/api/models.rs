use crate::models::AggregatedRecord;
use crate::snapshot::{Snapshot, SnapshotStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response for GET /api/funding
#[derive(Serialize)]
pub struct FundingResponse<'a> {
    pub generated_at: Option<DateTime<Utc>>,
    pub count: usize,
    pub status: SnapshotStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub error: Option<&'a str>,
    pub reference_exchange: &'a str,
    pub exchanges: &'a [String],
    pub records: &'a [AggregatedRecord],
}

impl<'a> FundingResponse<'a> {
    pub fn new(snapshot: &'a Snapshot, reference_exchange: &'a str) -> Self {
        Self {
            generated_at: snapshot.generated_at,
            count: snapshot.len(),
            status: snapshot.status,
            last_success: snapshot.last_success,
            error: snapshot.error.as_deref(),
            reference_exchange,
            exchanges: &snapshot.exchanges,
            records: &snapshot.records,
        }
    }
}

/// Body of POST /api/funding/push
#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    /// Column order; derived from the records when omitted.
    #[serde(default)]
    pub exchanges: Option<Vec<String>>,
    pub records: Vec<AggregatedRecord>,
}

/// Response for POST /api/funding/push
#[derive(Serialize)]
pub struct PushResponse {
    pub status: SnapshotStatus,
    pub count: usize,
}
