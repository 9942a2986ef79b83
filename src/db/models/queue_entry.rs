use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AttemptRecord;

/// A queued [`AttemptRecord`] with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Insertion sequence; lower values are delivered first.
    pub seq: i64,
    pub record: AttemptRecord,
    pub attempts_made: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
