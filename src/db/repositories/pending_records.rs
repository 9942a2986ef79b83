use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u32},
    models::{AttemptRecord, QueueEntry},
};

/// Pending entries read in delivery order, plus how many undecodable rows
/// were dropped while reading them.
#[derive(Debug, Default)]
pub struct PendingSnapshot {
    pub entries: Vec<QueueEntry>,
    pub dropped: usize,
}

fn row_to_entry(row: &Row) -> Result<QueueEntry> {
    let payload: String = row.get("payload")?;
    let attempts_made: i64 = row.get("attempts_made")?;
    let next_retry_at: String = row.get("next_retry_at")?;
    let created_at: String = row.get("created_at")?;

    let record: AttemptRecord =
        serde_json::from_str(&payload).context("failed to decode attempt record payload")?;

    Ok(QueueEntry {
        seq: row.get("seq")?,
        record,
        attempts_made: to_u32(attempts_made, "attempts_made")?,
        next_retry_at: parse_datetime(&next_retry_at, "next_retry_at")?,
        last_error: row.get("last_error")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Insert `record` and evict the oldest rows beyond `max_pending`.
/// Returns the number of evicted rows.
fn insert_pending(
    conn: &mut Connection,
    record: &AttemptRecord,
    payload: &str,
    now: DateTime<Utc>,
    max_pending: usize,
) -> Result<usize> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT OR IGNORE INTO pending_records (id, payload, attempts_made, next_retry_at, created_at)
         VALUES (?1, ?2, 0, ?3, ?4)",
        params![record.id, payload, now.to_rfc3339(), now.to_rfc3339()],
    )
    .context("failed to insert pending record")?;

    let evicted = if max_pending > 0 {
        tx.execute(
            "DELETE FROM pending_records
             WHERE seq IN (
                 SELECT seq FROM pending_records
                 ORDER BY seq DESC
                 LIMIT -1 OFFSET ?1
             )",
            params![max_pending as i64],
        )
        .context("failed to evict overflowing pending records")?
    } else {
        0
    };

    tx.commit()?;
    Ok(evicted)
}

impl Database {
    /// Hand `record` to the DB thread immediately and return the pending
    /// reply. Used by the telemetry queue so enqueue order is insert order.
    pub fn submit_pending_record(
        &self,
        record: &AttemptRecord,
        max_pending: usize,
    ) -> Result<oneshot::Receiver<Result<usize>>> {
        let payload = serde_json::to_string(record).context("failed to encode attempt record")?;
        let record = record.clone();
        let now = Utc::now();
        self.submit(move |conn| insert_pending(conn, &record, &payload, now, max_pending))
    }

    pub async fn insert_pending_record(
        &self,
        record: &AttemptRecord,
        max_pending: usize,
    ) -> Result<usize> {
        self.submit_pending_record(record, max_pending)?
            .await
            .map_err(|_| anyhow::anyhow!("database thread terminated unexpectedly"))?
    }

    /// Pending entries in `seq` order. With `due_at`, only entries whose
    /// `next_retry_at` is not after it.
    ///
    /// Every row is read and the due filter runs on the decoded timestamp,
    /// so rows that fail to decode are deleted whether or not they are due.
    pub async fn list_pending_records(
        &self,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<PendingSnapshot> {
        self.execute(move |conn| {
            let mut snapshot = PendingSnapshot::default();
            let mut undecodable = Vec::new();

            {
                let mut stmt = conn.prepare(
                    "SELECT seq, payload, attempts_made, next_retry_at, last_error, created_at
                     FROM pending_records
                     ORDER BY seq ASC",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    match row_to_entry(row) {
                        Ok(entry) => {
                            if due_at.map_or(true, |due| entry.next_retry_at <= due) {
                                snapshot.entries.push(entry);
                            }
                        }
                        Err(err) => {
                            let seq: i64 = row.get("seq")?;
                            warn!("Dropping undecodable pending record {seq}: {err:#}");
                            undecodable.push(seq);
                        }
                    }
                }
            }

            for seq in undecodable {
                conn.execute("DELETE FROM pending_records WHERE seq = ?1", params![seq])?;
                snapshot.dropped += 1;
            }

            Ok(snapshot)
        })
        .await
    }

    pub async fn delete_pending_record(&self, seq: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM pending_records WHERE seq = ?1", params![seq])?;
            Ok(())
        })
        .await
    }

    pub async fn record_delivery_failure(
        &self,
        seq: i64,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let error = error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE pending_records
                 SET attempts_made = attempts_made + 1,
                     last_error = ?1,
                     next_retry_at = ?2
                 WHERE seq = ?3",
                params![error, next_retry_at.to_rfc3339(), seq],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count_pending_records(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_records", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
