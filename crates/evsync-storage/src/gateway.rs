use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use evsync_core::{BatchCounts, BatchFailure, ErrorDetail, NormalizedEventRow, UpsertReport};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const UPSERT_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct StoreError {
    pub detail: ErrorDetail,
}

impl StoreError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            detail: ErrorDetail {
                message: message.into(),
                ..Default::default()
            },
        }
    }
}

/// Storage seam used by the gateway and the orchestrator.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn user_exists(&self, user_id: Uuid) -> Result<bool, StoreError>;

    async fn business_owner(&self, business_id: Uuid) -> Result<Option<Uuid>, StoreError>;

    /// Idempotent merge of one batch. Must be atomic per call.
    async fn merge_batch(&self, rows: &[NormalizedEventRow]) -> Result<BatchCounts, StoreError>;

    /// Deletes rows tagged with `source` whose end timestamp is strictly before `cutoff`.
    async fn delete_ended_before(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn EventStore>,
    source: String,
    batch_size: usize,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn EventStore>, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
            batch_size: UPSERT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Merges rows batch by batch. A failed batch is recorded and the remaining
    /// batches are still attempted.
    pub async fn upsert(&self, rows: &[NormalizedEventRow]) -> UpsertReport {
        let mut report = UpsertReport::default();
        let total_batches = rows.len().div_ceil(self.batch_size);

        for (batch_index, batch) in rows.chunks(self.batch_size).enumerate() {
            match self.store.merge_batch(batch).await {
                Ok(counts) => {
                    info!(
                        batch = batch_index + 1,
                        total_batches,
                        rows = batch.len(),
                        inserted = counts.inserted,
                        updated = counts.updated,
                        "batch upserted"
                    );
                    report.record_success(counts);
                }
                Err(err) => {
                    warn!(
                        batch = batch_index + 1,
                        total_batches,
                        rows = batch.len(),
                        message = err.detail.message.as_str(),
                        code = err.detail.code.as_deref().unwrap_or_default(),
                        details = err.detail.details.as_deref().unwrap_or_default(),
                        hint = err.detail.hint.as_deref().unwrap_or_default(),
                        "batch upsert failed"
                    );
                    report.record_failure(BatchFailure {
                        batch_index,
                        row_count: batch.len(),
                        error: err.detail,
                    });
                }
            }
        }

        report
    }

    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, StoreError> {
        self.cleanup_at(Utc::now(), retention_days).await
    }

    pub async fn cleanup_at(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<u64, StoreError> {
        let cutoff = now - ChronoDuration::days(i64::from(retention_days));
        let deleted = self.store.delete_ended_before(&self.source, cutoff).await?;
        info!(
            source = self.source.as_str(),
            %cutoff,
            deleted,
            "stale events cleaned up"
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use evsync_core::{DedupeKey, DEFAULT_RATING, EVENT_TYPE, PRICE_PLACEHOLDER, SOURCE_TAG};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<DedupeKey, NormalizedEventRow>>,
        calls: Mutex<Vec<usize>>,
        fail_call: Option<usize>,
        last_cutoff: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl EventStore for MemoryStore {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn user_exists(&self, _user_id: Uuid) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn business_owner(&self, _business_id: Uuid) -> Result<Option<Uuid>, StoreError> {
            Ok(None)
        }

        async fn merge_batch(
            &self,
            rows: &[NormalizedEventRow],
        ) -> Result<BatchCounts, StoreError> {
            let mut calls = self.calls.lock().await;
            let call_index = calls.len();
            calls.push(rows.len());
            if self.fail_call == Some(call_index) {
                return Err(StoreError {
                    detail: ErrorDetail {
                        message: "value too long for type character varying(255)".into(),
                        code: Some("22001".into()),
                        details: None,
                        hint: None,
                    },
                });
            }

            let mut stored = self.rows.lock().await;
            let mut counts = BatchCounts::default();
            for row in rows {
                match stored.get_mut(&row.dedupe_key()) {
                    None => {
                        stored.insert(row.dedupe_key(), row.clone());
                        counts.inserted += 1;
                    }
                    Some(existing) if existing.business_id == row.business_id => {
                        existing.start_date = existing.start_date.min(row.start_date);
                        existing.end_date = existing.end_date.max(row.end_date);
                        counts.updated += 1;
                    }
                    Some(_) => {}
                }
            }
            Ok(counts)
        }

        async fn delete_ended_before(
            &self,
            source: &str,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            *self.last_cutoff.lock().await = Some(cutoff);
            let mut stored = self.rows.lock().await;
            let before = stored.len();
            stored.retain(|_, row| {
                row.source != source || row.end_date.map_or(true, |end| end >= cutoff)
            });
            Ok((before - stored.len()) as u64)
        }
    }

    fn row(index: usize, business_id: Uuid) -> NormalizedEventRow {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).single().unwrap();
        NormalizedEventRow {
            title: format!("Show {index}"),
            event_type: EVENT_TYPE.into(),
            business_id,
            created_by: Uuid::nil(),
            start_date: start,
            end_date: Some(start),
            location: Some("Hall".into()),
            description: None,
            source: SOURCE_TAG.into(),
            image_url: None,
            price: PRICE_PLACEHOLDER.into(),
            rating: DEFAULT_RATING,
            booking_url: None,
            booking_contact: None,
        }
    }

    fn rows(n: usize) -> Vec<NormalizedEventRow> {
        (0..n).map(|i| row(i, Uuid::nil())).collect()
    }

    #[tokio::test]
    async fn rows_are_split_into_fixed_size_batches() {
        let store = Arc::new(MemoryStore::default());
        let gateway = PersistenceGateway::new(store.clone(), SOURCE_TAG);
        let report = gateway.upsert(&rows(450)).await;

        assert_eq!(*store.calls.lock().await, vec![200, 200, 50]);
        assert_eq!(report.inserted, 450);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn failed_middle_batch_does_not_stop_later_batches() {
        let store = Arc::new(MemoryStore {
            fail_call: Some(1),
            ..Default::default()
        });
        let gateway = PersistenceGateway::new(store.clone(), SOURCE_TAG).with_batch_size(2);
        let report = gateway.upsert(&rows(6)).await;

        assert_eq!(store.calls.lock().await.len(), 3);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.batch_index, 1);
        assert_eq!(failure.row_count, 2);
        assert_eq!(failure.error.code.as_deref(), Some("22001"));
    }

    #[tokio::test]
    async fn repeated_upsert_inserts_nothing_new() {
        let store = Arc::new(MemoryStore::default());
        let gateway = PersistenceGateway::new(store, SOURCE_TAG);
        let batch = rows(3);

        let first = gateway.upsert(&batch).await;
        let second = gateway.upsert(&batch).await;
        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 3);
    }

    #[tokio::test]
    async fn rows_owned_by_another_business_are_left_alone() {
        let store = Arc::new(MemoryStore::default());
        let gateway = PersistenceGateway::new(store, SOURCE_TAG);
        gateway.upsert(&[row(1, Uuid::nil())]).await;

        let report = gateway.upsert(&[row(1, Uuid::new_v4())]).await;
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 0);
    }

    #[tokio::test]
    async fn cleanup_uses_retention_cutoff_and_keeps_boundary_rows() {
        let store = Arc::new(MemoryStore::default());
        let gateway = PersistenceGateway::new(store.clone(), SOURCE_TAG);
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).single().unwrap();
        let cutoff = now - ChronoDuration::days(7);

        let mut at_cutoff = row(1, Uuid::nil());
        at_cutoff.end_date = Some(cutoff);
        let mut expired = row(2, Uuid::nil());
        expired.end_date = Some(cutoff - ChronoDuration::seconds(1));
        let mut foreign = row(3, Uuid::nil());
        foreign.source = "manual".into();
        foreign.end_date = Some(cutoff - ChronoDuration::days(30));
        gateway.upsert(&[at_cutoff, expired, foreign]).await;

        let deleted = gateway.cleanup_at(now, 7).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(*store.last_cutoff.lock().await, Some(cutoff));
        assert_eq!(store.rows.lock().await.len(), 2);
    }
}
