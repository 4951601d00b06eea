use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evsync_core::{BatchCounts, DedupeKey, ErrorDetail, NormalizedEventRow};
use serde::Serialize;
use sqlx::postgres::{PgDatabaseError, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::gateway::{EventStore, StoreError};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let detail = match &err {
            sqlx::Error::Database(db) => {
                let pg = db.try_downcast_ref::<PgDatabaseError>();
                ErrorDetail {
                    message: db.message().to_string(),
                    code: db.code().map(|code| code.into_owned()),
                    details: pg.and_then(|e| e.detail()).map(ToString::to_string),
                    hint: pg.and_then(|e| e.hint()).map(ToString::to_string),
                }
            }
            other => ErrorDetail {
                message: other.to_string(),
                ..Default::default()
            },
        };
        Self { detail }
    }
}

/// Wire shape handed to `upsert_ingested_events`: the row plus its natural key.
#[derive(Serialize)]
struct MergeRow<'a> {
    dedupe_key: DedupeKey,
    #[serde(flatten)]
    row: &'a NormalizedEventRow,
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying migrations")
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn business_owner(&self, business_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let owner: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT owner_id FROM businesses WHERE id = $1")
                .bind(business_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(owner.flatten())
    }

    async fn merge_batch(&self, rows: &[NormalizedEventRow]) -> Result<BatchCounts, StoreError> {
        let payload = rows
            .iter()
            .map(|row| MergeRow {
                dedupe_key: row.dedupe_key(),
                row,
            })
            .collect::<Vec<_>>();

        let result = sqlx::query("SELECT inserted, updated FROM upsert_ingested_events($1)")
            .bind(Json(&payload))
            .fetch_one(&self.pool)
            .await?;

        let inserted: i64 = result.try_get("inserted")?;
        let updated: i64 = result.try_get("updated")?;
        Ok(BatchCounts {
            inserted: inserted.max(0) as u64,
            updated: updated.max(0) as u64,
        })
    }

    async fn delete_ended_before(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
             WHERE source = $1
               AND end_date < $2
            "#,
        )
        .bind(source)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
