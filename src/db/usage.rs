use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::usage::{GenerationUsageRecord, MonthPeriod};

/// Per-user, per-month generation counters.
///
/// Increments must be additive on the storage side: two writers racing on
/// the same `(user_id, month)` both land.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn find(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
    ) -> AppResult<Option<GenerationUsageRecord>>;

    /// Creates or bumps the counter by one, returning the stored count.
    async fn increment(&self, user_id: Uuid, month: &MonthPeriod) -> AppResult<i64>;

    /// Like `increment`, but only while the stored count is below `limit`.
    /// Returns `None` when the limit was already reached.
    async fn increment_within(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
        limit: i64,
    ) -> AppResult<Option<i64>>;
}

#[derive(Clone)]
pub struct PgUsageStore {
    db: PgPool,
}

impl PgUsageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn find(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
    ) -> AppResult<Option<GenerationUsageRecord>> {
        let record = sqlx::query_as::<_, GenerationUsageRecord>(
            r#"
            SELECT user_id, month_year, generation_count, updated_at
            FROM generation_usage
            WHERE user_id = $1 AND month_year = $2
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    async fn increment(&self, user_id: Uuid, month: &MonthPeriod) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO generation_usage (user_id, month_year, generation_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, month_year) DO UPDATE SET
                generation_count = generation_usage.generation_count + 1,
                updated_at = NOW()
            RETURNING generation_count
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn increment_within(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
        limit: i64,
    ) -> AppResult<Option<i64>> {
        if limit <= 0 {
            return Ok(None);
        }

        // The conflict branch is skipped when the row is already at the limit,
        // in which case nothing is returned.
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO generation_usage (user_id, month_year, generation_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, month_year) DO UPDATE SET
                generation_count = generation_usage.generation_count + 1,
                updated_at = NOW()
            WHERE generation_usage.generation_count < $3
            RETURNING generation_count
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .bind(limit)
        .fetch_optional(&self.db)
        .await?;

        Ok(count)
    }
}
