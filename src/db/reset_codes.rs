use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::password_reset::PasswordResetCode;

#[async_trait]
pub trait ResetCodeStore: Send + Sync {
    async fn find_user_id_by_email(&self, email: &str) -> AppResult<Option<Uuid>>;

    /// Invalidates any outstanding code for the user and stores a new one.
    async fn replace_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Most recent unused code for the user, expired or not.
    async fn latest_unused(&self, user_id: Uuid) -> AppResult<Option<PasswordResetCode>>;

    async fn record_failed_attempt(&self, code_id: Uuid) -> AppResult<()>;

    /// Marks the code used. Returns `false` if another request consumed it first.
    async fn consume(&self, code_id: Uuid) -> AppResult<bool>;
}

#[derive(Clone)]
pub struct PgResetCodeStore {
    db: PgPool,
}

impl PgResetCodeStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResetCodeStore for PgResetCodeStore {
    async fn find_user_id_by_email(&self, email: &str) -> AppResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM profiles WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(id)
    }

    async fn replace_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE password_reset_codes SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO password_reset_codes (id, user_id, code_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(code_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_unused(&self, user_id: Uuid) -> AppResult<Option<PasswordResetCode>> {
        let code = sqlx::query_as::<_, PasswordResetCode>(
            r#"
            SELECT * FROM password_reset_codes
            WHERE user_id = $1 AND used_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(code)
    }

    async fn record_failed_attempt(&self, code_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE password_reset_codes SET attempts = attempts + 1 WHERE id = $1")
            .bind(code_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn consume(&self, code_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE password_reset_codes SET used_at = NOW() WHERE id = $1 AND used_at IS NULL",
        )
        .bind(code_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
