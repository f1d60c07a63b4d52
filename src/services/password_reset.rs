use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::reset_codes::ResetCodeStore;
use crate::error::{AppError, AppResult};
use crate::services::auth_admin::PasswordAdmin;
use crate::services::email::{reset_code_email, EmailSender};

const INVALID_CODE: &str = "Invalid or expired reset code";

/// Six random digits, zero-padded.
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Codes are stored hashed and bound to the user they were issued for.
pub fn hash_code(user_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .as_bytes()
            .iter()
            .zip(b.as_bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

pub struct PasswordResetService {
    store: Arc<dyn ResetCodeStore>,
    email: Arc<dyn EmailSender>,
    passwords: Arc<dyn PasswordAdmin>,
    code_ttl: Duration,
    max_attempts: i32,
}

impl PasswordResetService {
    pub fn new(
        store: Arc<dyn ResetCodeStore>,
        email: Arc<dyn EmailSender>,
        passwords: Arc<dyn PasswordAdmin>,
        code_ttl_secs: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            email,
            passwords,
            code_ttl: Duration::seconds(code_ttl_secs),
            max_attempts,
        }
    }

    /// Issues and mails a fresh code. Unknown addresses succeed silently.
    pub async fn request(&self, email: &str) -> AppResult<()> {
        let Some(user_id) = self.store.find_user_id_by_email(email).await? else {
            tracing::info!("Password reset requested for unknown email");
            return Ok(());
        };

        let code = generate_code();
        let expires_at = Utc::now() + self.code_ttl;
        self.store
            .replace_code(user_id, &hash_code(user_id, &code), expires_at)
            .await?;

        let (subject, html) = reset_code_email(&code, self.code_ttl.num_minutes().max(1));
        // Callers get the same answer whether or not the address has an account.
        if let Err(e) = self.email.send(email, &subject, &html).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to send password reset email");
            return Ok(());
        }

        tracing::info!(user_id = %user_id, "Password reset code issued");
        Ok(())
    }

    pub async fn confirm(&self, email: &str, code: &str, new_password: &str) -> AppResult<()> {
        let user_id = self
            .store
            .find_user_id_by_email(email)
            .await?
            .ok_or_else(|| AppError::Validation(INVALID_CODE.into()))?;

        let stored = self
            .store
            .latest_unused(user_id)
            .await?
            .filter(|c| c.is_usable(Utc::now(), self.max_attempts))
            .ok_or_else(|| AppError::Validation(INVALID_CODE.into()))?;

        if !constant_time_eq(&stored.code_hash, &hash_code(user_id, code)) {
            self.store.record_failed_attempt(stored.id).await?;
            tracing::warn!(user_id = %user_id, attempts = stored.attempts + 1, "Wrong password reset code");
            return Err(AppError::Validation(INVALID_CODE.into()));
        }

        if !self.store.consume(stored.id).await? {
            return Err(AppError::Validation(INVALID_CODE.into()));
        }

        self.passwords.set_password(user_id, new_password).await?;

        tracing::info!(user_id = %user_id, "Password reset completed");
        Ok(())
    }
}
