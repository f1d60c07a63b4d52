use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Privileged operations on the hosted auth provider.
#[async_trait]
pub trait PasswordAdmin: Send + Sync {
    async fn set_password(&self, user_id: Uuid, new_password: &str) -> AppResult<()>;
}

pub struct AuthAdminClient {
    client: Client,
    base_url: String,
    service_role_key: SecretString,
}

impl AuthAdminClient {
    pub fn new(base_url: impl Into<String>, service_role_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            service_role_key,
        }
    }
}

#[async_trait]
impl PasswordAdmin for AuthAdminClient {
    async fn set_password(&self, user_id: Uuid, new_password: &str) -> AppResult<()> {
        let key = self.service_role_key.expose_secret();
        self.client
            .put(format!(
                "{}/admin/users/{}",
                self.base_url.trim_end_matches('/'),
                user_id
            ))
            .bearer_auth(key)
            .header("apikey", key)
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Auth admin request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Auth admin rejected password update: {}", e)))?;

        Ok(())
    }
}
