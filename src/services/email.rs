use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Validity stated by the `send-reset-code` function, which never sees the code's real expiry.
pub const RESET_CODE_VALID_MINUTES: i64 = 30;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()>;
}

pub struct ResendEmailSender {
    client: Client,
    base_url: String,
    api_key: SecretString,
    from: String,
}

impl ResendEmailSender {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            from: from.into(),
        }
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let body = ResendRequest {
            from: &self.from,
            to: [to],
            subject,
            html,
        };
        self.client
            .post(format!("{}/emails", self.base_url.trim_end_matches('/')))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Email send failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Email provider rejected message: {}", e)))?;

        tracing::info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

/// Subject and HTML body of the password-reset email.
pub fn reset_code_email(code: &str, valid_minutes: i64) -> (String, String) {
    let subject = "Your InvoiceAI password reset code".to_string();
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 480px; margin: 0 auto;">
  <h2 style="color: #111827;">Reset your password</h2>
  <p>Use the code below to reset your InvoiceAI password:</p>
  <p style="font-size: 32px; font-weight: bold; letter-spacing: 8px; color: #4f46e5;">{code}</p>
  <p>This code is valid for {minutes} minutes.</p>
  <p style="color: #6b7280; font-size: 12px;">If you did not request a password reset, you can ignore this email.</p>
</div>"#,
        code = html_escape(code),
        minutes = valid_minutes,
    );
    (subject, html)
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
