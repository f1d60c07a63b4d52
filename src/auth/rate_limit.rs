use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::AppState;

/// Password-reset endpoints: attempts per IP and path per window.
const RESET_MAX_REQUESTS: u32 = 5;
const RESET_WINDOW_SECS: u64 = 900;

/// Outbound email relay: sends per IP per window.
const EMAIL_MAX_REQUESTS: u32 = 3;
const EMAIL_WINDOW_SECS: u64 = 3600;

/// In-memory rate limit state (for single-instance deployments)
#[derive(Clone, Default)]
pub struct RateLimitState {
    entries: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the requests left in the window, or how long until it resets.
    pub async fn check_with_limits(
        &self,
        key: &str,
        max_requests: u32,
        window_secs: u64,
    ) -> Result<u32, Duration> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);

        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= max_requests {
            let retry_after = window.saturating_sub(now.duration_since(entry.window_start));
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(max_requests - entry.count)
    }

    /// Drops entries whose window ended long ago.
    pub async fn cleanup(&self) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let keep_for = Duration::from_secs(RESET_WINDOW_SECS.max(EMAIL_WINDOW_SECS) * 2);

        entries.retain(|_, entry| now.duration_since(entry.window_start) < keep_for);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

pub fn spawn_cleanup_worker(limiter: RateLimitState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            limiter.cleanup().await;
            let entries = limiter.len().await;
            tracing::debug!(entries = entries, "Rate limiter cleanup");
        }
    })
}

async fn enforce(
    state: &AppState,
    key: String,
    max_requests: u32,
    window_secs: u64,
) -> Result<(), AppError> {
    match state
        .rate_limiter
        .check_with_limits(&key, max_requests, window_secs)
        .await
    {
        Ok(remaining) => {
            tracing::debug!(key = %key, remaining = remaining, "Rate limit check passed");
            Ok(())
        }
        Err(retry_after) => {
            tracing::warn!(
                key = %key,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(AppError::RateLimited)
        }
    }
}

/// Rate limiting middleware for the password-reset endpoints
pub async fn rate_limit_reset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("reset:{}:{}", addr.ip(), req.uri().path());
    enforce(&state, key, RESET_MAX_REQUESTS, RESET_WINDOW_SECS).await?;
    Ok(next.run(req).await)
}

/// Stricter limit for the function that sends arbitrary reset-code mail
pub async fn rate_limit_email(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("email:{}", addr.ip());
    enforce(&state, key, EMAIL_MAX_REQUESTS, EMAIL_WINDOW_SECS).await?;
    Ok(next.run(req).await)
}
