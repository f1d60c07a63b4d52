//! In-memory implementations of the storage and outbound ports, for tests.

use async_trait::async_trait;
use axum::extract::connect_info::MockConnectInfo;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::auth::rate_limit::RateLimitState;
use crate::config::Config;
use crate::db::reset_codes::ResetCodeStore;
use crate::db::subscribers::{CheckoutActivation, SubscriberStore, SubscriptionUpdate};
use crate::db::usage::UsageStore;
use crate::error::{AppError, AppResult};
use crate::models::password_reset::PasswordResetCode;
use crate::models::subscription::{Subscriber, SubscriptionStatus, PROFESSIONAL_TIER};
use crate::models::usage::{GenerationUsageRecord, MonthPeriod};
use crate::services::auth_admin::PasswordAdmin;
use crate::services::email::EmailSender;
use crate::services::password_reset::PasswordResetService;
use crate::AppState;

// ============================================================================
// InMemoryUsageStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryUsageStore {
    counts: Mutex<HashMap<(Uuid, String), i64>>,
    increments: Mutex<u32>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(user_id: Uuid, month: &MonthPeriod, count: i64) -> Self {
        let store = Self::default();
        store
            .counts
            .lock()
            .unwrap()
            .insert((user_id, month.to_string()), count);
        store
    }

    pub fn count(&self, user_id: Uuid, month: &MonthPeriod) -> i64 {
        self.counts
            .lock()
            .unwrap()
            .get(&(user_id, month.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn increments(&self) -> u32 {
        *self.increments.lock().unwrap()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn find(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
    ) -> AppResult<Option<GenerationUsageRecord>> {
        Ok(self
            .counts
            .lock()
            .unwrap()
            .get(&(user_id, month.to_string()))
            .map(|count| GenerationUsageRecord {
                user_id,
                month_year: month.to_string(),
                generation_count: *count,
                updated_at: Utc::now(),
            }))
    }

    async fn increment(&self, user_id: Uuid, month: &MonthPeriod) -> AppResult<i64> {
        // Give a concurrent caller the chance to interleave.
        tokio::task::yield_now().await;
        *self.increments.lock().unwrap() += 1;
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry((user_id, month.to_string())).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn increment_within(
        &self,
        user_id: Uuid,
        month: &MonthPeriod,
        limit: i64,
    ) -> AppResult<Option<i64>> {
        tokio::task::yield_now().await;
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry((user_id, month.to_string())).or_insert(0);
        if *count >= limit {
            return Ok(None);
        }
        *self.increments.lock().unwrap() += 1;
        *count += 1;
        Ok(Some(*count))
    }
}

// ============================================================================
// InMemorySubscriberStore
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriberStore {
    pub subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    pub events: Mutex<HashSet<String>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_professional(&self, user_id: Uuid, stripe_customer_id: &str) {
        self.subscribers.lock().unwrap().insert(
            user_id,
            Subscriber {
                user_id,
                email: None,
                stripe_customer_id: Some(stripe_customer_id.to_string()),
                subscribed: true,
                subscription_tier: Some(PROFESSIONAL_TIER.into()),
                subscription_end: None,
                subscription_status: SubscriptionStatus::Active,
                cancel_at_period_end: false,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, user_id: Uuid) -> Option<Subscriber> {
        self.subscribers.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl SubscriberStore for InMemorySubscriberStore {
    async fn find(&self, user_id: Uuid) -> AppResult<Option<Subscriber>> {
        Ok(self.get(user_id))
    }

    async fn activate(&self, activation: &CheckoutActivation) -> AppResult<()> {
        let mut subscribers = self.subscribers.lock().unwrap();
        let existing = subscribers.remove(&activation.user_id);
        subscribers.insert(
            activation.user_id,
            Subscriber {
                user_id: activation.user_id,
                email: activation
                    .email
                    .clone()
                    .or_else(|| existing.as_ref().and_then(|s| s.email.clone())),
                stripe_customer_id: Some(activation.stripe_customer_id.clone()),
                subscribed: true,
                subscription_tier: Some(activation.tier.clone()),
                subscription_end: activation
                    .period_end
                    .or_else(|| existing.as_ref().and_then(|s| s.subscription_end)),
                subscription_status: SubscriptionStatus::Active,
                cancel_at_period_end: false,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update(&self, update: &SubscriptionUpdate) -> AppResult<u64> {
        let mut touched = 0;
        for s in self.subscribers.lock().unwrap().values_mut() {
            if s.stripe_customer_id.as_deref() == Some(update.stripe_customer_id.as_str()) {
                s.subscription_status = update.status;
                s.subscribed = update.status == SubscriptionStatus::Active && s.subscription_tier.is_some();
                s.subscription_end = update.period_end.or(s.subscription_end);
                s.cancel_at_period_end = update.cancel_at_period_end;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn cancel(&self, stripe_customer_id: &str) -> AppResult<u64> {
        let mut touched = 0;
        for s in self.subscribers.lock().unwrap().values_mut() {
            if s.stripe_customer_id.as_deref() == Some(stripe_customer_id) {
                s.subscribed = false;
                s.subscription_tier = None;
                s.subscription_status = SubscriptionStatus::Canceled;
                s.cancel_at_period_end = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mark_event_processed(&self, event_id: &str, _event_type: &str) -> AppResult<bool> {
        Ok(self.events.lock().unwrap().insert(event_id.to_string()))
    }
}

// ============================================================================
// InMemoryResetCodeStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryResetCodeStore {
    users: Mutex<HashMap<String, Uuid>>,
    codes: Mutex<Vec<PasswordResetCode>>,
}

impl InMemoryResetCodeStore {
    pub fn with_user(user_id: Uuid, email: &str) -> Self {
        let store = Self::default();
        store.users.lock().unwrap().insert(email.to_lowercase(), user_id);
        store
    }
}

#[async_trait]
impl ResetCodeStore for InMemoryResetCodeStore {
    async fn find_user_id_by_email(&self, email: &str) -> AppResult<Option<Uuid>> {
        Ok(self.users.lock().unwrap().get(&email.to_lowercase()).copied())
    }

    async fn replace_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let now = Utc::now();
        let mut codes = self.codes.lock().unwrap();
        for code in codes.iter_mut().filter(|c| c.user_id == user_id && c.used_at.is_none()) {
            code.used_at = Some(now);
        }
        codes.push(PasswordResetCode {
            id: Uuid::new_v4(),
            user_id,
            code_hash: code_hash.to_string(),
            attempts: 0,
            expires_at,
            used_at: None,
            created_at: now,
        });
        Ok(())
    }

    async fn latest_unused(&self, user_id: Uuid) -> AppResult<Option<PasswordResetCode>> {
        Ok(self
            .codes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.user_id == user_id && c.used_at.is_none())
            .cloned())
    }

    async fn record_failed_attempt(&self, code_id: Uuid) -> AppResult<()> {
        if let Some(code) = self.codes.lock().unwrap().iter_mut().find(|c| c.id == code_id) {
            code.attempts += 1;
        }
        Ok(())
    }

    async fn consume(&self, code_id: Uuid) -> AppResult<bool> {
        let mut codes = self.codes.lock().unwrap();
        match codes.iter_mut().find(|c| c.id == code_id && c.used_at.is_none()) {
            Some(code) => {
                code.used_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Outbound ports
// ============================================================================

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl RecordingEmailSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Internal(anyhow::anyhow!("Email provider unavailable")));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPasswordAdmin {
    updates: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingPasswordAdmin {
    pub fn updates(&self) -> Vec<(Uuid, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PasswordAdmin for RecordingPasswordAdmin {
    async fn set_password(&self, user_id: Uuid, new_password: &str) -> AppResult<()> {
        self.updates
            .lock()
            .unwrap()
            .push((user_id, new_password.to_string()));
        Ok(())
    }
}

// ============================================================================
// App state builder
// ============================================================================

pub struct TestApp {
    pub state: AppState,
    pub subscribers: Arc<InMemorySubscriberStore>,
    pub usage: Arc<InMemoryUsageStore>,
    pub email: Arc<RecordingEmailSender>,
    pub passwords: Arc<RecordingPasswordAdmin>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_parts(
            InMemoryResetCodeStore::default(),
            RecordingEmailSender::default(),
        )
    }

    pub fn with_parts(reset_codes: InMemoryResetCodeStore, email: RecordingEmailSender) -> Self {
        let config = Arc::new(Config::for_tests());
        // Never connects unless a handler touches it.
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();

        let subscribers = Arc::new(InMemorySubscriberStore::new());
        let usage = Arc::new(InMemoryUsageStore::new());
        let email = Arc::new(email);
        let passwords = Arc::new(RecordingPasswordAdmin::default());
        let password_resets = Arc::new(PasswordResetService::new(
            Arc::new(reset_codes),
            email.clone(),
            passwords.clone(),
            config.reset_code_ttl_secs,
            config.reset_code_max_attempts,
        ));

        let state = AppState {
            db,
            config,
            rate_limiter: RateLimitState::new(),
            subscribers: subscribers.clone(),
            usage: usage.clone(),
            email: email.clone(),
            password_resets,
        };

        Self {
            state,
            subscribers,
            usage,
            email,
            passwords,
        }
    }

    pub fn router(&self) -> Router {
        crate::router(self.state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40_000))))
    }
}
