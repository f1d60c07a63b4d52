use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::session::Session;
use crate::db::usage::UsageStore;
use crate::models::usage::{GenerationLimit, GenerationLimits, MonthPeriod};
use crate::services::subscription::SubscriptionService;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Locally cached counter for one `(user, month)`.
#[derive(Default)]
struct UsageCache {
    key: Option<(Uuid, MonthPeriod)>,
    count: i64,
    applied_seq: u64,
}

impl UsageCache {
    fn count_for(&self, user_id: Uuid, month: &MonthPeriod) -> i64 {
        match &self.key {
            Some((cached_user, cached_month)) if *cached_user == user_id && cached_month == month => {
                self.count
            }
            _ => 0,
        }
    }
}

/// Enforces the monthly AI-generation quota for the signed-in user.
pub struct GenerationUsageTracker {
    store: Arc<dyn UsageStore>,
    subscription: Arc<SubscriptionService>,
    session: Arc<Session>,
    clock: Arc<dyn Clock>,
    free_quota: i64,
    cache: RwLock<UsageCache>,
    next_seq: AtomicU64,
}

impl GenerationUsageTracker {
    pub fn new(
        store: Arc<dyn UsageStore>,
        subscription: Arc<SubscriptionService>,
        session: Arc<Session>,
        free_quota: i64,
    ) -> Self {
        Self::with_clock(store, subscription, session, free_quota, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn UsageStore>,
        subscription: Arc<SubscriptionService>,
        session: Arc<Session>,
        free_quota: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            subscription,
            session,
            clock,
            free_quota,
            cache: RwLock::new(UsageCache::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn current_month(&self) -> MonthPeriod {
        MonthPeriod::from_datetime(self.clock.now())
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn limits(&self) -> GenerationLimits {
        let month = self.current_month();
        let subscription = self.subscription.snapshot().await;
        let count = match self.session.current() {
            Some(user) => self.cache.read().await.count_for(user.id, &month),
            None => 0,
        };
        GenerationLimits::compute(month, count, &subscription, self.free_quota)
    }

    pub async fn refresh_usage(&self) {
        let Some(user) = self.session.current() else {
            return;
        };
        let month = self.current_month();
        let seq = self.take_seq();

        match self.store.find(user.id, &month).await {
            Ok(record) => {
                let count = record.map(|r| r.generation_count).unwrap_or(0);
                let mut cache = self.cache.write().await;
                if seq < cache.applied_seq {
                    tracing::debug!(seq = seq, applied = cache.applied_seq, "Discarding stale usage lookup");
                    return;
                }
                cache.key = Some((user.id, month));
                cache.count = count;
                cache.applied_seq = seq;
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, month = %month, error = %e, "Failed to load generation usage");
            }
        }
    }

    /// Records one AI generation. Returns `false` when signed out, over quota,
    /// or when the increment could not be persisted.
    pub async fn record_generation(&self) -> bool {
        let Some(user) = self.session.current() else {
            return false;
        };
        let month = self.current_month();
        let subscription = self.subscription.snapshot().await;
        let limit = GenerationLimit::for_subscription(&subscription, self.free_quota);
        let count = self.cache.read().await.count_for(user.id, &month);

        if !limit.allows(count) {
            tracing::debug!(user_id = %user.id, month = %month, count = count, "Generation quota exhausted");
            return false;
        }

        let issued_before = self.next_seq.load(Ordering::SeqCst);

        match self.store.increment(user.id, &month).await {
            Ok(stored) => {
                let seq = self.take_seq();
                let still_signed_in = self.session.current().is_some_and(|u| u.id == user.id);
                let mut cache = self.cache.write().await;
                if cache.key.as_ref() == Some(&(user.id, month.clone())) {
                    // Increments may complete out of order; the store's count is authoritative.
                    cache.count = cache.count.max(stored);
                } else if still_signed_in && cache.applied_seq <= issued_before {
                    cache.key = Some((user.id, month));
                    cache.count = stored;
                } else {
                    // A newer result for another user or month owns the cache.
                    tracing::debug!(user_id = %user.id, month = %month, "Skipping cache update for superseded generation");
                    return true;
                }
                // Lookups issued before this write are now stale.
                cache.applied_seq = cache.applied_seq.max(seq);
                true
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, month = %month, error = %e, "Failed to record generation");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionUser;
    use crate::error::{AppError, AppResult};
    use crate::models::subscription::{SubscriptionCheckResponse, PROFESSIONAL_TIER};
    use crate::models::usage::GenerationUsageRecord;
    use crate::services::subscription::SubscriptionSource;
    use crate::test_utils::InMemoryUsageStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedSource(SubscriptionCheckResponse);

    #[async_trait]
    impl SubscriptionSource for FixedSource {
        async fn check(&self, _user: &SessionUser) -> AppResult<SubscriptionCheckResponse> {
            Ok(self.0.clone())
        }
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn at(y: i32, m: u32, d: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())))
        }

        fn set(&self, y: i32, m: u32, d: u32) {
            *self.0.lock().unwrap() = Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    /// Store whose every call fails, counting attempts.
    #[derive(Default)]
    struct FailingStore {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl UsageStore for FailingStore {
        async fn find(&self, _: Uuid, _: &MonthPeriod) -> AppResult<Option<GenerationUsageRecord>> {
            *self.calls.lock().unwrap() += 1;
            Err(AppError::Internal(anyhow::anyhow!("connection reset")))
        }

        async fn increment(&self, _: Uuid, _: &MonthPeriod) -> AppResult<i64> {
            *self.calls.lock().unwrap() += 1;
            Err(AppError::Internal(anyhow::anyhow!("connection reset")))
        }

        async fn increment_within(&self, _: Uuid, _: &MonthPeriod, _: i64) -> AppResult<Option<i64>> {
            *self.calls.lock().unwrap() += 1;
            Err(AppError::Internal(anyhow::anyhow!("connection reset")))
        }
    }

    struct Fixture {
        session: Arc<Session>,
        subscription: Arc<SubscriptionService>,
        clock: Arc<ManualClock>,
        user: SessionUser,
    }

    impl Fixture {
        async fn new(response: SubscriptionCheckResponse) -> Self {
            let session = Arc::new(Session::new());
            let user = SessionUser {
                id: Uuid::new_v4(),
                email: None,
                access_token: "token".into(),
            };
            session.sign_in(user.clone());

            let subscription = Arc::new(SubscriptionService::new(Arc::new(FixedSource(response))));
            subscription.refresh(Some(&user)).await;

            Self {
                session,
                subscription,
                clock: ManualClock::at(2024, 1, 15),
                user,
            }
        }

        async fn free() -> Self {
            Self::new(SubscriptionCheckResponse::default()).await
        }

        async fn professional() -> Self {
            Self::new(SubscriptionCheckResponse {
                subscribed: Some(true),
                subscription_tier: Some(PROFESSIONAL_TIER.into()),
                subscription_status: Some("active".into()),
                ..Default::default()
            })
            .await
        }

        fn tracker(&self, store: Arc<dyn UsageStore>) -> GenerationUsageTracker {
            GenerationUsageTracker::with_clock(
                store,
                self.subscription.clone(),
                self.session.clone(),
                5,
                self.clock.clone(),
            )
        }

        fn month(&self) -> MonthPeriod {
            MonthPeriod::from_datetime(self.clock.now())
        }
    }

    #[tokio::test]
    async fn test_refresh_without_record_is_zero() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::new());
        let tracker = fx.tracker(store);

        tracker.refresh_usage().await;
        let limits = tracker.limits().await;
        assert_eq!(limits.count, 0);
        assert!(limits.can_generate);
        assert_eq!(limits.remaining, GenerationLimit::Finite(5));
    }

    #[tokio::test]
    async fn test_record_at_four_reaches_five() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::with_count(fx.user.id, &fx.month(), 4));
        let tracker = fx.tracker(store.clone());
        tracker.refresh_usage().await;

        assert!(tracker.record_generation().await);

        let limits = tracker.limits().await;
        assert_eq!(limits.count, 5);
        assert!(!limits.can_generate);
        assert_eq!(store.count(fx.user.id, &fx.month()), 5);
    }

    #[tokio::test]
    async fn test_record_at_five_is_refused_without_storage() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::with_count(fx.user.id, &fx.month(), 5));
        let tracker = fx.tracker(store.clone());
        tracker.refresh_usage().await;
        let writes_before = store.increments();

        assert!(!tracker.record_generation().await);

        assert_eq!(tracker.limits().await.count, 5);
        assert_eq!(store.count(fx.user.id, &fx.month()), 5);
        assert_eq!(store.increments(), writes_before);
    }

    #[tokio::test]
    async fn test_professional_ignores_quota() {
        let fx = Fixture::professional().await;
        let store = Arc::new(InMemoryUsageStore::with_count(fx.user.id, &fx.month(), 40));
        let tracker = fx.tracker(store.clone());
        tracker.refresh_usage().await;

        assert!(tracker.record_generation().await);

        let limits = tracker.limits().await;
        assert_eq!(limits.count, 41);
        assert!(limits.can_generate);
        assert_eq!(limits.remaining, GenerationLimit::Unlimited);
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_lose_updates() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::new());
        // Two tabs, each with its own tracker over the same store.
        let tab_a = fx.tracker(store.clone());
        let tab_b = fx.tracker(store.clone());
        tab_a.refresh_usage().await;
        tab_b.refresh_usage().await;

        let (a, b) = tokio::join!(tab_a.record_generation(), tab_b.record_generation());

        assert!(a && b);
        assert_eq!(store.count(fx.user.id, &fx.month()), 2);
    }

    #[tokio::test]
    async fn test_signed_out_is_noop() {
        let fx = Fixture::free().await;
        fx.session.sign_out();
        let store = Arc::new(FailingStore::default());
        let tracker = fx.tracker(store.clone());

        tracker.refresh_usage().await;
        assert!(!tracker.record_generation().await);
        assert_eq!(*store.calls.lock().unwrap(), 0);
        assert_eq!(tracker.limits().await.count, 0);
    }

    #[tokio::test]
    async fn test_store_failures_leave_cache_untouched() {
        let fx = Fixture::free().await;
        let store = Arc::new(FailingStore::default());
        let tracker = fx.tracker(store.clone());

        tracker.refresh_usage().await;
        assert!(!tracker.record_generation().await);
        assert_eq!(tracker.limits().await.count, 0);
        assert_eq!(*store.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_month_rollover_starts_fresh_quota() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::with_count(fx.user.id, &fx.month(), 5));
        let tracker = fx.tracker(store.clone());
        tracker.refresh_usage().await;
        assert!(!tracker.limits().await.can_generate);

        fx.clock.set(2024, 2, 1);
        let limits = tracker.limits().await;
        assert_eq!(limits.month.as_str(), "2024-02");
        assert_eq!(limits.count, 0);

        assert!(tracker.record_generation().await);
        assert_eq!(store.count(fx.user.id, &fx.month()), 1);
        assert_eq!(
            store.count(fx.user.id, &MonthPeriod::parse("2024-01").unwrap()),
            5
        );
    }

    #[tokio::test]
    async fn test_record_before_refresh_adopts_stored_count() {
        let fx = Fixture::free().await;
        let store = Arc::new(InMemoryUsageStore::with_count(fx.user.id, &fx.month(), 2));
        let tracker = fx.tracker(store);

        assert!(tracker.record_generation().await);
        assert_eq!(tracker.limits().await.count, 3);
    }
    /// Holds every increment until released.
    struct GatedStore {
        inner: InMemoryUsageStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl UsageStore for GatedStore {
        async fn find(&self, user_id: Uuid, month: &MonthPeriod) -> AppResult<Option<GenerationUsageRecord>> {
            self.inner.find(user_id, month).await
        }

        async fn increment(&self, user_id: Uuid, month: &MonthPeriod) -> AppResult<i64> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.increment(user_id, month).await
        }

        async fn increment_within(&self, user_id: Uuid, month: &MonthPeriod, limit: i64) -> AppResult<Option<i64>> {
            self.inner.increment_within(user_id, month, limit).await
        }
    }

    #[tokio::test]
    async fn test_late_record_for_previous_user_keeps_new_user_cache() {
        let fx = Fixture::free().await;
        let other = SessionUser {
            id: Uuid::new_v4(),
            email: None,
            access_token: "other-token".into(),
        };
        let store = Arc::new(GatedStore {
            inner: InMemoryUsageStore::with_count(other.id, &fx.month(), 5),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let tracker = fx.tracker(store.clone());
        tracker.refresh_usage().await;

        let (recorded, _) = tokio::join!(tracker.record_generation(), async {
            store.entered.notified().await;
            fx.session.sign_in(other.clone());
            tracker.refresh_usage().await;
            store.release.notify_one();
        });
        assert!(recorded);
        assert_eq!(store.inner.count(fx.user.id, &fx.month()), 1);

        let limits = tracker.limits().await;
        assert_eq!(limits.count, 5);
        assert!(!limits.can_generate);

        assert!(!tracker.record_generation().await);
        assert_eq!(store.inner.count(other.id, &fx.month()), 5);
    }
}
