use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::subscription::{Subscriber, SubscriptionStatus};

/// Fields carried by a completed Stripe checkout.
#[derive(Debug, Clone)]
pub struct CheckoutActivation {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub stripe_customer_id: String,
    pub tier: String,
    pub period_end: Option<DateTime<Utc>>,
}

/// Fields carried by `customer.subscription.updated`.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub stripe_customer_id: String,
    pub status: SubscriptionStatus,
    pub period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find(&self, user_id: Uuid) -> AppResult<Option<Subscriber>>;

    async fn activate(&self, activation: &CheckoutActivation) -> AppResult<()>;

    /// Returns the number of rows touched (0 for an unknown customer).
    async fn update(&self, update: &SubscriptionUpdate) -> AppResult<u64>;

    async fn cancel(&self, stripe_customer_id: &str) -> AppResult<u64>;

    /// Records a webhook event id. Returns `false` if it was seen before.
    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> AppResult<bool>;
}

#[derive(Clone)]
pub struct PgSubscriberStore {
    db: PgPool,
}

impl PgSubscriberStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriberStore for PgSubscriberStore {
    async fn find(&self, user_id: Uuid) -> AppResult<Option<Subscriber>> {
        let subscriber = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT user_id, email, stripe_customer_id, subscribed, subscription_tier,
                   subscription_end, subscription_status, cancel_at_period_end, updated_at
            FROM subscribers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(subscriber)
    }

    async fn activate(&self, activation: &CheckoutActivation) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (
                user_id, email, stripe_customer_id, subscribed, subscription_tier,
                subscription_end, subscription_status, cancel_at_period_end
            )
            VALUES ($1, $2, $3, true, $4, $5, 'active', false)
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE($2, subscribers.email),
                stripe_customer_id = $3,
                subscribed = true,
                subscription_tier = $4,
                subscription_end = COALESCE($5, subscribers.subscription_end),
                subscription_status = 'active',
                cancel_at_period_end = false,
                updated_at = NOW()
            "#,
        )
        .bind(activation.user_id)
        .bind(&activation.email)
        .bind(&activation.stripe_customer_id)
        .bind(&activation.tier)
        .bind(activation.period_end)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn update(&self, update: &SubscriptionUpdate) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers SET
                subscription_status = $2,
                subscribed = ($2 = 'active'::subscription_status AND subscription_tier IS NOT NULL),
                subscription_end = COALESCE($3, subscription_end),
                cancel_at_period_end = $4,
                updated_at = NOW()
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(&update.stripe_customer_id)
        .bind(update.status)
        .bind(update.period_end)
        .bind(update.cancel_at_period_end)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cancel(&self, stripe_customer_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers SET
                subscribed = false,
                subscription_tier = NULL,
                subscription_status = 'canceled',
                cancel_at_period_end = false,
                updated_at = NOW()
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(stripe_customer_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO stripe_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
