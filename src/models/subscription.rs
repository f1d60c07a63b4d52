use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Plan name that lifts the monthly generation quota.
pub const PROFESSIONAL_TIER: &str = "Professional";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Unpaid,
    #[default]
    Inactive,
}

impl SubscriptionStatus {
    /// Maps a billing-provider status string. Anything unrecognized is `Inactive`.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" | "cancelled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "unpaid" => Self::Unpaid,
            _ => Self::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::Unpaid => "unpaid",
            Self::Inactive => "inactive",
        }
    }
}

/// Wire shape of the subscription-status endpoint. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionCheckResponse {
    pub subscribed: Option<bool>,
    pub subscription_tier: Option<String>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub subscription_status: Option<String>,
    pub cancel_at_period_end: Option<bool>,
}

/// The caller's billing entitlement as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SubscriptionState {
    pub subscribed: bool,
    pub tier: Option<String>,
    pub period_end: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
}

impl SubscriptionState {
    pub fn is_professional(&self) -> bool {
        self.subscribed && self.tier.as_deref() == Some(PROFESSIONAL_TIER)
    }
}

impl From<SubscriptionCheckResponse> for SubscriptionState {
    fn from(resp: SubscriptionCheckResponse) -> Self {
        let status = resp
            .subscription_status
            .as_deref()
            .map(SubscriptionStatus::parse)
            .unwrap_or_default();
        let mut subscribed = resp.subscribed.unwrap_or(false);

        // `subscribed` only holds for an active plan with a known tier.
        if subscribed && (resp.subscription_tier.is_none() || status != SubscriptionStatus::Active) {
            tracing::warn!(
                tier = ?resp.subscription_tier,
                status = ?status,
                "Inconsistent subscription response, treating as unsubscribed"
            );
            subscribed = false;
        }

        Self {
            subscribed,
            tier: resp.subscription_tier,
            period_end: resp.subscription_end,
            status,
            cancel_at_period_end: resp.cancel_at_period_end.unwrap_or(false),
        }
    }
}

/// Row of the `subscribers` table, maintained by the Stripe webhook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscriber {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub subscription_status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscriber> for SubscriptionCheckResponse {
    fn from(s: Subscriber) -> Self {
        Self {
            subscribed: Some(s.subscribed),
            subscription_tier: s.subscription_tier,
            subscription_end: s.subscription_end,
            subscription_status: Some(s.subscription_status.as_str().to_string()),
            cancel_at_period_end: Some(s.cancel_at_period_end),
        }
    }
}
