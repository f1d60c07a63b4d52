use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::models::subscription::SubscriptionState;

/// Generations a non-Professional user gets per calendar month.
pub const FREE_GENERATIONS_PER_MONTH: i64 = 5;

/// Calendar year-month (`"2024-01"`) used as the quota reset boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthPeriod(String);

impl MonthPeriod {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y-%m").to_string())
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Accepts `YYYY-MM` only.
    pub fn parse(value: &str) -> Option<Self> {
        NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
            .ok()
            .filter(|_| value.len() == 7)
            .map(|_| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonthPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationUsageRecord {
    pub user_id: Uuid,
    pub month_year: String,
    pub generation_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationLimit {
    Finite(i64),
    Unlimited,
}

impl GenerationLimit {
    pub fn for_subscription(subscription: &SubscriptionState, free_quota: i64) -> Self {
        if subscription.is_professional() {
            Self::Unlimited
        } else {
            Self::Finite(free_quota)
        }
    }

    pub fn allows(&self, used: i64) -> bool {
        match self {
            Self::Finite(max) => used < *max,
            Self::Unlimited => true,
        }
    }

    pub fn remaining(&self, used: i64) -> Self {
        match self {
            Self::Finite(max) => Self::Finite((max - used).max(0)),
            Self::Unlimited => Self::Unlimited,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

/// Read-only view of a user's quota for one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationLimits {
    pub month: MonthPeriod,
    pub count: i64,
    pub max_generations: GenerationLimit,
    pub remaining: GenerationLimit,
    pub can_generate: bool,
}

impl GenerationLimits {
    pub fn compute(
        month: MonthPeriod,
        count: i64,
        subscription: &SubscriptionState,
        free_quota: i64,
    ) -> Self {
        let max_generations = GenerationLimit::for_subscription(subscription, free_quota);
        Self {
            month,
            count,
            max_generations,
            remaining: max_generations.remaining(count),
            can_generate: max_generations.allows(count),
        }
    }
}
