use axum::{extract::State, Extension, Json};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::subscription::{SubscriptionCheckResponse, SubscriptionState};
use crate::models::usage::{GenerationLimit, GenerationLimits, MonthPeriod};
use crate::AppState;

async fn load_subscription(state: &AppState, user_id: Uuid) -> AppResult<SubscriptionState> {
    Ok(state
        .subscribers
        .find(user_id)
        .await?
        .map(|s| SubscriptionState::from(SubscriptionCheckResponse::from(s)))
        .unwrap_or_default())
}

pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<GenerationLimits>> {
    let month = MonthPeriod::current();
    let subscription = load_subscription(&state, auth_user.id).await?;
    let count = state
        .usage
        .find(auth_user.id, &month)
        .await?
        .map(|r| r.generation_count)
        .unwrap_or(0);

    Ok(Json(GenerationLimits::compute(
        month,
        count,
        &subscription,
        state.config.free_generations_per_month,
    )))
}

/// Counts one AI generation against the caller's monthly quota.
pub async fn record_generation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<GenerationLimits>> {
    let month = MonthPeriod::current();
    let subscription = load_subscription(&state, auth_user.id).await?;
    let free_quota = state.config.free_generations_per_month;

    let count = match GenerationLimit::for_subscription(&subscription, free_quota) {
        GenerationLimit::Unlimited => Some(state.usage.increment(auth_user.id, &month).await?),
        GenerationLimit::Finite(max) => {
            state
                .usage
                .increment_within(auth_user.id, &month, max)
                .await?
        }
    };

    let Some(count) = count else {
        tracing::info!(user_id = %auth_user.id, month = %month, "Generation quota exhausted");
        return Err(AppError::QuotaExhausted);
    };

    tracing::debug!(user_id = %auth_user.id, month = %month, count = count, "Generation recorded");

    Ok(Json(GenerationLimits::compute(
        month,
        count,
        &subscription,
        free_quota,
    )))
}
