use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::db::subscribers::{CheckoutActivation, SubscriptionUpdate};
use crate::error::{AppError, AppResult};
use crate::models::subscription::{
    SubscriptionCheckResponse, SubscriptionStatus, PROFESSIONAL_TIER,
};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a Stripe signature timestamp may drift from our clock.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// The subscription-status endpoint. Callers without a subscriber row get
/// the unsubscribed defaults.
pub async fn check_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<SubscriptionCheckResponse>> {
    let response = match state.subscribers.find(auth_user.id).await? {
        Some(subscriber) => subscriber.into(),
        None => SubscriptionCheckResponse {
            subscribed: Some(false),
            subscription_tier: None,
            subscription_end: None,
            subscription_status: Some(SubscriptionStatus::Inactive.as_str().to_string()),
            cancel_at_period_end: Some(false),
        },
    };

    tracing::debug!(
        user_id = %auth_user.id,
        subscribed = ?response.subscribed,
        "Subscription status checked"
    );

    Ok(Json(response))
}

/// Verify Stripe webhook signature.
/// Header format: t=timestamp,v1=signature[,v1=signature...]
fn verify_stripe_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let ts = timestamp
        .ok_or_else(|| AppError::Validation("Missing timestamp in Stripe-Signature".into()))?;

    if signatures.is_empty() {
        return Err(AppError::Validation(
            "Missing v1 signature in Stripe-Signature".into(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid webhook secret")))?;
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let valid = signatures.iter().any(|sig| {
        sig.len() == expected.len()
            && sig
                .as_bytes()
                .iter()
                .zip(expected.as_bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    });

    if !valid {
        return Err(AppError::Validation("Invalid Stripe webhook signature".into()));
    }

    let ts_secs = ts
        .parse::<i64>()
        .map_err(|_| AppError::Validation("Malformed Stripe-Signature timestamp".into()))?;
    if (now - ts_secs).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::Validation(
            "Stripe webhook timestamp outside tolerance".into(),
        ));
    }

    Ok(())
}

fn unix_to_datetime(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_i64()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let secret = state.config.stripe_webhook_secret.expose_secret();
    if secret.is_empty() {
        return Err(AppError::Internal(anyhow::anyhow!(
            "STRIPE_WEBHOOK_SECRET is not configured, refusing unsigned webhook"
        )));
    }

    let sig_header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing Stripe-Signature header".into()))?;
    verify_stripe_signature(&body, sig_header, secret, Utc::now().timestamp())?;

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;

    let event_id = event["id"].as_str().unwrap_or("");
    let event_type = event["type"].as_str().unwrap_or("");

    if !event_id.is_empty() && !state.subscribers.mark_event_processed(event_id, event_type).await? {
        tracing::debug!(event_id = event_id, "Stripe event already processed, skipping");
        return Ok(Json(serde_json::json!({ "received": true, "duplicate": true })));
    }

    tracing::info!(event_type = event_type, event_id = event_id, "Stripe webhook received");

    let object = &event["data"]["object"];
    let customer_id = object["customer"].as_str().unwrap_or("").to_string();

    match event_type {
        "checkout.session.completed" => {
            let user_id = object["client_reference_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok());

            let Some(user_id) = user_id else {
                tracing::warn!(event_id = event_id, "Checkout session without a user reference");
                return Ok(Json(serde_json::json!({ "received": true })));
            };

            let email = object["customer_details"]["email"]
                .as_str()
                .or_else(|| object["customer_email"].as_str())
                .map(str::to_string);

            let tier = object["metadata"]["tier"]
                .as_str()
                .filter(|t| !t.is_empty())
                .unwrap_or(PROFESSIONAL_TIER)
                .to_string();

            state
                .subscribers
                .activate(&CheckoutActivation {
                    user_id,
                    email,
                    stripe_customer_id: customer_id,
                    tier,
                    period_end: None,
                })
                .await?;
        }
        "customer.subscription.updated" => {
            let status = SubscriptionStatus::parse(object["status"].as_str().unwrap_or(""));
            let touched = state
                .subscribers
                .update(&SubscriptionUpdate {
                    stripe_customer_id: customer_id.clone(),
                    status,
                    period_end: unix_to_datetime(&object["current_period_end"]),
                    cancel_at_period_end: object["cancel_at_period_end"].as_bool().unwrap_or(false),
                })
                .await?;

            if touched == 0 {
                tracing::warn!(customer_id = %customer_id, "Subscription update for unknown customer");
            }
        }
        "customer.subscription.deleted" => {
            state.subscribers.cancel(&customer_id).await?;
        }
        _ => {
            tracing::debug!(event_type = event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}
