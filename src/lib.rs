use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

#[cfg(test)]
mod test_utils;

use auth::rate_limit::RateLimitState;
use config::Config;
use db::reset_codes::PgResetCodeStore;
use db::subscribers::{PgSubscriberStore, SubscriberStore};
use db::usage::{PgUsageStore, UsageStore};
use services::auth_admin::AuthAdminClient;
use services::email::{EmailSender, ResendEmailSender};
use services::password_reset::PasswordResetService;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimitState,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub usage: Arc<dyn UsageStore>,
    pub email: Arc<dyn EmailSender>,
    pub password_resets: Arc<PasswordResetService>,
}

impl AppState {
    /// Wires the Postgres stores and the outbound HTTP clients.
    pub fn new(db: PgPool, config: Arc<Config>) -> Self {
        let email: Arc<dyn EmailSender> = Arc::new(ResendEmailSender::new(
            config.resend_api_url.clone(),
            config.resend_api_key.clone(),
            config.email_from.clone(),
        ));
        let passwords = Arc::new(AuthAdminClient::new(
            config.auth_admin_url.clone(),
            config.auth_service_role_key.clone(),
        ));
        let password_resets = Arc::new(PasswordResetService::new(
            Arc::new(PgResetCodeStore::new(db.clone())),
            email.clone(),
            passwords,
            config.reset_code_ttl_secs,
            config.reset_code_max_attempts,
        ));

        Self {
            subscribers: Arc::new(PgSubscriberStore::new(db.clone())),
            usage: Arc::new(PgUsageStore::new(db.clone())),
            rate_limiter: RateLimitState::new(),
            email,
            password_resets,
            config,
            db,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let reset_routes = Router::new()
        .route(
            "/api/auth/password-reset/request",
            post(handlers::password_reset::request_reset),
        )
        .route(
            "/api/auth/password-reset/confirm",
            post(handlers::password_reset::confirm_reset),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_reset,
        ));

    let email_function_routes = Router::new()
        .route(
            "/functions/v1/send-reset-code",
            post(handlers::functions::send_reset_code),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_email,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route(
            "/api/billing/webhook",
            post(handlers::billing::stripe_webhook),
        )
        .route(
            "/functions/v1/generate-test-pdf",
            get(handlers::functions::generate_test_pdf)
                .post(handlers::functions::generate_test_pdf),
        )
        .merge(email_function_routes)
        .merge(reset_routes);

    let protected_routes = Router::new()
        // Subscription status
        .route(
            "/functions/v1/check-subscription",
            get(handlers::billing::check_subscription)
                .post(handlers::billing::check_subscription),
        )
        .route(
            "/api/billing/subscription",
            get(handlers::billing::check_subscription),
        )
        // Generation quota
        .route("/api/usage", get(handlers::usage::get_usage))
        .route(
            "/api/usage/generations",
            post(handlers::usage::record_generation),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let allowed_origins: Vec<HeaderValue> = std::iter::once(&config.frontend_url)
        .chain(config.cors_extra_origins.iter())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("apikey"),
            HeaderName::from_static("x-client-info"),
        ])
        .allow_credentials(true)
}
