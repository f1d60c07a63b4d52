use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "invoiceai-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: &'static str,
    pub schema: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

fn verdict(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "failed"
    }
}

/// Ready once the database answers and migrations have created the usage table.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let schema = sqlx::query_scalar::<_, bool>(
        "SELECT to_regclass('public.generation_usage') IS NOT NULL",
    )
    .fetch_one(&state.db)
    .await;

    let (database_ok, schema_ok) = match schema {
        Ok(present) => (true, present),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe could not reach the database");
            (false, false)
        }
    };

    let ready = database_ok && schema_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            status: if ready { "ready" } else { "not_ready" },
            checks: ReadinessChecks {
                database: verdict(database_ok),
                schema: verdict(schema_ok),
            },
        }),
    )
}
