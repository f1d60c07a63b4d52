//! The two single-purpose edge functions. Failures always surface as a 500
//! with an `{"error"}` body, matching the hosted functions the frontend
//! already talks to.

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::dto::{validated, SendResetCodeRequest};
use crate::error::FunctionError;
use crate::services::email::{reset_code_email, RESET_CODE_VALID_MINUTES};
use crate::services::pdf::{render_invoice, InvoiceDocument};
use crate::AppState;

pub async fn send_reset_code(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, FunctionError> {
    let request: SendResetCodeRequest = serde_json::from_slice(&body)
        .map_err(|e| FunctionError::new(format!("Invalid request body: {}", e)))?;
    let request = validated(request)?;

    let (subject, html) = reset_code_email(&request.code, RESET_CODE_VALID_MINUTES);
    state.email.send(&request.email, &subject, &html).await?;

    tracing::info!(to = %request.email, "Reset code email sent");

    Ok(Json(json!({ "message": "Reset code sent successfully" })))
}

pub async fn generate_test_pdf() -> Result<Response, FunctionError> {
    let invoice = InvoiceDocument::sample(Utc::now());
    let bytes = render_invoice(&invoice).map_err(|e| {
        FunctionError::new("Failed to generate PDF").with_details(e.to_string())
    })?;

    tracing::debug!(bytes = bytes.len(), number = %invoice.number, "Test PDF generated");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"test-invoice.pdf\"",
            ),
        ],
        bytes,
    )
        .into_response())
}
