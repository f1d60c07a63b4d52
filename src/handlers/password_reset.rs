use axum::{extract::State, Json};

use crate::dto::{validated, MessageResponse, PasswordResetConfirmRequest, PasswordResetRequest};
use crate::error::AppResult;
use crate::AppState;

pub async fn request_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    let body = validated(body)?;
    state.password_resets.request(&body.email).await?;

    Ok(Json(MessageResponse::new(
        "If an account exists for that email, a reset code has been sent",
    )))
}

pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetConfirmRequest>,
) -> AppResult<Json<MessageResponse>> {
    let body = validated(body)?;
    state
        .password_resets
        .confirm(&body.email, &body.code, &body.new_password)
        .await?;

    Ok(Json(MessageResponse::new("Password updated")))
}
