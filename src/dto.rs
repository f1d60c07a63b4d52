//! Request/response bodies that are not domain models.
//!
//! - `*Request` → deserialized from client JSON
//! - `*Response` → serialized to client JSON
//! - Validation is expressed via `validator` derive macros

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// Standard success message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// POST /functions/v1/send-reset-code
#[derive(Debug, Deserialize, Validate)]
pub struct SendResetCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 4, max = 12, message = "Code must be 4-12 characters"))]
    pub code: String,
}

/// POST /api/auth/password-reset/request
#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 254, message = "Email too long"))]
    pub email: String,
}

/// POST /api/auth/password-reset/confirm
#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirmRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub new_password: String,
}

/// Runs `validator` and maps failures onto `AppError::Validation`.
pub fn validated<T: Validate>(body: T) -> Result<T, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(body)
}
