use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::identity::IdentityError;
use crate::session::SessionError;

/// Every failure a route can surface. The status mapping lives in one place,
/// [`ApiError::status`].
#[derive(Debug)]
pub enum ApiError {
    Validation(BTreeMap<String, String>),
    BadRequest(String),
    /// Any token failure. Carries no detail.
    Unauthorized,
    InvalidCredentials,
    Forbidden(String),
    NotFound(String),
    RateLimited,
    FeatureDisabled(&'static str),
    AuthUnavailable,
    Upstream,
    Internal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, String>>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::FeatureDisabled(_) | ApiError::AuthUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(_) => "validation failed".to_string(),
            ApiError::BadRequest(m) | ApiError::Forbidden(m) | ApiError::NotFound(m) => m.clone(),
            ApiError::Unauthorized => "Invalid or expired token".to_string(),
            ApiError::InvalidCredentials => "Invalid credentials".to_string(),
            ApiError::RateLimited => "Too many requests, please try again later".to_string(),
            ApiError::FeatureDisabled(feature) => format!("{feature} is disabled"),
            ApiError::AuthUnavailable => "Authentication is not configured".to_string(),
            ApiError::Upstream => "Identity provider unavailable".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            success: false,
            error: self.message(),
            field_errors: match self {
                ApiError::Validation(fields) => Some(fields),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            // The distinction between these stays in the logs.
            SessionError::InvalidToken(e) => {
                tracing::debug!(err = %e, "token rejected");
                ApiError::Unauthorized
            }
            SessionError::UnknownToken => {
                tracing::info!("refresh token not found in ledger");
                ApiError::Unauthorized
            }
            SessionError::TokenReuse { .. } => ApiError::Unauthorized,
            SessionError::DuplicateToken => {
                tracing::error!("refresh token collided twice during issuance");
                ApiError::Internal
            }
            SessionError::Signing(msg) => {
                tracing::error!(err = %msg, "token signing failed");
                ApiError::Internal
            }
            SessionError::Store(e) => {
                tracing::error!(err = %e, "session store error");
                ApiError::Internal
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials => ApiError::InvalidCredentials,
            IdentityError::InvalidAssertion(reason) => {
                tracing::info!(%reason, "identity assertion rejected");
                ApiError::InvalidCredentials
            }
            IdentityError::EmailTaken => ApiError::BadRequest("Email already registered".into()),
            IdentityError::SchoolRequired => {
                ApiError::BadRequest("schoolId is required for first-time Google login".into())
            }
            IdentityError::SchoolNotFound => ApiError::NotFound("School not found".into()),
            IdentityError::UserNotFound => ApiError::NotFound("User not found".into()),
            IdentityError::Upstream(e) => {
                tracing::warn!(err = %e, "identity provider request failed");
                ApiError::Upstream
            }
            e @ (IdentityError::UnknownRole { .. }
            | IdentityError::PasswordHash(_)
            | IdentityError::Store(_)) => {
                tracing::error!(err = %e, "identity error");
                ApiError::Internal
            }
        }
    }
}
