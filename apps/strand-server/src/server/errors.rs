use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::IntoResponse,
    Json,
};

use super::{
    metrics::{record_auth_failure, record_rate_limit_hit},
    types::AuthError,
};

#[derive(Debug)]
pub(crate) enum AuthFailure {
    InvalidRequest,
    /// Uniform for wrong password and unknown identifier alike, so failed
    /// logins cannot enumerate accounts.
    Unauthorized,
    AccountInactive,
    NotVerified,
    AccountLocked,
    RateLimited {
        policy: &'static str,
        retry_after_secs: u64,
    },
    Internal,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => record_auth_failure("unauthorized"),
            Self::AccountInactive => record_auth_failure("account_inactive"),
            Self::NotVerified => record_auth_failure("account_not_verified"),
            Self::AccountLocked => record_auth_failure("account_locked"),
            Self::RateLimited { policy, .. } => record_rate_limit_hit("http", policy),
            Self::InvalidRequest | Self::Internal => {}
        }

        match self {
            Self::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                Json(AuthError {
                    error: "invalid_request",
                }),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "invalid_credentials",
                }),
            )
                .into_response(),
            Self::AccountInactive => (
                StatusCode::FORBIDDEN,
                Json(AuthError {
                    error: "account_inactive",
                }),
            )
                .into_response(),
            Self::NotVerified => (
                StatusCode::FORBIDDEN,
                Json(AuthError {
                    error: "account_not_verified",
                }),
            )
                .into_response(),
            Self::AccountLocked => (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "account_locked",
                }),
            )
                .into_response(),
            Self::RateLimited {
                retry_after_secs, ..
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(AuthError {
                    error: "rate_limited",
                }),
            )
                .into_response(),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AuthError {
                    error: "internal_error",
                }),
            )
                .into_response(),
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
