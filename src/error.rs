use crate::middleware::error_handling;
use crate::store::StoreError;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self, None)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded for {bucket}")]
    RateLimited {
        bucket: &'static str,
        retry_after_secs: u64,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::UniqueViolation => AppError::Conflict("duplicate write".into()),
            StoreError::Backend(msg) => AppError::Database(msg),
        }
    }
}

// NOTE: No need to implement From<AppError> for actix_web::Error
// because actix-web provides a blanket impl for all ResponseError types

impl AppError {
    /// Whether the caller may retry the same request unchanged (with the same idempotency key)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::ServiceUnavailable(_)
        )
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 422,
            AppError::Unauthorized => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::RateLimited { .. } => 429,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }

    /// Code from the shared error taxonomy
    pub fn code(&self) -> &'static str {
        use error_types::error_codes;

        match self {
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::Unauthorized => error_codes::UNAUTHORIZED,
            AppError::Forbidden(_) => error_codes::FORBIDDEN,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Conflict(_) => error_codes::CONFLICT,
            AppError::RateLimited { .. } => error_codes::RATE_LIMITED,
            AppError::ServiceUnavailable(_) => error_codes::UNAVAILABLE,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => error_codes::INTERNAL,
        }
    }
}
