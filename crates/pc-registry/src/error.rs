//! Registry Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use pc_common::{AccountType, SubscriptionPlan};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{message}")]
    Validation { message: String },

    #[error("Duplicate subscriber: {field}={value}")]
    Duplicate { field: String, value: String },

    #[error("Subscriber not found: {id}")]
    NotFound { id: i64 },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("Plan {plan} is not available for {account_type} accounts")]
    PlanNotAdmissible {
        plan: SubscriptionPlan,
        account_type: AccountType,
    },

    #[error("Corrupt subscriber record {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn duplicate_email(email: impl Into<String>) -> Self {
        Self::Duplicate {
            field: "email".to_string(),
            value: email.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            RegistryError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            RegistryError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE"),
            RegistryError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RegistryError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            RegistryError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            RegistryError::PlanNotAdmissible { .. } => (StatusCode::BAD_REQUEST, "PLAN_NOT_ADMISSIBLE"),
            RegistryError::CorruptRecord { .. }
            | RegistryError::Database(_)
            | RegistryError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
