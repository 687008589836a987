use common::{CriteriaError, RewardError};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use thiserror::Error;

use crate::provisioning::ProvisionError;

/// Structured failure returned across the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `NOT_FOUND`, `CONFLICT`, `PERMISSION_DENIED`,
    /// `EXTERNAL_PROVISIONING_FAILED`, `VALIDATION_ERROR`, `INTERNAL_ERROR`.
    pub code: &'static str,
    /// Human-readable error description.
    pub message: String,
}

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Entity missing or soft-deleted.
    #[error("{0}")]
    NotFound(String),
    /// Duplicate join, pending offer exists, lost a state race.
    #[error("{0}")]
    Conflict(String),
    /// Access tier or ownership check failed.
    #[error("{0}")]
    Forbidden(String),
    /// The clone saga's external phase failed twice and was compensated.
    #[error("{0}")]
    ExternalProvisioningFailed(String),
    /// Malformed criteria or input.
    #[error("{0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Forbidden(_) => "PERMISSION_DENIED",
            EngineError::ExternalProvisioningFailed(_) => "EXTERNAL_PROVISIONING_FAILED",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Project the error for callers. Internal details are logged, never returned.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            EngineError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code(),
            message,
        }
    }

    /// Map a unique-constraint violation to `Conflict`, everything else to `Internal`.
    pub fn from_insert(err: DbErr, conflict: impl Into<String>) -> Self {
        if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            EngineError::Conflict(conflict.into())
        } else {
            err.into()
        }
    }
}

impl From<DbErr> for EngineError {
    fn from(err: DbErr) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<CriteriaError> for EngineError {
    fn from(err: CriteriaError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<RewardError> for EngineError {
    fn from(err: RewardError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<ProvisionError> for EngineError {
    fn from(err: ProvisionError) -> Self {
        EngineError::ExternalProvisioningFailed(err.to_string())
    }
}
