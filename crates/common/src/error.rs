use thiserror::Error;
use uuid::Uuid;

use crate::types::RunStatus;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock not acquired: {0}")]
    LockUnavailable(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Run {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-friendly category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Redis(_) => "redis",
            AppError::LockUnavailable(_) => "lock_unavailable",
            AppError::Scan(_) => "scan",
            AppError::Delivery(_) => "delivery",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Config(_) => "config",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal",
        }
    }
}
