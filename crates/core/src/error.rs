use crate::types::DbId;
use crate::validation::rules::FieldViolation;

/// Service-boundary error for every redirect mutation and lookup.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Redirect quota exceeded: {projected} active rules would exceed the limit of {limit}")]
    QuotaExceeded { limit: i64, projected: i64 },

    #[error("Transaction rolled back: {0}")]
    Transaction(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Field violations carried by a [`CoreError::Validation`], empty otherwise.
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            CoreError::Validation(v) => v,
            _ => &[],
        }
    }
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected a write because of a unique or check constraint.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into().into())
    }
}
