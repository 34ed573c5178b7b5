//! Error taxonomy shared by stores, strategies and the benchmark harness.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaintenanceError {
    /// Connectivity or transport failure; the whole operation may be retried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Old and new definitions cannot be bridged by this strategy.
    #[error("definition incompatible: {0}")]
    DefinitionIncompatible(String),

    /// Arithmetic or storage engine failure during refresh or read.
    #[error("compute error: {0}")]
    ComputeError(String),

    /// The record store holds no rows yet.
    #[error("record store is empty; load records before running a strategy")]
    EmptyStore,
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

impl MaintenanceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MaintenanceError::StoreUnavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MaintenanceError::StoreUnavailable(_) => "store_unavailable",
            MaintenanceError::DefinitionIncompatible(_) => "definition_incompatible",
            MaintenanceError::ComputeError(_) => "compute_error",
            MaintenanceError::EmptyStore => "empty_store",
        }
    }
}

impl From<sqlx::Error> for MaintenanceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MaintenanceError::StoreUnavailable(err.to_string()),
            other => MaintenanceError::ComputeError(other.to_string()),
        }
    }
}
