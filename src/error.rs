use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    session::{AbortError, ApplyError, PlanError},
    store::storage::StorageError,
};

/// Errors surfaced to hosts and players by core operations.
///
/// Broadcast delivery failures deliberately have no variant: they are logged
/// and swallowed at the bus layer because the store stays authoritative.
#[derive(Debug, Error)]
pub enum GameError {
    /// A store operation failed.
    #[error("persistence failed")]
    Persistence(#[source] StorageError),
    /// Requested resource was not found (bad pin, missing quiz or session).
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation conflicts with existing rows (nickname taken, starting
    /// with an empty roster).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current session phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Transition work exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for GameError {
    fn from(err: StorageError) -> Self {
        GameError::Persistence(err)
    }
}

impl From<ValidationErrors> for GameError {
    fn from(err: ValidationErrors) -> Self {
        GameError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<PlanError> for GameError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                GameError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => GameError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for GameError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => GameError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                GameError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => GameError::InvalidState(format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => GameError::InvalidState(format!(
                "state version mismatch during transition (expected {expected}, got {actual})"
            )),
        }
    }
}

impl From<AbortError> for GameError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => GameError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                GameError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
