//! Progression Error Types
//!
//! This module provides engine-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.

use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

/// Progression-specific result type alias
pub type ProgressionResult<T> = Result<T, ProgressionError>;

/// Progression-specific error variants
///
/// Every variant collapses onto one [`ErrorKind`]; the API layer that calls
/// into the engine translates kinds into responses.
#[derive(Debug, Error)]
pub enum ProgressionError {
    /// Malformed or missing input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// User is not enrolled in the course that owns the content
    #[error("User is not enrolled in this course")]
    NotEnrolled,

    #[error("User not found")]
    UserNotFound,

    #[error("Activity not found")]
    ActivityNotFound,

    /// Preceding activity has not been completed yet
    #[error("Activity is locked until the previous activity is completed")]
    ActivityLocked,

    /// Activity or attempt was already completed
    #[error("Already completed")]
    AlreadyCompleted,

    /// No active final challenge for the course and level
    #[error("Final challenge not found")]
    ChallengeNotFound,

    /// Previous challenge level has no passing attempt
    #[error("Challenge level is locked until the previous level is passed")]
    LevelLocked,

    #[error("Challenge attempt not found")]
    AttemptNotFound,

    #[error("Badge not found")]
    BadgeNotFound,

    #[error("Motivation not found")]
    MotivationNotFound,

    /// Sender has not passed all three levels for the course
    #[error("All challenge levels must be passed before sending motivations")]
    ChallengeNotPassed,

    /// Only the receiver may confirm a motivation
    #[error("Only the receiver can confirm this motivation")]
    NotReceiver,

    #[error("Motivation already confirmed")]
    AlreadyConfirmed,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProgressionError {
    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        use ProgressionError::*;
        match self {
            Validation(_) => ErrorKind::Validation,
            UserNotFound | ActivityNotFound | ChallengeNotFound | AttemptNotFound
            | BadgeNotFound | MotivationNotFound => ErrorKind::NotFound,
            NotEnrolled | ActivityLocked | LevelLocked | ChallengeNotPassed | NotReceiver => {
                ErrorKind::Forbidden
            }
            AlreadyCompleted | AlreadyConfirmed => ErrorKind::Conflict,
            Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => {
                ErrorKind::ServiceUnavailable
            }
            Database(sqlx::Error::Database(db)) => match db.code().as_deref() {
                // unique violation, serialization failure, deadlock
                Some("23505" | "40001" | "40P01") => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            Database(_) => ErrorKind::Internal,
            Internal(_) => ErrorKind::Internal,
        }
    }

    /// What the user can do to get past the error, if anything
    pub fn action(&self) -> Option<&'static str> {
        match self {
            ProgressionError::NotEnrolled => Some("Enroll in the course first"),
            ProgressionError::ActivityLocked => Some("Complete the previous activity first"),
            ProgressionError::LevelLocked => Some("Pass the previous challenge level first"),
            ProgressionError::ChallengeNotPassed => Some("Pass every challenge level first"),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            ProgressionError::Database(e) => {
                tracing::error!(error = %e, "Progression database error");
            }
            ProgressionError::Internal(msg) => {
                tracing::error!(message = %msg, "Progression internal error");
            }
            ProgressionError::NotEnrolled
            | ProgressionError::ActivityLocked
            | ProgressionError::LevelLocked
            | ProgressionError::ChallengeNotPassed
            | ProgressionError::NotReceiver => {
                tracing::warn!(error = %self, "Progression access denied");
            }
            _ => {
                tracing::debug!(error = %self, "Progression error");
            }
        }
    }
}

/// Does not log; use cases already log through [`ProgressionError::log`]
impl From<ProgressionError> for AppError {
    fn from(err: ProgressionError) -> Self {
        let mut app = AppError::new(err.kind(), err.to_string());
        if let Some(action) = err.action() {
            app = app.with_action(action);
        }
        match err {
            ProgressionError::Database(e) => app.with_source(e),
            _ => app,
        }
    }
}

impl From<serde_json::Error> for ProgressionError {
    fn from(err: serde_json::Error) -> Self {
        ProgressionError::Internal(format!("payload encoding: {err}"))
    }
}
