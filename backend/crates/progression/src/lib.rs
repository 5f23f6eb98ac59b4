//! Progression & Rewards Engine
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, pure rules, repository traits
//! - `application/` - Use cases
//! - `infra/` - PostgreSQL and in-memory stores
//!
//! ## Consistency Model
//! - The point ledger is append-only and is the source of truth; a user's
//!   `total_points` is recomputed from it in the same transaction as every posting
//! - Every mutating use case is one unit of work: all preconditions are checked
//!   before the first write, and an error rolls everything back
//! - Completions, badge grants and motivations are create-if-absent, so
//!   concurrent duplicates resolve to one write
//! - Every query is scoped by an explicit tenant id

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;

// Re-exports for convenience
pub use application::activity_progress::{ActivityCompletion, ActivityProgressTracker, CourseProgress};
pub use application::badge_awarder::{BadgeAwarder, BadgeCriteria, BadgeGrant, UserStats};
pub use application::challenge_progression::{
    ChallengeOverview, ChallengeProgression, SubmissionResult,
};
pub use application::config::ProgressionConfig;
pub use application::motivation::{MotivationConfirmation, MotivationIncentive};
pub use application::point_ledger::{AuditReport, PointLedger, PointsReason, Reconciliation};
pub use error::{ProgressionError, ProgressionResult};
pub use infra::memory::MemoryProgressionStore;
pub use infra::postgres::PgProgressionStore;

// Re-export kernel types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};
pub use kernel::id;

#[cfg(test)]
mod tests;
