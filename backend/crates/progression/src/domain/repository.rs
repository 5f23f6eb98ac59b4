//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the
//! infrastructure layer.
//!
//! Every method runs inside a unit of work ([`ProgressionTx`]) and takes the
//! owning tenant explicitly. `lock_*` methods take a row lock that is held
//! until the unit of work ends.

use std::future::Future;

use kernel::id::{
    ActivityId, AttemptId, BadgeId, ChallengeId, CourseId, MotivationId, TenantId, UserId,
};

use crate::domain::entities::{
    Activity, Badge, ChallengeAttempt, ChallengeMotivation, FinalChallenge, LedgerSums,
    PointEntry, User, UserActivity, UserBadge,
};
use crate::domain::value_objects::ChallengeLevel;
use crate::error::ProgressionResult;

/// User repository trait
#[trait_variant::make(UserRepository: Send)]
pub trait LocalUserRepository {
    async fn find_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>>;

    /// Lock the user row. Serialises every write to the user's ledger.
    async fn lock_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>>;

    async fn set_total_points(
        &mut self,
        tenant: TenantId,
        user: UserId,
        total_points: i64,
    ) -> ProgressionResult<()>;

    async fn list_user_ids(&mut self, tenant: TenantId) -> ProgressionResult<Vec<UserId>>;
}

/// Point ledger repository trait (append-only)
#[trait_variant::make(LedgerRepository: Send)]
pub trait LocalLedgerRepository {
    async fn append_entry(&mut self, entry: &PointEntry) -> ProgressionResult<()>;

    async fn ledger_sums(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<LedgerSums>;

    /// Newest first
    async fn list_entries(
        &mut self,
        tenant: TenantId,
        user: UserId,
        limit: usize,
    ) -> ProgressionResult<Vec<PointEntry>>;
}

/// Enrollment collaborator
#[trait_variant::make(EnrollmentRepository: Send)]
pub trait LocalEnrollmentRepository {
    async fn is_enrolled(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<bool>;
}

/// Activity content and per-user activity progress
#[trait_variant::make(ActivityRepository: Send)]
pub trait LocalActivityRepository {
    /// Active activity by id
    async fn find_activity(
        &mut self,
        tenant: TenantId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<Activity>>;

    /// Active activity of `course` with the greatest order below `order`
    async fn find_preceding_activity(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        order: i32,
    ) -> ProgressionResult<Option<Activity>>;

    /// Active activities of `course` by ascending order
    async fn list_course_activities(
        &mut self,
        tenant: TenantId,
        course: CourseId,
    ) -> ProgressionResult<Vec<Activity>>;

    async fn find_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>>;

    async fn lock_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>>;

    /// Insert if absent. Returns `false` when a row already existed.
    async fn insert_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<bool>;

    async fn update_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<()>;

    /// The user's progress rows for activities of `course`
    async fn list_user_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<UserActivity>>;

    async fn count_completed_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<u64>;
}

/// Final challenges and attempts
#[trait_variant::make(ChallengeRepository: Send)]
pub trait LocalChallengeRepository {
    async fn find_active_challenge(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        level: ChallengeLevel,
    ) -> ProgressionResult<Option<FinalChallenge>>;

    /// Challenge by id regardless of `is_active`
    async fn find_challenge(
        &mut self,
        tenant: TenantId,
        challenge: ChallengeId,
    ) -> ProgressionResult<Option<FinalChallenge>>;

    async fn insert_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()>;

    async fn lock_attempt(
        &mut self,
        tenant: TenantId,
        attempt: AttemptId,
    ) -> ProgressionResult<Option<ChallengeAttempt>>;

    /// Persist answers, score, time spent and completion time
    async fn complete_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()>;

    /// Completed attempts of the user for `course`, most recently completed first
    async fn list_completed_attempts(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<ChallengeAttempt>>;
}

/// Badges and grants
#[trait_variant::make(BadgeRepository: Send)]
pub trait LocalBadgeRepository {
    async fn find_badge(&mut self, tenant: TenantId, badge: BadgeId) -> ProgressionResult<Option<Badge>>;

    async fn list_active_badges(&mut self, tenant: TenantId) -> ProgressionResult<Vec<Badge>>;

    /// Insert if absent. Returns `false` when the user already holds the badge.
    async fn insert_user_badge(&mut self, user_badge: &UserBadge) -> ProgressionResult<bool>;

    async fn list_user_badges(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<Vec<UserBadge>>;
}

/// Peer motivations
#[trait_variant::make(MotivationRepository: Send)]
pub trait LocalMotivationRepository {
    /// Insert if no motivation exists for (sender, receiver, course).
    /// Returns `false` for a duplicate.
    async fn insert_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<bool>;

    async fn lock_motivation(
        &mut self,
        tenant: TenantId,
        motivation: MotivationId,
    ) -> ProgressionResult<Option<ChallengeMotivation>>;

    async fn update_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<()>;

    /// Newest first, optionally limited to one course
    async fn list_received(
        &mut self,
        tenant: TenantId,
        receiver: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>>;

    /// Newest first, optionally limited to one course
    async fn list_sent(
        &mut self,
        tenant: TenantId,
        sender: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>>;
}

/// Unit of work over every progression repository
///
/// Dropping a transaction without calling [`ProgressionTx::commit`] discards
/// all of its writes.
pub trait ProgressionTx:
    UserRepository
    + LedgerRepository
    + EnrollmentRepository
    + ActivityRepository
    + ChallengeRepository
    + BadgeRepository
    + MotivationRepository
    + Send
{
    fn commit(self) -> impl Future<Output = ProgressionResult<()>> + Send;
}

/// Source of units of work
pub trait ProgressionStore: Send + Sync + 'static {
    type Tx: ProgressionTx;

    fn begin(&self) -> impl Future<Output = ProgressionResult<Self::Tx>> + Send;
}
