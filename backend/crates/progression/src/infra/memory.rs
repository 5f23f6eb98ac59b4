//! In-Memory Repository Implementation
//!
//! The whole state sits behind one async mutex. A transaction holds the lock
//! for its lifetime and works on a private copy that replaces the shared
//! state on commit, so transactions are serialised and dropping one rolls
//! it back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kernel::id::{
    ActivityId, AttemptId, BadgeId, ChallengeId, CourseId, MotivationId, TenantId, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::entities::{
    Activity, Badge, ChallengeAttempt, ChallengeMotivation, ChallengeQuestion, FinalChallenge,
    LedgerSums, PointEntry, User, UserActivity, UserBadge,
};
use crate::domain::repository::{
    ActivityRepository, BadgeRepository, ChallengeRepository, EnrollmentRepository,
    LedgerRepository, MotivationRepository, ProgressionStore, ProgressionTx, UserRepository,
};
use crate::domain::value_objects::{ChallengeLevel, PointType};
use crate::error::{ProgressionError, ProgressionResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<(TenantId, UserId), User>,
    enrollments: HashSet<(TenantId, UserId, CourseId)>,
    activities: HashMap<ActivityId, Activity>,
    user_activities: HashMap<(TenantId, UserId, ActivityId), UserActivity>,
    entries: Vec<PointEntry>,
    badges: HashMap<BadgeId, Badge>,
    user_badges: HashMap<(TenantId, UserId, BadgeId), UserBadge>,
    challenges: HashMap<ChallengeId, FinalChallenge>,
    attempts: HashMap<AttemptId, ChallengeAttempt>,
    motivations: HashMap<MotivationId, ChallengeMotivation>,
}

/// In-process progression store
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressionStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryProgressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user with a zero total
    pub async fn seed_user(&self, tenant: TenantId, name: &str) -> UserId {
        let id = UserId::new();
        self.state.lock().await.users.insert(
            (tenant, id),
            User {
                id,
                tenant_id: tenant,
                name: name.to_string(),
                total_points: 0,
            },
        );
        id
    }

    pub async fn enroll(&self, tenant: TenantId, user: UserId, course: CourseId) {
        self.state.lock().await.enrollments.insert((tenant, user, course));
    }

    pub async fn seed_activity(&self, activity: Activity) {
        self.state.lock().await.activities.insert(activity.id, activity);
    }

    pub async fn seed_badge(&self, badge: Badge) {
        self.state.lock().await.badges.insert(badge.id, badge);
    }

    /// Insert a challenge. Fails on a second challenge for the same
    /// (course, level).
    pub async fn seed_challenge(&self, challenge: FinalChallenge) -> ProgressionResult<()> {
        let mut state = self.state.lock().await;
        let taken = state.challenges.values().any(|c| {
            c.tenant_id == challenge.tenant_id
                && c.course_id == challenge.course_id
                && c.level == challenge.level
        });
        if taken {
            return Err(ProgressionError::Validation(format!(
                "course already has a {} challenge",
                challenge.level
            )));
        }
        state.challenges.insert(challenge.id, challenge);
        Ok(())
    }

    /// Replace the live questions of a challenge
    pub async fn replace_questions(
        &self,
        challenge: ChallengeId,
        questions: Vec<ChallengeQuestion>,
    ) -> ProgressionResult<()> {
        let mut state = self.state.lock().await;
        let challenge = state
            .challenges
            .get_mut(&challenge)
            .ok_or(ProgressionError::ChallengeNotFound)?;
        challenge.questions = questions;
        Ok(())
    }

    pub async fn user(&self, tenant: TenantId, user: UserId) -> Option<User> {
        self.state.lock().await.users.get(&(tenant, user)).cloned()
    }

    /// Oldest first
    pub async fn ledger_entries(&self, tenant: TenantId, user: UserId) -> Vec<PointEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant && e.user_id == user)
            .cloned()
            .collect()
    }

    /// Overwrite a cached total without touching the ledger
    pub async fn overwrite_total_points(&self, tenant: TenantId, user: UserId, total: i64) {
        if let Some(found) = self.state.lock().await.users.get_mut(&(tenant, user)) {
            found.total_points = total;
        }
    }

    pub async fn motivation(&self, id: MotivationId) -> Option<ChallengeMotivation> {
        self.state.lock().await.motivations.get(&id).cloned()
    }
}

impl ProgressionStore for MemoryProgressionStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> ProgressionResult<MemoryTx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }
}

/// Unit of work over [`MemoryProgressionStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl ProgressionTx for MemoryTx {
    async fn commit(self) -> ProgressionResult<()> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

impl UserRepository for MemoryTx {
    async fn find_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>> {
        Ok(self.working.users.get(&(tenant, user)).cloned())
    }

    async fn lock_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>> {
        Ok(self.working.users.get(&(tenant, user)).cloned())
    }

    async fn set_total_points(
        &mut self,
        tenant: TenantId,
        user: UserId,
        total_points: i64,
    ) -> ProgressionResult<()> {
        let found = self
            .working
            .users
            .get_mut(&(tenant, user))
            .ok_or(ProgressionError::UserNotFound)?;
        found.total_points = total_points;
        Ok(())
    }

    async fn list_user_ids(&mut self, tenant: TenantId) -> ProgressionResult<Vec<UserId>> {
        Ok(self
            .working
            .users
            .keys()
            .filter(|(t, _)| *t == tenant)
            .map(|(_, u)| *u)
            .collect())
    }
}

impl LedgerRepository for MemoryTx {
    async fn append_entry(&mut self, entry: &PointEntry) -> ProgressionResult<()> {
        self.working.entries.push(entry.clone());
        Ok(())
    }

    async fn ledger_sums(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<LedgerSums> {
        let mut sums = LedgerSums::default();
        for entry in self
            .working
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant && e.user_id == user)
        {
            match entry.point_type {
                PointType::Earned => sums.earned += entry.points,
                PointType::Spent => sums.spent += entry.points,
            }
        }
        Ok(sums)
    }

    async fn list_entries(
        &mut self,
        tenant: TenantId,
        user: UserId,
        limit: usize,
    ) -> ProgressionResult<Vec<PointEntry>> {
        Ok(self
            .working
            .entries
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant && e.user_id == user)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl EnrollmentRepository for MemoryTx {
    async fn is_enrolled(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<bool> {
        Ok(self.working.enrollments.contains(&(tenant, user, course)))
    }
}

impl MemoryTx {
    fn active_activities(
        &self,
        tenant: TenantId,
        course: CourseId,
    ) -> impl Iterator<Item = &Activity> {
        self.working
            .activities
            .values()
            .filter(move |a| a.tenant_id == tenant && a.course_id == course && a.is_active)
    }
}

impl ActivityRepository for MemoryTx {
    async fn find_activity(
        &mut self,
        tenant: TenantId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<Activity>> {
        Ok(self
            .working
            .activities
            .get(&activity)
            .filter(|a| a.tenant_id == tenant && a.is_active)
            .cloned())
    }

    async fn find_preceding_activity(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        order: i32,
    ) -> ProgressionResult<Option<Activity>> {
        Ok(self
            .active_activities(tenant, course)
            .filter(|a| a.order < order)
            .max_by_key(|a| a.order)
            .cloned())
    }

    async fn list_course_activities(
        &mut self,
        tenant: TenantId,
        course: CourseId,
    ) -> ProgressionResult<Vec<Activity>> {
        let mut activities: Vec<Activity> = self.active_activities(tenant, course).cloned().collect();
        activities.sort_by_key(|a| a.order);
        Ok(activities)
    }

    async fn find_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>> {
        Ok(self
            .working
            .user_activities
            .get(&(tenant, user, activity))
            .cloned())
    }

    async fn lock_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>> {
        self.find_user_activity(tenant, user, activity).await
    }

    async fn insert_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<bool> {
        let key = (
            user_activity.tenant_id,
            user_activity.user_id,
            user_activity.activity_id,
        );
        if self.working.user_activities.contains_key(&key) {
            return Ok(false);
        }
        self.working.user_activities.insert(key, user_activity.clone());
        Ok(true)
    }

    async fn update_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<()> {
        let key = (
            user_activity.tenant_id,
            user_activity.user_id,
            user_activity.activity_id,
        );
        let row = self
            .working
            .user_activities
            .get_mut(&key)
            .ok_or(ProgressionError::ActivityNotFound)?;
        *row = user_activity.clone();
        Ok(())
    }

    async fn list_user_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<UserActivity>> {
        let in_course: HashSet<ActivityId> = self
            .working
            .activities
            .values()
            .filter(|a| a.tenant_id == tenant && a.course_id == course)
            .map(|a| a.id)
            .collect();
        Ok(self
            .working
            .user_activities
            .values()
            .filter(|ua| ua.tenant_id == tenant && ua.user_id == user)
            .filter(|ua| in_course.contains(&ua.activity_id))
            .cloned()
            .collect())
    }

    async fn count_completed_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<u64> {
        Ok(self
            .working
            .user_activities
            .values()
            .filter(|ua| ua.tenant_id == tenant && ua.user_id == user && ua.is_completed())
            .count() as u64)
    }
}

impl ChallengeRepository for MemoryTx {
    async fn find_active_challenge(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        level: ChallengeLevel,
    ) -> ProgressionResult<Option<FinalChallenge>> {
        Ok(self
            .working
            .challenges
            .values()
            .find(|c| c.tenant_id == tenant && c.course_id == course && c.level == level && c.is_active)
            .cloned())
    }

    async fn find_challenge(
        &mut self,
        tenant: TenantId,
        challenge: ChallengeId,
    ) -> ProgressionResult<Option<FinalChallenge>> {
        Ok(self
            .working
            .challenges
            .get(&challenge)
            .filter(|c| c.tenant_id == tenant)
            .cloned())
    }

    async fn insert_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()> {
        self.working.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn lock_attempt(
        &mut self,
        tenant: TenantId,
        attempt: AttemptId,
    ) -> ProgressionResult<Option<ChallengeAttempt>> {
        Ok(self
            .working
            .attempts
            .get(&attempt)
            .filter(|a| a.tenant_id == tenant)
            .cloned())
    }

    async fn complete_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()> {
        let row = self
            .working
            .attempts
            .get_mut(&attempt.id)
            .ok_or(ProgressionError::AttemptNotFound)?;
        row.answers = attempt.answers.clone();
        row.score = attempt.score;
        row.time_spent_secs = attempt.time_spent_secs;
        row.completed_at = attempt.completed_at;
        Ok(())
    }

    async fn list_completed_attempts(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<ChallengeAttempt>> {
        let mut attempts: Vec<ChallengeAttempt> = self
            .working
            .attempts
            .values()
            .filter(|a| a.tenant_id == tenant && a.user_id == user && a.course_id == course)
            .filter(|a| a.is_completed())
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(attempts)
    }
}

impl BadgeRepository for MemoryTx {
    async fn find_badge(&mut self, tenant: TenantId, badge: BadgeId) -> ProgressionResult<Option<Badge>> {
        Ok(self
            .working
            .badges
            .get(&badge)
            .filter(|b| b.tenant_id == tenant)
            .cloned())
    }

    async fn list_active_badges(&mut self, tenant: TenantId) -> ProgressionResult<Vec<Badge>> {
        Ok(self
            .working
            .badges
            .values()
            .filter(|b| b.tenant_id == tenant && b.is_active)
            .cloned()
            .collect())
    }

    async fn insert_user_badge(&mut self, user_badge: &UserBadge) -> ProgressionResult<bool> {
        let key = (user_badge.tenant_id, user_badge.user_id, user_badge.badge_id);
        if self.working.user_badges.contains_key(&key) {
            return Ok(false);
        }
        self.working.user_badges.insert(key, user_badge.clone());
        Ok(true)
    }

    async fn list_user_badges(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<Vec<UserBadge>> {
        Ok(self
            .working
            .user_badges
            .values()
            .filter(|ub| ub.tenant_id == tenant && ub.user_id == user)
            .cloned()
            .collect())
    }
}

impl MotivationRepository for MemoryTx {
    async fn insert_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<bool> {
        let duplicate = self.working.motivations.values().any(|m| {
            m.tenant_id == motivation.tenant_id
                && m.sender_id == motivation.sender_id
                && m.receiver_id == motivation.receiver_id
                && m.course_id == motivation.course_id
        });
        if duplicate {
            return Ok(false);
        }
        self.working
            .motivations
            .insert(motivation.id, motivation.clone());
        Ok(true)
    }

    async fn lock_motivation(
        &mut self,
        tenant: TenantId,
        motivation: MotivationId,
    ) -> ProgressionResult<Option<ChallengeMotivation>> {
        Ok(self
            .working
            .motivations
            .get(&motivation)
            .filter(|m| m.tenant_id == tenant)
            .cloned())
    }

    async fn update_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<()> {
        let row = self
            .working
            .motivations
            .get_mut(&motivation.id)
            .ok_or(ProgressionError::MotivationNotFound)?;
        row.confirmed_at = motivation.confirmed_at;
        row.points_doubled = motivation.points_doubled;
        Ok(())
    }

    async fn list_received(
        &mut self,
        tenant: TenantId,
        receiver: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        Ok(self.motivations_where(tenant, course, |m| m.receiver_id == receiver))
    }

    async fn list_sent(
        &mut self,
        tenant: TenantId,
        sender: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        Ok(self.motivations_where(tenant, course, |m| m.sender_id == sender))
    }
}

impl MemoryTx {
    fn motivations_where(
        &self,
        tenant: TenantId,
        course: Option<CourseId>,
        party: impl Fn(&ChallengeMotivation) -> bool,
    ) -> Vec<ChallengeMotivation> {
        let mut found: Vec<ChallengeMotivation> = self
            .working
            .motivations
            .values()
            .filter(|m| m.tenant_id == tenant && party(m))
            .filter(|m| course.is_none_or(|c| m.course_id == c))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}
