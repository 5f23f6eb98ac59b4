//! Domain Entities
//!
//! Core business entities for the progression domain. Every entity carries
//! the tenant it belongs to; there is no ambient tenant scope.

use chrono::{DateTime, Utc};
use kernel::id::{
    ActivityId, AttemptId, BadgeId, ChallengeId, CourseId, MotivationId, PointEntryId, TenantId,
    UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::services::score_answers;
use crate::domain::value_objects::{ActivityType, ChallengeLevel, PointSource, PointType, Score};
use crate::error::{ProgressionError, ProgressionResult};

/// Learner with the cached projection of their ledger
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Always `max(0, earned - spent)` over the user's ledger
    pub total_points: i64,
}

/// Gradeable unit within a course (read-only content)
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: ActivityId,
    pub tenant_id: TenantId,
    pub course_id: CourseId,
    pub title: String,
    pub activity_type: ActivityType,
    /// Position within the course, starting at 1
    pub order: i32,
    pub points_value: i64,
    pub is_active: bool,
}

/// Per-user progress on one activity. Unique per (user, activity).
#[derive(Debug, Clone)]
pub struct UserActivity {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub started_at: DateTime<Utc>,
    /// Monotonic: once set it is never cleared
    pub completed_at: Option<DateTime<Utc>>,
    /// Percentage 0..=100
    pub score: Option<u8>,
    pub attempts: u32,
    pub metadata: serde_json::Value,
}

impl UserActivity {
    pub fn start(tenant_id: TenantId, user_id: UserId, activity_id: ActivityId) -> Self {
        Self {
            tenant_id,
            user_id,
            activity_id,
            started_at: Utc::now(),
            completed_at: None,
            score: None,
            attempts: 0,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Record the single completion of this activity
    pub fn record_completion(
        &mut self,
        score: u8,
        metadata: Option<serde_json::Value>,
    ) -> ProgressionResult<()> {
        if self.is_completed() {
            return Err(ProgressionError::AlreadyCompleted);
        }
        self.attempts += 1;
        self.score = Some(score);
        self.completed_at = Some(Utc::now());
        if let Some(metadata) = metadata {
            self.metadata = metadata;
        }
        Ok(())
    }
}

/// Append-only ledger row. Never updated or deleted.
#[derive(Debug, Clone)]
pub struct PointEntry {
    pub id: PointEntryId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Magnitude, always positive; direction is `point_type`
    pub points: i64,
    pub point_type: PointType,
    pub source: PointSource,
    pub source_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PointEntry {
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        points: i64,
        point_type: PointType,
        source: PointSource,
        source_id: Option<Uuid>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: PointEntryId::new(),
            tenant_id,
            user_id,
            points,
            point_type,
            source,
            source_id,
            description,
            created_at: Utc::now(),
        }
    }

    /// Contribution of this entry to the raw balance
    pub fn signed_points(&self) -> i64 {
        match self.point_type {
            PointType::Earned => self.points,
            PointType::Spent => -self.points,
        }
    }
}

/// Aggregates over a user's ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSums {
    pub earned: i64,
    pub spent: i64,
}

impl LedgerSums {
    /// The cached total is always this value
    pub fn projected_total(&self) -> i64 {
        (self.earned - self.spent).max(0)
    }
}

/// Achievement that can be granted once per user
#[derive(Debug, Clone)]
pub struct Badge {
    pub id: BadgeId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Opaque to the engine; interpreted by the criteria evaluator
    pub criteria: serde_json::Value,
    pub points_value: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct UserBadge {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub badge_id: BadgeId,
    pub earned_at: DateTime<Utc>,
}

impl UserBadge {
    pub fn new(tenant_id: TenantId, user_id: UserId, badge_id: BadgeId) -> Self {
        Self {
            tenant_id,
            user_id,
            badge_id,
            earned_at: Utc::now(),
        }
    }
}

/// One multiple-choice question of a final challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Index into `options`
    pub correct_answer: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Answer as submitted by the learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_index: usize,
    pub selected: i64,
}

/// Final challenge for one (course, level). Unique per pair.
#[derive(Debug, Clone)]
pub struct FinalChallenge {
    pub id: ChallengeId,
    pub tenant_id: TenantId,
    pub course_id: CourseId,
    pub title: String,
    pub level: ChallengeLevel,
    pub questions: Vec<ChallengeQuestion>,
    pub badge_id: Option<BadgeId>,
    pub time_limit_minutes: Option<i32>,
    pub is_active: bool,
}

/// One try at a challenge level
///
/// `questions` is a snapshot taken when the attempt starts; later edits to
/// the challenge never reach it.
#[derive(Debug, Clone)]
pub struct ChallengeAttempt {
    pub id: AttemptId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub challenge_id: ChallengeId,
    pub course_id: CourseId,
    pub level: ChallengeLevel,
    pub questions: Vec<ChallengeQuestion>,
    pub answers: Vec<SubmittedAnswer>,
    pub score: Score,
    pub time_spent_secs: u32,
    pub started_at: DateTime<Utc>,
    /// `None` while in progress, set exactly once
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChallengeAttempt {
    /// Start an attempt on `challenge` with a private copy of its questions
    pub fn start(user_id: UserId, challenge: &FinalChallenge) -> Self {
        Self {
            id: AttemptId::new(),
            tenant_id: challenge.tenant_id,
            user_id,
            challenge_id: challenge.id,
            course_id: challenge.course_id,
            level: challenge.level,
            questions: challenge.questions.clone(),
            answers: Vec::new(),
            score: Score::ZERO,
            time_spent_secs: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Completed with a score at or above the level threshold
    pub fn is_passed(&self) -> bool {
        self.is_completed() && self.level.is_passing(self.score)
    }

    /// Grade the snapshot and seal the attempt
    pub fn complete(
        &mut self,
        answers: Vec<SubmittedAnswer>,
        time_spent_secs: u32,
    ) -> ProgressionResult<Score> {
        if self.is_completed() {
            return Err(ProgressionError::AlreadyCompleted);
        }
        let (_, score) = score_answers(&self.questions, &answers);
        self.answers = answers;
        self.score = score;
        self.time_spent_secs = time_spent_secs;
        self.completed_at = Some(Utc::now());
        Ok(score)
    }
}

/// Lifecycle of a motivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotivationStatus {
    Pending,
    Confirmed { bonus_paid: bool },
}

/// Peer encouragement that may pay the receiver a one-time bonus
#[derive(Debug, Clone)]
pub struct ChallengeMotivation {
    pub id: MotivationId,
    pub tenant_id: TenantId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub course_id: CourseId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub points_doubled: bool,
}

impl ChallengeMotivation {
    pub fn new(
        tenant_id: TenantId,
        sender_id: UserId,
        receiver_id: UserId,
        course_id: CourseId,
        message: String,
    ) -> Self {
        Self {
            id: MotivationId::new(),
            tenant_id,
            sender_id,
            receiver_id,
            course_id,
            message,
            created_at: Utc::now(),
            confirmed_at: None,
            points_doubled: false,
        }
    }

    pub fn status(&self) -> MotivationStatus {
        match self.confirmed_at {
            None => MotivationStatus::Pending,
            Some(_) => MotivationStatus::Confirmed {
                bonus_paid: self.points_doubled,
            },
        }
    }

    /// Pending -> Confirmed. Only the receiver may confirm, and only once.
    pub fn confirm(&mut self, acting_user: UserId) -> ProgressionResult<()> {
        if acting_user != self.receiver_id {
            return Err(ProgressionError::NotReceiver);
        }
        if self.confirmed_at.is_some() {
            return Err(ProgressionError::AlreadyConfirmed);
        }
        self.confirmed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_points_doubled(&mut self) {
        self.points_doubled = true;
    }
}
