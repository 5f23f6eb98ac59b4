//! Challenge Progression Use Case
//!
//! Three-level final challenge per course. Easy is always open; medium and
//! hard open once some completed attempt at the previous level passed.
//! Attempts may be retried without limit.

use std::sync::Arc;

use kernel::id::{AttemptId, CourseId, TenantId, UserId};

use crate::application::badge_awarder::{self, BadgeAwarder, BadgeCriteria};
use crate::domain::entities::{ChallengeAttempt, SubmittedAnswer};
use crate::domain::repository::{
    BadgeRepository, ChallengeRepository, EnrollmentRepository, ProgressionStore, ProgressionTx,
    UserRepository,
};
use crate::domain::services::{LevelProgress, score_answers};
use crate::domain::value_objects::{ChallengeLevel, Grade, PointSource, Score};
use crate::error::{ProgressionError, ProgressionResult};

/// Output of a submission
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub attempt: ChallengeAttempt,
    pub score: Score,
    pub grade: Grade,
    pub passed: bool,
    pub correct_answers: usize,
    pub total_questions: usize,
    pub all_levels_passed: bool,
    /// Points paid for the completion badge in this call
    pub completion_points: i64,
    /// Badges newly granted in this call, the completion badge included
    pub badges_granted: usize,
}

/// One level of a course's challenge, from the user's point of view
#[derive(Debug, Clone)]
pub struct LevelStatus {
    pub level: ChallengeLevel,
    pub unlocked: bool,
    pub passed: bool,
    pub best_score: Option<Score>,
    /// Completed attempts, most recent first
    pub attempts: Vec<ChallengeAttempt>,
}

/// The user's challenge standing in one course
#[derive(Debug, Clone)]
pub struct ChallengeOverview {
    pub course_id: CourseId,
    pub levels: Vec<LevelStatus>,
    pub all_levels_passed: bool,
    /// Lowest level that is open and not yet passed
    pub next_level: Option<ChallengeLevel>,
}

/// Challenge Progression Use Case
pub struct ChallengeProgression<S, C>
where
    S: ProgressionStore,
    C: BadgeCriteria,
{
    store: Arc<S>,
    badges: BadgeAwarder<S, C>,
}

impl<S, C> ChallengeProgression<S, C>
where
    S: ProgressionStore,
    C: BadgeCriteria,
{
    pub fn new(store: Arc<S>, badges: BadgeAwarder<S, C>) -> Self {
        Self { store, badges }
    }

    /// Open a new attempt at `level` with a snapshot of its questions
    pub async fn start(
        &self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
        level: ChallengeLevel,
    ) -> ProgressionResult<ChallengeAttempt> {
        self.start_inner(tenant, user, course, level)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn start_inner(
        &self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
        level: ChallengeLevel,
    ) -> ProgressionResult<ChallengeAttempt> {
        let mut tx = self.store.begin().await?;
        if !tx.is_enrolled(tenant, user, course).await? {
            return Err(ProgressionError::NotEnrolled);
        }

        if level.prerequisite().is_some() {
            let attempts = tx.list_completed_attempts(tenant, user, course).await?;
            if !LevelProgress::from_attempts(&attempts).is_unlocked(level) {
                tracing::warn!(user_id = %user, course_id = %course, level = %level, "Challenge level locked");
                return Err(ProgressionError::LevelLocked);
            }
        }

        let challenge = tx
            .find_active_challenge(tenant, course, level)
            .await?
            .ok_or(ProgressionError::ChallengeNotFound)?;

        let attempt = ChallengeAttempt::start(user, &challenge);
        tx.insert_attempt(&attempt).await?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            user_id = %user,
            attempt_id = %attempt.id,
            challenge_id = %challenge.id,
            level = %level,
            questions = attempt.questions.len(),
            "Challenge attempt started"
        );
        Ok(attempt)
    }

    /// Grade and seal an attempt owned by `user`
    ///
    /// When this submission makes all three levels passed for the first
    /// time, the challenge's badge is granted and every other badge is
    /// re-evaluated, all in the same unit of work.
    pub async fn submit(
        &self,
        tenant: TenantId,
        user: UserId,
        attempt: AttemptId,
        answers: Vec<SubmittedAnswer>,
        time_spent_secs: u32,
    ) -> ProgressionResult<SubmissionResult> {
        self.submit_inner(tenant, user, attempt, answers, time_spent_secs)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn submit_inner(
        &self,
        tenant: TenantId,
        user: UserId,
        attempt: AttemptId,
        answers: Vec<SubmittedAnswer>,
        time_spent_secs: u32,
    ) -> ProgressionResult<SubmissionResult> {
        let mut tx = self.store.begin().await?;
        // serialises this user's submissions so "first time" is decided once
        tx.lock_user(tenant, user)
            .await?
            .ok_or(ProgressionError::UserNotFound)?;

        let mut attempt = tx
            .lock_attempt(tenant, attempt)
            .await?
            .filter(|a| a.user_id == user)
            .ok_or(ProgressionError::AttemptNotFound)?;
        if attempt.is_completed() {
            return Err(ProgressionError::AlreadyCompleted);
        }

        let history = tx
            .list_completed_attempts(tenant, user, attempt.course_id)
            .await?;
        let before = LevelProgress::from_attempts(&history);

        let (correct_answers, _) = score_answers(&attempt.questions, &answers);
        let score = attempt.complete(answers, time_spent_secs)?;
        tx.complete_attempt(&attempt).await?;

        let mut after = before;
        after.record(&attempt);
        let passed = attempt.is_passed();

        let mut result = SubmissionResult {
            score,
            grade: Grade::for_score(score),
            passed,
            correct_answers,
            total_questions: attempt.questions.len(),
            all_levels_passed: after.all_passed(),
            completion_points: 0,
            badges_granted: 0,
            attempt,
        };

        if !before.all_passed() && after.all_passed() {
            self.reward_completion(&mut tx, tenant, user, &mut result).await?;
        }

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            user_id = %user,
            attempt_id = %result.attempt.id,
            level = %result.attempt.level,
            score = %score,
            passed,
            "Challenge attempt submitted"
        );
        Ok(result)
    }

    async fn reward_completion(
        &self,
        tx: &mut S::Tx,
        tenant: TenantId,
        user: UserId,
        result: &mut SubmissionResult,
    ) -> ProgressionResult<()> {
        let challenge = tx
            .find_challenge(tenant, result.attempt.challenge_id)
            .await?
            .ok_or(ProgressionError::ChallengeNotFound)?;

        tracing::info!(
            user_id = %user,
            course_id = %challenge.course_id,
            "All challenge levels passed"
        );

        if let Some(badge_id) = challenge.badge_id {
            match tx.find_badge(tenant, badge_id).await? {
                Some(badge) => {
                    let grant = badge_awarder::grant_in(
                        tx,
                        tenant,
                        user,
                        &badge,
                        PointSource::FinalChallenge,
                        challenge.id.into_uuid(),
                    )
                    .await?;
                    result.completion_points = grant.points_awarded;
                    result.badges_granted += usize::from(grant.newly_granted);
                }
                None => {
                    tracing::warn!(
                        challenge_id = %challenge.id,
                        badge_id = %badge_id,
                        "Completion badge missing, skipped"
                    );
                }
            }
        }

        result.badges_granted += self.badges.evaluate_all_in(tx, tenant, user).await?;
        Ok(())
    }

    /// Per-level standing of the user in `course`
    pub async fn progress(
        &self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<ChallengeOverview> {
        let mut tx = self.store.begin().await?;
        let attempts = tx.list_completed_attempts(tenant, user, course).await?;
        let progress = LevelProgress::from_attempts(&attempts);

        let levels = ChallengeLevel::ALL
            .into_iter()
            .map(|level| {
                let at_level: Vec<ChallengeAttempt> = attempts
                    .iter()
                    .filter(|a| a.level == level)
                    .cloned()
                    .collect();
                LevelStatus {
                    level,
                    unlocked: progress.is_unlocked(level),
                    passed: progress.passed(level),
                    best_score: at_level.iter().map(|a| a.score).max(),
                    attempts: at_level,
                }
            })
            .collect();

        Ok(ChallengeOverview {
            course_id: course,
            levels,
            all_levels_passed: progress.all_passed(),
            next_level: progress.next_level(),
        })
    }
}
