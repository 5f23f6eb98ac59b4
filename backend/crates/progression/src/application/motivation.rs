//! Motivation Incentive Use Case
//!
//! A user who passed every challenge level of a course may encourage up to
//! a handful of peers. Confirming a motivation pays the receiver a one-time
//! bonus if they have a passing attempt in that course.

use std::collections::HashSet;
use std::sync::Arc;

use kernel::id::{CourseId, MotivationId, TenantId, UserId};

use crate::application::config::ProgressionConfig;
use crate::application::point_ledger::{self, PointsReason};
use crate::domain::entities::{ChallengeAttempt, ChallengeMotivation};
use crate::domain::repository::{
    BadgeRepository, ChallengeRepository, MotivationRepository, ProgressionStore, ProgressionTx,
    UserRepository,
};
use crate::domain::services::{LevelProgress, latest_passing_attempt};
use crate::domain::value_objects::{PointSource, PointType};
use crate::error::{ProgressionError, ProgressionResult};

/// Output of a confirmation
#[derive(Debug, Clone)]
pub struct MotivationConfirmation {
    pub motivation: ChallengeMotivation,
    /// Zero when no qualifying attempt existed
    pub bonus_awarded: i64,
    /// Receiver total after the bonus, when one was paid
    pub total_points: Option<i64>,
}

/// Motivation Incentive Use Case
pub struct MotivationIncentive<S>
where
    S: ProgressionStore,
{
    store: Arc<S>,
    config: Arc<ProgressionConfig>,
}

impl<S> Clone for MotivationIncentive<S>
where
    S: ProgressionStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S> MotivationIncentive<S>
where
    S: ProgressionStore,
{
    pub fn new(store: Arc<S>, config: Arc<ProgressionConfig>) -> Self {
        Self { store, config }
    }

    /// Send a motivation to each receiver. The sender and receivers that
    /// already got one from this sender for the course are skipped.
    /// Returns how many were created.
    pub async fn send(
        &self,
        tenant: TenantId,
        sender: UserId,
        receivers: &[UserId],
        course: CourseId,
        message: &str,
    ) -> ProgressionResult<usize> {
        self.send_inner(tenant, sender, receivers, course, message)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn send_inner(
        &self,
        tenant: TenantId,
        sender: UserId,
        receivers: &[UserId],
        course: CourseId,
        message: &str,
    ) -> ProgressionResult<usize> {
        self.validate_send(receivers, message)?;
        let message = message.trim();

        let mut tx = self.store.begin().await?;
        tx.find_user(tenant, sender)
            .await?
            .ok_or(ProgressionError::UserNotFound)?;

        let attempts = tx.list_completed_attempts(tenant, sender, course).await?;
        if !LevelProgress::from_attempts(&attempts).all_passed() {
            tracing::warn!(user_id = %sender, course_id = %course, "Sender has not passed every level");
            return Err(ProgressionError::ChallengeNotPassed);
        }

        for receiver in receivers {
            if tx.find_user(tenant, *receiver).await?.is_none() {
                return Err(ProgressionError::Validation(format!(
                    "unknown receiver {receiver}"
                )));
            }
        }

        let mut seen = HashSet::new();
        let mut created = 0;
        for &receiver in receivers {
            if receiver == sender || !seen.insert(receiver) {
                continue;
            }
            let motivation =
                ChallengeMotivation::new(tenant, sender, receiver, course, message.to_string());
            if tx.insert_motivation(&motivation).await? {
                created += 1;
            } else {
                tracing::debug!(sender_id = %sender, receiver_id = %receiver, "Motivation already sent");
            }
        }
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            sender_id = %sender,
            course_id = %course,
            created,
            "Motivations sent"
        );
        Ok(created)
    }

    fn validate_send(&self, receivers: &[UserId], message: &str) -> ProgressionResult<()> {
        if receivers.is_empty() {
            return Err(ProgressionError::Validation("at least one receiver is required".into()));
        }
        if receivers.len() > self.config.max_motivation_receivers {
            return Err(ProgressionError::Validation(format!(
                "at most {} receivers are allowed",
                self.config.max_motivation_receivers
            )));
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(ProgressionError::Validation("message must not be empty".into()));
        }
        if message.chars().count() > self.config.max_motivation_message_len {
            return Err(ProgressionError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_motivation_message_len
            )));
        }
        Ok(())
    }

    /// Confirm a received motivation, paying the bonus at most once
    ///
    /// With no passing attempt in the course the motivation is still
    /// confirmed, and it never pays afterwards.
    pub async fn confirm(
        &self,
        tenant: TenantId,
        motivation: MotivationId,
        acting_user: UserId,
    ) -> ProgressionResult<MotivationConfirmation> {
        self.confirm_inner(tenant, motivation, acting_user)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn confirm_inner(
        &self,
        tenant: TenantId,
        motivation: MotivationId,
        acting_user: UserId,
    ) -> ProgressionResult<MotivationConfirmation> {
        let mut tx = self.store.begin().await?;
        let mut motivation = tx
            .lock_motivation(tenant, motivation)
            .await?
            .ok_or(ProgressionError::MotivationNotFound)?;
        motivation.confirm(acting_user)?;

        let mut bonus_awarded = 0;
        let mut total_points = None;

        if !motivation.points_doubled {
            let attempts = tx
                .list_completed_attempts(tenant, motivation.receiver_id, motivation.course_id)
                .await?;

            match latest_passing_attempt(&attempts) {
                Some(attempt) => {
                    let bonus = self.bonus_for(&mut tx, tenant, attempt).await?;
                    if bonus > 0 {
                        let reason = PointsReason::new(PointSource::Motivation, motivation.id.into_uuid())
                            .with_description("Motivation bonus");
                        let posting = point_ledger::post(
                            &mut tx,
                            tenant,
                            motivation.receiver_id,
                            bonus,
                            PointType::Earned,
                            reason,
                        )
                        .await?;
                        bonus_awarded = bonus;
                        total_points = Some(posting.total_points);
                    }
                    motivation.mark_points_doubled();
                }
                None => {
                    tracing::info!(
                        motivation_id = %motivation.id,
                        receiver_id = %motivation.receiver_id,
                        "No passing attempt, motivation confirmed without bonus"
                    );
                }
            }
        }

        tx.update_motivation(&motivation).await?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            motivation_id = %motivation.id,
            receiver_id = %motivation.receiver_id,
            bonus = bonus_awarded,
            "Motivation confirmed"
        );

        Ok(MotivationConfirmation {
            motivation,
            bonus_awarded,
            total_points,
        })
    }

    /// Badge value of the attempt's challenge, or the configured default
    async fn bonus_for(
        &self,
        tx: &mut S::Tx,
        tenant: TenantId,
        attempt: &ChallengeAttempt,
    ) -> ProgressionResult<i64> {
        let badge_id = tx
            .find_challenge(tenant, attempt.challenge_id)
            .await?
            .and_then(|challenge| challenge.badge_id);

        let badge = match badge_id {
            Some(id) => tx.find_badge(tenant, id).await?,
            None => None,
        };
        Ok(badge.map_or(self.config.default_motivation_bonus, |b| b.points_value))
    }

    /// Motivations the user received, newest first
    pub async fn received(
        &self,
        tenant: TenantId,
        user: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        let mut tx = self.store.begin().await?;
        tx.list_received(tenant, user, course).await
    }

    /// Motivations the user sent, newest first
    pub async fn sent(
        &self,
        tenant: TenantId,
        user: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        let mut tx = self.store.begin().await?;
        tx.list_sent(tenant, user, course).await
    }
}
