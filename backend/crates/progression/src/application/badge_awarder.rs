//! Badge Awarder Use Case
//!
//! Every badge grant goes through [`grant_in`]: create-if-absent on the
//! user's badge row, with points only when the row was newly created.
//! Criteria matching itself is supplied by the caller as a [`BadgeCriteria`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::{BadgeId, TenantId, UserId};
use uuid::Uuid;

use crate::application::point_ledger::{self, PointsReason};
use crate::domain::entities::{Badge, UserBadge};
use crate::domain::repository::{
    ActivityRepository, BadgeRepository, ProgressionStore, ProgressionTx, UserRepository,
};
use crate::domain::value_objects::{PointSource, PointType};
use crate::error::{ProgressionError, ProgressionResult};

/// Derived stats a badge rule is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_points: i64,
    pub completed_activities: u64,
    pub badges_earned: usize,
}

/// External badge rule evaluator
pub trait BadgeCriteria: Send + Sync {
    fn is_satisfied(&self, badge: &Badge, stats: &UserStats) -> bool;
}

impl<F> BadgeCriteria for F
where
    F: Fn(&Badge, &UserStats) -> bool + Send + Sync,
{
    fn is_satisfied(&self, badge: &Badge, stats: &UserStats) -> bool {
        self(badge, stats)
    }
}

/// Outcome of one grant
#[derive(Debug, Clone)]
pub struct BadgeGrant {
    pub badge_id: BadgeId,
    /// `false` when the user already held the badge
    pub newly_granted: bool,
    pub points_awarded: i64,
}

/// A badge the user holds
#[derive(Debug, Clone)]
pub struct EarnedBadge {
    pub badge: Badge,
    pub earned_at: DateTime<Utc>,
}

/// Grant `badge` to `user` if they do not hold it yet
pub(crate) async fn grant_in<T: ProgressionTx>(
    tx: &mut T,
    tenant: TenantId,
    user: UserId,
    badge: &Badge,
    source: PointSource,
    source_id: Uuid,
) -> ProgressionResult<BadgeGrant> {
    let created = tx
        .insert_user_badge(&UserBadge::new(tenant, user, badge.id))
        .await?;

    if !created {
        tracing::debug!(user_id = %user, badge_id = %badge.id, "Badge already held");
        return Ok(BadgeGrant {
            badge_id: badge.id,
            newly_granted: false,
            points_awarded: 0,
        });
    }

    let mut points_awarded = 0;
    if badge.points_value > 0 {
        let reason = PointsReason::new(source, source_id)
            .with_description(format!("Badge earned: {}", badge.name));
        point_ledger::post(tx, tenant, user, badge.points_value, PointType::Earned, reason).await?;
        points_awarded = badge.points_value;
    }

    tracing::info!(
        tenant_id = %tenant,
        user_id = %user,
        badge_id = %badge.id,
        points = points_awarded,
        "Badge granted"
    );

    Ok(BadgeGrant {
        badge_id: badge.id,
        newly_granted: true,
        points_awarded,
    })
}

/// Badge Awarder Use Case
pub struct BadgeAwarder<S, C>
where
    S: ProgressionStore,
    C: BadgeCriteria,
{
    store: Arc<S>,
    criteria: Arc<C>,
}

impl<S, C> Clone for BadgeAwarder<S, C>
where
    S: ProgressionStore,
    C: BadgeCriteria,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            criteria: Arc::clone(&self.criteria),
        }
    }
}

impl<S, C> BadgeAwarder<S, C>
where
    S: ProgressionStore,
    C: BadgeCriteria,
{
    pub fn new(store: Arc<S>, criteria: Arc<C>) -> Self {
        Self { store, criteria }
    }

    /// Grant every active badge whose criteria the user now meets.
    /// Returns the number of badges newly granted.
    pub async fn evaluate_all(&self, tenant: TenantId, user: UserId) -> ProgressionResult<usize> {
        let run = async {
            let mut tx = self.store.begin().await?;
            let granted = self.evaluate_all_in(&mut tx, tenant, user).await?;
            tx.commit().await?;
            Ok::<_, ProgressionError>(granted)
        };
        run.await.inspect_err(ProgressionError::log)
    }

    pub(crate) async fn evaluate_all_in<T: ProgressionTx>(
        &self,
        tx: &mut T,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<usize> {
        let found = tx
            .find_user(tenant, user)
            .await?
            .ok_or(ProgressionError::UserNotFound)?;
        let held: HashSet<BadgeId> = tx
            .list_user_badges(tenant, user)
            .await?
            .into_iter()
            .map(|ub| ub.badge_id)
            .collect();

        let mut stats = UserStats {
            total_points: found.total_points,
            completed_activities: tx.count_completed_activities(tenant, user).await?,
            badges_earned: held.len(),
        };

        let mut granted = 0;
        for badge in tx.list_active_badges(tenant).await? {
            if held.contains(&badge.id) || !self.criteria.is_satisfied(&badge, &stats) {
                continue;
            }
            let grant = grant_in(tx, tenant, user, &badge, PointSource::Badge, badge.id.into_uuid())
                .await?;
            if grant.newly_granted {
                granted += 1;
                stats.badges_earned += 1;
                stats.total_points += grant.points_awarded;
            }
        }

        if granted == 0 {
            tracing::debug!(user_id = %user, "No new badges earned");
        }
        Ok(granted)
    }

    /// Grant one badge directly, regardless of criteria
    pub async fn grant(
        &self,
        tenant: TenantId,
        user: UserId,
        badge: BadgeId,
    ) -> ProgressionResult<BadgeGrant> {
        let run = async {
            let mut tx = self.store.begin().await?;
            tx.find_user(tenant, user)
                .await?
                .ok_or(ProgressionError::UserNotFound)?;
            let badge = tx
                .find_badge(tenant, badge)
                .await?
                .ok_or(ProgressionError::BadgeNotFound)?;
            let grant =
                grant_in(&mut tx, tenant, user, &badge, PointSource::Badge, badge.id.into_uuid())
                    .await?;
            tx.commit().await?;
            Ok::<_, ProgressionError>(grant)
        };
        run.await.inspect_err(ProgressionError::log)
    }

    /// Badges the user holds, most recently earned first
    pub async fn earned_badges(
        &self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<Vec<EarnedBadge>> {
        let mut tx = self.store.begin().await?;
        let mut held = tx.list_user_badges(tenant, user).await?;
        held.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));

        let mut earned = Vec::with_capacity(held.len());
        for user_badge in held {
            if let Some(badge) = tx.find_badge(tenant, user_badge.badge_id).await? {
                earned.push(EarnedBadge {
                    badge,
                    earned_at: user_badge.earned_at,
                });
            }
        }
        Ok(earned)
    }
}
