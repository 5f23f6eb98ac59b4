//! Point Ledger Use Case
//!
//! The ledger is the only source of truth for points. Every posting appends
//! an entry and recomputes `total_points = max(0, earned - spent)` under the
//! user's row lock, in the same unit of work as the append.

use std::sync::Arc;

use kernel::id::{TenantId, UserId};
use uuid::Uuid;

use crate::application::config::ProgressionConfig;
use crate::domain::entities::{LedgerSums, PointEntry};
use crate::domain::repository::{LedgerRepository, ProgressionStore, ProgressionTx, UserRepository};
use crate::domain::services::LevelInfo;
use crate::domain::value_objects::{PointSource, PointType};
use crate::error::{ProgressionError, ProgressionResult};

/// A ledger entry together with the total it produced
#[derive(Debug, Clone)]
pub struct LedgerPosting {
    pub entry: PointEntry,
    pub total_points: i64,
}

/// What caused a posting
#[derive(Debug, Clone)]
pub struct PointsReason {
    pub source: PointSource,
    pub source_id: Option<Uuid>,
    pub description: Option<String>,
}

impl PointsReason {
    pub fn new(source: PointSource, source_id: impl Into<Option<Uuid>>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Current balance of a user
#[derive(Debug, Clone)]
pub struct LedgerBalance {
    pub user_id: UserId,
    pub earned: i64,
    pub spent: i64,
    pub total_points: i64,
    pub level: LevelInfo,
}

/// Result of checking one cached total against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub cached_total: i64,
    pub ledger_total: i64,
}

impl Reconciliation {
    pub fn drifted(&self) -> bool {
        self.cached_total != self.ledger_total
    }
}

/// Outcome of auditing every user of a tenant
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub users_checked: usize,
    /// Users whose cached total was repaired
    pub repaired: Vec<Reconciliation>,
}

/// Append an entry and refresh the cached total inside `tx`
///
/// Every point movement of the engine goes through here.
pub(crate) async fn post<T: ProgressionTx>(
    tx: &mut T,
    tenant: TenantId,
    user: UserId,
    amount: i64,
    point_type: PointType,
    reason: PointsReason,
) -> ProgressionResult<LedgerPosting> {
    if amount <= 0 {
        return Err(ProgressionError::Validation(format!(
            "point amount must be positive, got {amount}"
        )));
    }

    tx.lock_user(tenant, user)
        .await?
        .ok_or(ProgressionError::UserNotFound)?;

    let entry = PointEntry::new(
        tenant,
        user,
        amount,
        point_type,
        reason.source,
        reason.source_id,
        reason.description,
    );
    tx.append_entry(&entry).await?;

    let total_points = tx.ledger_sums(tenant, user).await?.projected_total();
    tx.set_total_points(tenant, user, total_points).await?;

    tracing::info!(
        tenant_id = %tenant,
        user_id = %user,
        points = amount,
        point_type = point_type.code(),
        source = %entry.source,
        total_points,
        "Ledger entry posted"
    );

    Ok(LedgerPosting {
        entry,
        total_points,
    })
}

/// Recompute the projection for one user, repairing it if it drifted
async fn reconcile_in<T: ProgressionTx>(
    tx: &mut T,
    tenant: TenantId,
    user: UserId,
) -> ProgressionResult<Reconciliation> {
    let cached = tx
        .lock_user(tenant, user)
        .await?
        .ok_or(ProgressionError::UserNotFound)?;
    let ledger_total = tx.ledger_sums(tenant, user).await?.projected_total();

    let outcome = Reconciliation {
        user_id: user,
        cached_total: cached.total_points,
        ledger_total,
    };
    if outcome.drifted() {
        tx.set_total_points(tenant, user, ledger_total).await?;
        tracing::warn!(
            tenant_id = %tenant,
            user_id = %user,
            cached_total = outcome.cached_total,
            ledger_total,
            "Cached point total drifted from ledger, repaired"
        );
    }
    Ok(outcome)
}

/// Point Ledger Use Case
pub struct PointLedger<S>
where
    S: ProgressionStore,
{
    store: Arc<S>,
    config: Arc<ProgressionConfig>,
}

impl<S> Clone for PointLedger<S>
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

impl<S> PointLedger<S>
where
    S: ProgressionStore,
{
    pub fn new(store: Arc<S>, config: Arc<ProgressionConfig>) -> Self {
        Self { store, config }
    }

    /// Append an `earned` entry
    pub async fn award(
        &self,
        tenant: TenantId,
        user: UserId,
        amount: i64,
        reason: PointsReason,
    ) -> ProgressionResult<LedgerPosting> {
        self.post_committed(tenant, user, amount, PointType::Earned, reason)
            .await
            .inspect_err(ProgressionError::log)
    }

    /// Append a `spent` entry. The total floors at zero; there is no
    /// balance check.
    pub async fn spend(
        &self,
        tenant: TenantId,
        user: UserId,
        amount: i64,
        reason: PointsReason,
    ) -> ProgressionResult<LedgerPosting> {
        self.post_committed(tenant, user, amount, PointType::Spent, reason)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn post_committed(
        &self,
        tenant: TenantId,
        user: UserId,
        amount: i64,
        point_type: PointType,
        reason: PointsReason,
    ) -> ProgressionResult<LedgerPosting> {
        let mut tx = self.store.begin().await?;
        let posting = post(&mut tx, tenant, user, amount, point_type, reason).await?;
        tx.commit().await?;
        Ok(posting)
    }

    pub async fn balance(&self, tenant: TenantId, user: UserId) -> ProgressionResult<LedgerBalance> {
        let mut tx = self.store.begin().await?;
        let found = tx
            .find_user(tenant, user)
            .await?
            .ok_or(ProgressionError::UserNotFound)?;
        let LedgerSums { earned, spent } = tx.ledger_sums(tenant, user).await?;
        drop(tx);

        Ok(LedgerBalance {
            user_id: user,
            earned,
            spent,
            total_points: found.total_points,
            level: LevelInfo::for_points(found.total_points),
        })
    }

    /// Newest entries first. `limit` defaults to the configured page size.
    pub async fn history(
        &self,
        tenant: TenantId,
        user: UserId,
        limit: Option<usize>,
    ) -> ProgressionResult<Vec<PointEntry>> {
        let limit = limit.unwrap_or(self.config.history_page_size);
        let mut tx = self.store.begin().await?;
        tx.find_user(tenant, user)
            .await?
            .ok_or(ProgressionError::UserNotFound)?;
        tx.list_entries(tenant, user, limit).await
    }

    /// Check one user's cached total, repairing drift
    pub async fn reconcile(&self, tenant: TenantId, user: UserId) -> ProgressionResult<Reconciliation> {
        let mut tx = self.store.begin().await?;
        let outcome = reconcile_in(&mut tx, tenant, user)
            .await
            .inspect_err(ProgressionError::log)?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Reconcile every user of the tenant, one unit of work per user
    pub async fn audit_all(&self, tenant: TenantId) -> ProgressionResult<AuditReport> {
        let users = {
            let mut tx = self.store.begin().await?;
            tx.list_user_ids(tenant).await?
        };

        let mut report = AuditReport::default();
        for user in users {
            let outcome = self.reconcile(tenant, user).await?;
            report.users_checked += 1;
            if outcome.drifted() {
                report.repaired.push(outcome);
            }
        }

        tracing::info!(
            tenant_id = %tenant,
            users_checked = report.users_checked,
            repaired = report.repaired.len(),
            "Ledger audit finished"
        );
        Ok(report)
    }
}
