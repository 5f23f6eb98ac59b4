//! PostgreSQL Repository Implementations
//!
//! One [`PgProgressionTx`] wraps one database transaction. Row locks are
//! `SELECT ... FOR UPDATE`; create-if-absent writes rely on the schema's
//! unique constraints with `ON CONFLICT DO NOTHING`.

use chrono::{DateTime, Utc};
use kernel::id::{
    ActivityId, AttemptId, BadgeId, ChallengeId, CourseId, MotivationId, TenantId, UserId,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::entities::{
    Activity, Badge, ChallengeAttempt, ChallengeMotivation, ChallengeQuestion, FinalChallenge,
    LedgerSums, PointEntry, SubmittedAnswer, User, UserActivity, UserBadge,
};
use crate::domain::repository::{
    ActivityRepository, BadgeRepository, ChallengeRepository, EnrollmentRepository,
    LedgerRepository, MotivationRepository, ProgressionStore, ProgressionTx, UserRepository,
};
use crate::domain::value_objects::{ActivityType, ChallengeLevel, PointSource, PointType, Score};
use crate::error::{ProgressionError, ProgressionResult};

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgProgressionStore {
    pool: PgPool,
}

impl PgProgressionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tenants that own at least one user
    pub async fn list_tenants(&self) -> ProgressionResult<Vec<TenantId>> {
        let rows = sqlx::query_scalar::<_, Uuid>("SELECT DISTINCT tenant_id FROM users")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TenantId::from_uuid).collect())
    }
}

impl ProgressionStore for PgProgressionStore {
    type Tx = PgProgressionTx;

    async fn begin(&self) -> ProgressionResult<PgProgressionTx> {
        Ok(PgProgressionTx {
            tx: self.pool.begin().await?,
        })
    }
}

/// Unit of work over one PostgreSQL transaction
pub struct PgProgressionTx {
    tx: Transaction<'static, Postgres>,
}

impl ProgressionTx for PgProgressionTx {
    async fn commit(self) -> ProgressionResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

const USER_COLUMNS: &str = "user_id, tenant_id, name, total_points";

impl UserRepository for PgProgressionTx {
    async fn find_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 AND user_id = $2"
        ))
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserRow::into_user))
    }

    async fn lock_user(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserRow::into_user))
    }

    async fn set_total_points(
        &mut self,
        tenant: TenantId,
        user: UserId,
        total_points: i64,
    ) -> ProgressionResult<()> {
        let result = sqlx::query(
            "UPDATE users SET total_points = $3, updated_at = now() WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(total_points)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProgressionError::UserNotFound);
        }
        Ok(())
    }

    async fn list_user_ids(&mut self, tenant: TenantId) -> ProgressionResult<Vec<UserId>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM users WHERE tenant_id = $1 ORDER BY user_id",
        )
        .bind(tenant.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(UserId::from_uuid).collect())
    }
}

impl LedgerRepository for PgProgressionTx {
    async fn append_entry(&mut self, entry: &PointEntry) -> ProgressionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO point_entries (
                point_entry_id,
                tenant_id,
                user_id,
                points,
                point_type,
                source,
                source_id,
                description,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.into_uuid())
        .bind(entry.tenant_id.into_uuid())
        .bind(entry.user_id.into_uuid())
        .bind(entry.points)
        .bind(entry.point_type.code())
        .bind(entry.source.code())
        .bind(entry.source_id)
        .bind(entry.description.as_deref())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn ledger_sums(&mut self, tenant: TenantId, user: UserId) -> ProgressionResult<LedgerSums> {
        let (earned, spent) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COALESCE(SUM(points) FILTER (WHERE point_type = 'earned'), 0)::BIGINT,
                COALESCE(SUM(points) FILTER (WHERE point_type = 'spent'), 0)::BIGINT
            FROM point_entries
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(LedgerSums { earned, spent })
    }

    async fn list_entries(
        &mut self,
        tenant: TenantId,
        user: UserId,
        limit: usize,
    ) -> ProgressionResult<Vec<PointEntry>> {
        let rows = sqlx::query_as::<_, PointEntryRow>(
            r#"
            SELECT
                point_entry_id,
                tenant_id,
                user_id,
                points,
                point_type,
                source,
                source_id,
                description,
                created_at
            FROM point_entries
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY created_at DESC, point_entry_id DESC
            LIMIT $3
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(PointEntryRow::into_entry).collect()
    }
}

impl EnrollmentRepository for PgProgressionTx {
    async fn is_enrolled(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<bool> {
        let enrolled = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM course_enrollments
                WHERE tenant_id = $1 AND user_id = $2 AND course_id = $3
            )
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(course.into_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(enrolled)
    }
}

const ACTIVITY_COLUMNS: &str =
    "activity_id, tenant_id, course_id, title, activity_type, sort_order, points_value, is_active";
const USER_ACTIVITY_COLUMNS: &str =
    "tenant_id, user_id, activity_id, started_at, completed_at, score, attempts, metadata";

impl ActivityRepository for PgProgressionTx {
    async fn find_activity(
        &mut self,
        tenant: TenantId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<Activity>> {
        let row = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE tenant_id = $1 AND activity_id = $2 AND is_active"
        ))
        .bind(tenant.into_uuid())
        .bind(activity.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ActivityRow::into_activity).transpose()
    }

    async fn find_preceding_activity(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        order: i32,
    ) -> ProgressionResult<Option<Activity>> {
        let row = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE tenant_id = $1 AND course_id = $2 AND sort_order < $3 AND is_active
             ORDER BY sort_order DESC
             LIMIT 1"
        ))
        .bind(tenant.into_uuid())
        .bind(course.into_uuid())
        .bind(order)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ActivityRow::into_activity).transpose()
    }

    async fn list_course_activities(
        &mut self,
        tenant: TenantId,
        course: CourseId,
    ) -> ProgressionResult<Vec<Activity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE tenant_id = $1 AND course_id = $2 AND is_active
             ORDER BY sort_order"
        ))
        .bind(tenant.into_uuid())
        .bind(course.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(ActivityRow::into_activity).collect()
    }

    async fn find_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>> {
        let row = sqlx::query_as::<_, UserActivityRow>(&format!(
            "SELECT {USER_ACTIVITY_COLUMNS} FROM user_activities
             WHERE tenant_id = $1 AND user_id = $2 AND activity_id = $3"
        ))
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(activity.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserActivityRow::into_user_activity))
    }

    async fn lock_user_activity(
        &mut self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<Option<UserActivity>> {
        let row = sqlx::query_as::<_, UserActivityRow>(&format!(
            "SELECT {USER_ACTIVITY_COLUMNS} FROM user_activities
             WHERE tenant_id = $1 AND user_id = $2 AND activity_id = $3
             FOR UPDATE"
        ))
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(activity.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserActivityRow::into_user_activity))
    }

    async fn insert_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_activities (
                tenant_id,
                user_id,
                activity_id,
                started_at,
                completed_at,
                score,
                attempts,
                metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, user_id, activity_id) DO NOTHING
            "#,
        )
        .bind(user_activity.tenant_id.into_uuid())
        .bind(user_activity.user_id.into_uuid())
        .bind(user_activity.activity_id.into_uuid())
        .bind(user_activity.started_at)
        .bind(user_activity.completed_at)
        .bind(user_activity.score.map(i16::from))
        .bind(int4("attempts", user_activity.attempts)?)
        .bind(Json(&user_activity.metadata))
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_user_activity(&mut self, user_activity: &UserActivity) -> ProgressionResult<()> {
        sqlx::query(
            r#"
            UPDATE user_activities
            SET completed_at = $4, score = $5, attempts = $6, metadata = $7
            WHERE tenant_id = $1 AND user_id = $2 AND activity_id = $3
            "#,
        )
        .bind(user_activity.tenant_id.into_uuid())
        .bind(user_activity.user_id.into_uuid())
        .bind(user_activity.activity_id.into_uuid())
        .bind(user_activity.completed_at)
        .bind(user_activity.score.map(i16::from))
        .bind(int4("attempts", user_activity.attempts)?)
        .bind(Json(&user_activity.metadata))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_user_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<UserActivity>> {
        let rows = sqlx::query_as::<_, UserActivityRow>(
            r#"
            SELECT
                ua.tenant_id,
                ua.user_id,
                ua.activity_id,
                ua.started_at,
                ua.completed_at,
                ua.score,
                ua.attempts,
                ua.metadata
            FROM user_activities ua
            JOIN activities a
              ON a.tenant_id = ua.tenant_id AND a.activity_id = ua.activity_id
            WHERE ua.tenant_id = $1 AND ua.user_id = $2 AND a.course_id = $3
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(course.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(UserActivityRow::into_user_activity).collect())
    }

    async fn count_completed_activities(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM user_activities
            WHERE tenant_id = $1 AND user_id = $2 AND completed_at IS NOT NULL
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count.max(0) as u64)
    }
}

const CHALLENGE_COLUMNS: &str = "challenge_id, tenant_id, course_id, title, difficulty_level, \
     questions, badge_id, time_limit_minutes, is_active";
const ATTEMPT_COLUMNS: &str = "attempt_id, tenant_id, user_id, challenge_id, course_id, \
     difficulty_level, questions, answers, score_hundredths, time_spent_secs, started_at, completed_at";

impl ChallengeRepository for PgProgressionTx {
    async fn find_active_challenge(
        &mut self,
        tenant: TenantId,
        course: CourseId,
        level: ChallengeLevel,
    ) -> ProgressionResult<Option<FinalChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM final_challenges
             WHERE tenant_id = $1 AND course_id = $2 AND difficulty_level = $3 AND is_active"
        ))
        .bind(tenant.into_uuid())
        .bind(course.into_uuid())
        .bind(level.code())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn find_challenge(
        &mut self,
        tenant: TenantId,
        challenge: ChallengeId,
    ) -> ProgressionResult<Option<FinalChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM final_challenges
             WHERE tenant_id = $1 AND challenge_id = $2"
        ))
        .bind(tenant.into_uuid())
        .bind(challenge.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn insert_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO challenge_attempts (
                attempt_id,
                tenant_id,
                user_id,
                challenge_id,
                course_id,
                difficulty_level,
                questions,
                answers,
                score_hundredths,
                time_spent_secs,
                started_at,
                completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attempt.id.into_uuid())
        .bind(attempt.tenant_id.into_uuid())
        .bind(attempt.user_id.into_uuid())
        .bind(attempt.challenge_id.into_uuid())
        .bind(attempt.course_id.into_uuid())
        .bind(attempt.level.code())
        .bind(Json(&attempt.questions))
        .bind(Json(&attempt.answers))
        .bind(i32::from(attempt.score.hundredths()))
        .bind(int4("time_spent_secs", attempt.time_spent_secs)?)
        .bind(attempt.started_at)
        .bind(attempt.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_attempt(
        &mut self,
        tenant: TenantId,
        attempt: AttemptId,
    ) -> ProgressionResult<Option<ChallengeAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM challenge_attempts
             WHERE tenant_id = $1 AND attempt_id = $2
             FOR UPDATE"
        ))
        .bind(tenant.into_uuid())
        .bind(attempt.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(AttemptRow::into_attempt).transpose()
    }

    async fn complete_attempt(&mut self, attempt: &ChallengeAttempt) -> ProgressionResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE challenge_attempts
            SET answers = $3, score_hundredths = $4, time_spent_secs = $5, completed_at = $6
            WHERE tenant_id = $1 AND attempt_id = $2 AND completed_at IS NULL
            "#,
        )
        .bind(attempt.tenant_id.into_uuid())
        .bind(attempt.id.into_uuid())
        .bind(Json(&attempt.answers))
        .bind(i32::from(attempt.score.hundredths()))
        .bind(int4("time_spent_secs", attempt.time_spent_secs)?)
        .bind(attempt.completed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProgressionError::AlreadyCompleted);
        }
        Ok(())
    }

    async fn list_completed_attempts(
        &mut self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<Vec<ChallengeAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM challenge_attempts
             WHERE tenant_id = $1 AND user_id = $2 AND course_id = $3
               AND completed_at IS NOT NULL
             ORDER BY completed_at DESC"
        ))
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .bind(course.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(AttemptRow::into_attempt).collect()
    }
}

const BADGE_COLUMNS: &str = "badge_id, tenant_id, name, criteria, points_value, is_active";

impl BadgeRepository for PgProgressionTx {
    async fn find_badge(&mut self, tenant: TenantId, badge: BadgeId) -> ProgressionResult<Option<Badge>> {
        let row = sqlx::query_as::<_, BadgeRow>(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges WHERE tenant_id = $1 AND badge_id = $2"
        ))
        .bind(tenant.into_uuid())
        .bind(badge.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(BadgeRow::into_badge))
    }

    async fn list_active_badges(&mut self, tenant: TenantId) -> ProgressionResult<Vec<Badge>> {
        let rows = sqlx::query_as::<_, BadgeRow>(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges WHERE tenant_id = $1 AND is_active ORDER BY name"
        ))
        .bind(tenant.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(BadgeRow::into_badge).collect())
    }

    async fn insert_user_badge(&mut self, user_badge: &UserBadge) -> ProgressionResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_badges (tenant_id, user_id, badge_id, earned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, user_id, badge_id) DO NOTHING
            "#,
        )
        .bind(user_badge.tenant_id.into_uuid())
        .bind(user_badge.user_id.into_uuid())
        .bind(user_badge.badge_id.into_uuid())
        .bind(user_badge.earned_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_user_badges(
        &mut self,
        tenant: TenantId,
        user: UserId,
    ) -> ProgressionResult<Vec<UserBadge>> {
        let rows = sqlx::query_as::<_, UserBadgeRow>(
            r#"
            SELECT tenant_id, user_id, badge_id, earned_at
            FROM user_badges
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY earned_at DESC
            "#,
        )
        .bind(tenant.into_uuid())
        .bind(user.into_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(UserBadgeRow::into_user_badge).collect())
    }
}

const MOTIVATION_COLUMNS: &str = "motivation_id, tenant_id, sender_id, receiver_id, course_id, \
     message, created_at, confirmed_at, points_doubled";

impl MotivationRepository for PgProgressionTx {
    async fn insert_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO challenge_motivations (
                motivation_id,
                tenant_id,
                sender_id,
                receiver_id,
                course_id,
                message,
                created_at,
                confirmed_at,
                points_doubled
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id, sender_id, receiver_id, course_id) DO NOTHING
            "#,
        )
        .bind(motivation.id.into_uuid())
        .bind(motivation.tenant_id.into_uuid())
        .bind(motivation.sender_id.into_uuid())
        .bind(motivation.receiver_id.into_uuid())
        .bind(motivation.course_id.into_uuid())
        .bind(&motivation.message)
        .bind(motivation.created_at)
        .bind(motivation.confirmed_at)
        .bind(motivation.points_doubled)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_motivation(
        &mut self,
        tenant: TenantId,
        motivation: MotivationId,
    ) -> ProgressionResult<Option<ChallengeMotivation>> {
        let row = sqlx::query_as::<_, MotivationRow>(&format!(
            "SELECT {MOTIVATION_COLUMNS} FROM challenge_motivations
             WHERE tenant_id = $1 AND motivation_id = $2
             FOR UPDATE"
        ))
        .bind(tenant.into_uuid())
        .bind(motivation.into_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(MotivationRow::into_motivation))
    }

    async fn update_motivation(&mut self, motivation: &ChallengeMotivation) -> ProgressionResult<()> {
        sqlx::query(
            r#"
            UPDATE challenge_motivations
            SET confirmed_at = $3, points_doubled = $4
            WHERE tenant_id = $1 AND motivation_id = $2
            "#,
        )
        .bind(motivation.tenant_id.into_uuid())
        .bind(motivation.id.into_uuid())
        .bind(motivation.confirmed_at)
        .bind(motivation.points_doubled)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_received(
        &mut self,
        tenant: TenantId,
        receiver: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        let rows = sqlx::query_as::<_, MotivationRow>(&format!(
            "SELECT {MOTIVATION_COLUMNS} FROM challenge_motivations
             WHERE tenant_id = $1 AND receiver_id = $2
               AND ($3::UUID IS NULL OR course_id = $3)
             ORDER BY created_at DESC"
        ))
        .bind(tenant.into_uuid())
        .bind(receiver.into_uuid())
        .bind(course.map(CourseId::into_uuid))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(MotivationRow::into_motivation).collect())
    }

    async fn list_sent(
        &mut self,
        tenant: TenantId,
        sender: UserId,
        course: Option<CourseId>,
    ) -> ProgressionResult<Vec<ChallengeMotivation>> {
        let rows = sqlx::query_as::<_, MotivationRow>(&format!(
            "SELECT {MOTIVATION_COLUMNS} FROM challenge_motivations
             WHERE tenant_id = $1 AND sender_id = $2
               AND ($3::UUID IS NULL OR course_id = $3)
             ORDER BY created_at DESC"
        ))
        .bind(tenant.into_uuid())
        .bind(sender.into_uuid())
        .bind(course.map(CourseId::into_uuid))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(MotivationRow::into_motivation).collect())
    }
}

fn corrupt(column: &str, value: &str) -> ProgressionError {
    ProgressionError::Internal(format!("unexpected {column} value in database: {value}"))
}

/// Fit a counter into an INTEGER column
fn int4(column: &str, value: u32) -> ProgressionResult<i32> {
    i32::try_from(value)
        .map_err(|_| ProgressionError::Validation(format!("{column} out of range: {value}")))
}

// Internal row types for sqlx mapping
#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    tenant_id: Uuid,
    name: String,
    total_points: i64,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: UserId::from_uuid(self.user_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            name: self.name,
            total_points: self.total_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PointEntryRow {
    point_entry_id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    points: i64,
    point_type: String,
    source: String,
    source_id: Option<Uuid>,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl PointEntryRow {
    fn into_entry(self) -> ProgressionResult<PointEntry> {
        Ok(PointEntry {
            id: self.point_entry_id.into(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            points: self.points,
            point_type: PointType::from_code(&self.point_type)
                .ok_or_else(|| corrupt("point_type", &self.point_type))?,
            source: PointSource::from_code(&self.source)
                .ok_or_else(|| corrupt("source", &self.source))?,
            source_id: self.source_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    activity_id: Uuid,
    tenant_id: Uuid,
    course_id: Uuid,
    title: String,
    activity_type: String,
    sort_order: i32,
    points_value: i64,
    is_active: bool,
}

impl ActivityRow {
    fn into_activity(self) -> ProgressionResult<Activity> {
        Ok(Activity {
            id: ActivityId::from_uuid(self.activity_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            course_id: CourseId::from_uuid(self.course_id),
            title: self.title,
            activity_type: ActivityType::from_code(&self.activity_type)
                .ok_or_else(|| corrupt("activity_type", &self.activity_type))?,
            order: self.sort_order,
            points_value: self.points_value,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserActivityRow {
    tenant_id: Uuid,
    user_id: Uuid,
    activity_id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    score: Option<i16>,
    attempts: i32,
    metadata: Json<serde_json::Value>,
}

impl UserActivityRow {
    fn into_user_activity(self) -> UserActivity {
        UserActivity {
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            activity_id: ActivityId::from_uuid(self.activity_id),
            started_at: self.started_at,
            completed_at: self.completed_at,
            score: self.score.map(|s| s.clamp(0, 100) as u8),
            attempts: self.attempts.max(0) as u32,
            metadata: self.metadata.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    challenge_id: Uuid,
    tenant_id: Uuid,
    course_id: Uuid,
    title: String,
    difficulty_level: String,
    questions: Json<Vec<ChallengeQuestion>>,
    badge_id: Option<Uuid>,
    time_limit_minutes: Option<i32>,
    is_active: bool,
}

impl ChallengeRow {
    fn into_challenge(self) -> ProgressionResult<FinalChallenge> {
        Ok(FinalChallenge {
            id: ChallengeId::from_uuid(self.challenge_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            course_id: CourseId::from_uuid(self.course_id),
            title: self.title,
            level: ChallengeLevel::from_code(&self.difficulty_level)
                .ok_or_else(|| corrupt("difficulty_level", &self.difficulty_level))?,
            questions: self.questions.0,
            badge_id: self.badge_id.map(BadgeId::from_uuid),
            time_limit_minutes: self.time_limit_minutes,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    attempt_id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    challenge_id: Uuid,
    course_id: Uuid,
    difficulty_level: String,
    questions: Json<Vec<ChallengeQuestion>>,
    answers: Json<Vec<SubmittedAnswer>>,
    score_hundredths: i32,
    time_spent_secs: i32,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl AttemptRow {
    fn into_attempt(self) -> ProgressionResult<ChallengeAttempt> {
        let score = u16::try_from(self.score_hundredths)
            .ok()
            .and_then(Score::from_hundredths)
            .ok_or_else(|| corrupt("score_hundredths", &self.score_hundredths.to_string()))?;

        Ok(ChallengeAttempt {
            id: AttemptId::from_uuid(self.attempt_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            challenge_id: ChallengeId::from_uuid(self.challenge_id),
            course_id: CourseId::from_uuid(self.course_id),
            level: ChallengeLevel::from_code(&self.difficulty_level)
                .ok_or_else(|| corrupt("difficulty_level", &self.difficulty_level))?,
            questions: self.questions.0,
            answers: self.answers.0,
            score,
            time_spent_secs: self.time_spent_secs.max(0) as u32,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BadgeRow {
    badge_id: Uuid,
    tenant_id: Uuid,
    name: String,
    criteria: Json<serde_json::Value>,
    points_value: i64,
    is_active: bool,
}

impl BadgeRow {
    fn into_badge(self) -> Badge {
        Badge {
            id: BadgeId::from_uuid(self.badge_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            name: self.name,
            criteria: self.criteria.0,
            points_value: self.points_value,
            is_active: self.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserBadgeRow {
    tenant_id: Uuid,
    user_id: Uuid,
    badge_id: Uuid,
    earned_at: DateTime<Utc>,
}

impl UserBadgeRow {
    fn into_user_badge(self) -> UserBadge {
        UserBadge {
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            badge_id: BadgeId::from_uuid(self.badge_id),
            earned_at: self.earned_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MotivationRow {
    motivation_id: Uuid,
    tenant_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    course_id: Uuid,
    message: String,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    points_doubled: bool,
}

impl MotivationRow {
    fn into_motivation(self) -> ChallengeMotivation {
        ChallengeMotivation {
            id: MotivationId::from_uuid(self.motivation_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            sender_id: UserId::from_uuid(self.sender_id),
            receiver_id: UserId::from_uuid(self.receiver_id),
            course_id: CourseId::from_uuid(self.course_id),
            message: self.message,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            points_doubled: self.points_doubled,
        }
    }
}
