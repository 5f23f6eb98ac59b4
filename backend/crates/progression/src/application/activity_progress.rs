//! Activity Progress Use Case

use std::collections::HashMap;
use std::sync::Arc;

use kernel::id::{ActivityId, CourseId, TenantId, UserId};

use crate::application::config::ProgressionConfig;
use crate::application::point_ledger::{self, PointsReason};
use crate::domain::entities::{Activity, UserActivity};
use crate::domain::repository::{
    ActivityRepository, EnrollmentRepository, ProgressionStore, ProgressionTx,
};
use crate::domain::value_objects::{PointSource, PointType};
use crate::error::{ProgressionError, ProgressionResult};

/// Output of a completion
#[derive(Debug, Clone)]
pub struct ActivityCompletion {
    pub user_activity: UserActivity,
    /// Zero when the activity pays nothing or a quiz score was too low
    pub points_awarded: i64,
    /// Total after the award, when one happened
    pub total_points: Option<i64>,
}

/// One row of a course progress report
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityStatus {
    pub activity_id: ActivityId,
    pub title: String,
    pub order: i32,
    pub is_started: bool,
    pub is_completed: bool,
    pub is_accessible: bool,
    pub score: Option<u8>,
}

/// Progress of one user through one course
#[derive(Debug, Clone, PartialEq)]
pub struct CourseProgress {
    pub course_id: CourseId,
    pub total_activities: usize,
    pub completed_activities: usize,
    /// Two decimals
    pub completion_percentage: f64,
    /// Sum of `points_value` over completed activities
    pub points_earned: i64,
    pub total_points_possible: i64,
    pub activities: Vec<ActivityStatus>,
    pub is_completed: bool,
}

/// Activity Progress Use Case
pub struct ActivityProgressTracker<S>
where
    S: ProgressionStore,
{
    store: Arc<S>,
    config: Arc<ProgressionConfig>,
}

impl<S> Clone for ActivityProgressTracker<S>
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

impl<S> ActivityProgressTracker<S>
where
    S: ProgressionStore,
{
    pub fn new(store: Arc<S>, config: Arc<ProgressionConfig>) -> Self {
        Self { store, config }
    }

    /// Return the user's progress row for the activity, creating it on the
    /// first call. Later calls never reset `started_at`.
    pub async fn start(
        &self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<UserActivity> {
        self.start_inner(tenant, user, activity)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn start_inner(
        &self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<UserActivity> {
        let mut tx = self.store.begin().await?;
        let activity = load_accessible(&mut tx, tenant, user, activity).await?;

        if let Some(existing) = tx.find_user_activity(tenant, user, activity.id).await? {
            tracing::debug!(user_id = %user, activity_id = %activity.id, "Activity already started");
            return Ok(existing);
        }

        let fresh = UserActivity::start(tenant, user, activity.id);
        let user_activity = if tx.insert_user_activity(&fresh).await? {
            tracing::info!(user_id = %user, activity_id = %activity.id, "Activity started");
            fresh
        } else {
            // lost a race with a concurrent start
            tx.find_user_activity(tenant, user, activity.id)
                .await?
                .ok_or_else(|| ProgressionError::Internal("user activity vanished".into()))?
        };
        tx.commit().await?;
        Ok(user_activity)
    }

    /// Whether the user may work on the activity now
    pub async fn can_access(
        &self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
    ) -> ProgressionResult<bool> {
        let mut tx = self.store.begin().await?;
        let activity = tx
            .find_activity(tenant, activity)
            .await?
            .ok_or(ProgressionError::ActivityNotFound)?;
        is_unlocked(&mut tx, tenant, user, &activity).await
    }

    /// Record the single completion of an activity and pay its points.
    ///
    /// `score` is a percentage. Quizzes pay only at or above the configured
    /// pass mark; every other type pays on completion.
    pub async fn complete(
        &self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
        score: u8,
        metadata: Option<serde_json::Value>,
    ) -> ProgressionResult<ActivityCompletion> {
        self.complete_inner(tenant, user, activity, score, metadata)
            .await
            .inspect_err(ProgressionError::log)
    }

    async fn complete_inner(
        &self,
        tenant: TenantId,
        user: UserId,
        activity: ActivityId,
        score: u8,
        metadata: Option<serde_json::Value>,
    ) -> ProgressionResult<ActivityCompletion> {
        if score > 100 {
            return Err(ProgressionError::Validation(format!(
                "score must be between 0 and 100, got {score}"
            )));
        }

        let mut tx = self.store.begin().await?;
        let activity = load_accessible(&mut tx, tenant, user, activity).await?;

        let mut user_activity = match tx.lock_user_activity(tenant, user, activity.id).await? {
            Some(existing) => existing,
            None => {
                tx.insert_user_activity(&UserActivity::start(tenant, user, activity.id))
                    .await?;
                tx.lock_user_activity(tenant, user, activity.id)
                    .await?
                    .ok_or_else(|| ProgressionError::Internal("user activity vanished".into()))?
            }
        };

        user_activity.record_completion(score, metadata)?;
        tx.update_user_activity(&user_activity).await?;

        let passed = pays_points(&activity, score, self.config.quiz_pass_percent);
        let mut completion = ActivityCompletion {
            user_activity,
            points_awarded: 0,
            total_points: None,
        };

        if passed && activity.points_value > 0 {
            let reason = PointsReason::new(PointSource::Activity, activity.id.into_uuid())
                .with_description(format!("Activity completed: {}", activity.title));
            let posting = point_ledger::post(
                &mut tx,
                tenant,
                user,
                activity.points_value,
                PointType::Earned,
                reason,
            )
            .await?;
            completion.points_awarded = activity.points_value;
            completion.total_points = Some(posting.total_points);
        } else if !passed {
            tracing::info!(
                user_id = %user,
                activity_id = %activity.id,
                score,
                "Quiz score below pass mark, no points awarded"
            );
        }

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            user_id = %user,
            activity_id = %activity.id,
            score,
            points = completion.points_awarded,
            "Activity completed"
        );

        Ok(completion)
    }

    /// Completion summary of every active activity in the course
    pub async fn course_progress(
        &self,
        tenant: TenantId,
        user: UserId,
        course: CourseId,
    ) -> ProgressionResult<CourseProgress> {
        let mut tx = self.store.begin().await?;
        if !tx.is_enrolled(tenant, user, course).await? {
            return Err(ProgressionError::NotEnrolled).inspect_err(ProgressionError::log);
        }

        let activities = tx.list_course_activities(tenant, course).await?;
        let rows: HashMap<ActivityId, UserActivity> = tx
            .list_user_activities(tenant, user, course)
            .await?
            .into_iter()
            .map(|ua| (ua.activity_id, ua))
            .collect();

        Ok(summarize(course, &activities, &rows, self.config.quiz_pass_percent))
    }
}

/// Quizzes pay only at or above the pass mark; other types always pay
fn pays_points(activity: &Activity, score: u8, quiz_pass_percent: u8) -> bool {
    !activity.activity_type.is_scored() || score >= quiz_pass_percent
}

fn summarize(
    course: CourseId,
    activities: &[Activity],
    rows: &HashMap<ActivityId, UserActivity>,
    quiz_pass_percent: u8,
) -> CourseProgress {
    let mut statuses = Vec::with_capacity(activities.len());
    let mut previous_completed: Option<bool> = None;
    let mut points_earned = 0;

    for activity in activities {
        let row = rows.get(&activity.id);
        let is_completed = row.is_some_and(UserActivity::is_completed);
        let is_accessible = activity.order <= 1 || previous_completed.unwrap_or(true);

        let score = row.and_then(|ua| ua.score);
        if is_completed && pays_points(activity, score.unwrap_or(0), quiz_pass_percent) {
            points_earned += activity.points_value;
        }
        statuses.push(ActivityStatus {
            activity_id: activity.id,
            title: activity.title.clone(),
            order: activity.order,
            is_started: row.is_some(),
            is_completed,
            is_accessible,
            score,
        });
        previous_completed = Some(is_completed);
    }

    let total = statuses.len();
    let completed = statuses.iter().filter(|s| s.is_completed).count();
    let completion_percentage = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 10_000.0).round() / 100.0
    };

    CourseProgress {
        course_id: course,
        total_activities: total,
        completed_activities: completed,
        completion_percentage,
        points_earned,
        total_points_possible: activities.iter().map(|a| a.points_value).sum(),
        activities: statuses,
        is_completed: total > 0 && completed == total,
    }
}

/// Load an active activity the user is enrolled for and allowed to open
async fn load_accessible<T: ProgressionTx>(
    tx: &mut T,
    tenant: TenantId,
    user: UserId,
    activity: ActivityId,
) -> ProgressionResult<Activity> {
    let activity = tx
        .find_activity(tenant, activity)
        .await?
        .ok_or(ProgressionError::ActivityNotFound)?;

    if !tx.is_enrolled(tenant, user, activity.course_id).await? {
        return Err(ProgressionError::NotEnrolled);
    }
    if !is_unlocked(tx, tenant, user, &activity).await? {
        return Err(ProgressionError::ActivityLocked);
    }
    Ok(activity)
}

/// First activity, or the preceding one is completed. Open when there is
/// no preceding activity.
async fn is_unlocked<T: ProgressionTx>(
    tx: &mut T,
    tenant: TenantId,
    user: UserId,
    activity: &Activity,
) -> ProgressionResult<bool> {
    if activity.order <= 1 {
        return Ok(true);
    }
    let Some(previous) = tx
        .find_preceding_activity(tenant, activity.course_id, activity.order)
        .await?
    else {
        return Ok(true);
    };

    Ok(tx
        .find_user_activity(tenant, user, previous.id)
        .await?
        .is_some_and(|ua| ua.is_completed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ActivityType;

    fn activity(course: CourseId, order: i32, points: i64) -> Activity {
        Activity {
            id: ActivityId::new(),
            tenant_id: TenantId::new(),
            course_id: course,
            title: format!("Activity {order}"),
            activity_type: ActivityType::Reading,
            order,
            points_value: points,
            is_active: true,
        }
    }

    #[test]
    fn test_summarize_accessibility_chain() {
        let course = CourseId::new();
        let activities = vec![activity(course, 1, 10), activity(course, 2, 20), activity(course, 3, 30)];
        let mut done = UserActivity::start(TenantId::new(), UserId::new(), activities[0].id);
        done.record_completion(100, None).unwrap();
        let rows = HashMap::from([(activities[0].id, done)]);

        let progress = summarize(course, &activities, &rows, 70);
        assert_eq!(progress.completed_activities, 1);
        assert_eq!(progress.completion_percentage, 33.33);
        assert_eq!(progress.points_earned, 10);
        assert_eq!(progress.total_points_possible, 60);
        assert!(progress.activities[1].is_accessible);
        assert!(!progress.activities[2].is_accessible);
        assert!(!progress.is_completed);
    }

    #[test]
    fn test_summarize_failed_quiz_earns_nothing() {
        let course = CourseId::new();
        let mut quiz = activity(course, 1, 50);
        quiz.activity_type = ActivityType::Quiz;
        let mut passed_quiz = activity(course, 2, 40);
        passed_quiz.activity_type = ActivityType::Quiz;
        let activities = vec![quiz, passed_quiz];

        let mut failed = UserActivity::start(TenantId::new(), UserId::new(), activities[0].id);
        failed.record_completion(69, None).unwrap();
        let mut passed = UserActivity::start(TenantId::new(), UserId::new(), activities[1].id);
        passed.record_completion(70, None).unwrap();
        let rows = HashMap::from([(activities[0].id, failed), (activities[1].id, passed)]);

        let progress = summarize(course, &activities, &rows, 70);
        assert_eq!(progress.completed_activities, 2);
        assert_eq!(progress.points_earned, 40);
        assert_eq!(progress.activities[0].score, Some(69));
        assert!(progress.is_completed);
    }

    #[test]
    fn test_summarize_empty_course() {
        let progress = summarize(CourseId::new(), &[], &HashMap::new(), 70);
        assert_eq!(progress.completion_percentage, 0.0);
        assert!(!progress.is_completed);
    }
}
