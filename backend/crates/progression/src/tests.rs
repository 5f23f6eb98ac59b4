//! Scenario tests for the progression engine
//! Run against the in-memory store; every use case shares one store.

#[cfg(test)]
mod support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use kernel::id::{ActivityId, BadgeId, ChallengeId, CourseId, TenantId, UserId};
    use serde_json::json;
    use tokio_test::assert_ok;

    use crate::application::badge_awarder::{BadgeAwarder, UserStats};
    use crate::application::challenge_progression::{ChallengeProgression, SubmissionResult};
    use crate::application::motivation::MotivationIncentive;
    use crate::domain::entities::{
        Activity, Badge, ChallengeQuestion, FinalChallenge, SubmittedAnswer,
    };
    use crate::domain::value_objects::{ActivityType, ChallengeLevel};
    use crate::{ActivityProgressTracker, MemoryProgressionStore, PointLedger, ProgressionConfig};

    pub type Rules = fn(&Badge, &UserStats) -> bool;

    /// Badges whose criteria carry `min_points` are earned at that total
    pub fn points_rule(badge: &Badge, stats: &UserStats) -> bool {
        badge
            .criteria
            .get("min_points")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|min| stats.total_points >= min)
    }

    pub const QUESTIONS: usize = 20;
    pub const COMPLETION_BADGE_POINTS: i64 = 150;

    pub struct Fixture {
        pub store: Arc<MemoryProgressionStore>,
        pub tenant: TenantId,
        pub course: CourseId,
        pub activities: Vec<ActivityId>,
        pub challenges: HashMap<ChallengeLevel, ChallengeId>,
        pub completion_badge: Option<BadgeId>,
        pub ledger: PointLedger<MemoryProgressionStore>,
        pub tracker: ActivityProgressTracker<MemoryProgressionStore>,
        pub badges: BadgeAwarder<MemoryProgressionStore, Rules>,
        pub progression: ChallengeProgression<MemoryProgressionStore, Rules>,
        pub motivation: MotivationIncentive<MemoryProgressionStore>,
    }

    pub fn questions(count: usize) -> Vec<ChallengeQuestion> {
        (0..count)
            .map(|i| ChallengeQuestion {
                question: format!("Question {}", i + 1),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: (i % 4) as i64,
                explanation: None,
            })
            .collect()
    }

    /// Answers with exactly `correct` right out of `total`
    pub fn answers(total: usize, correct: usize) -> Vec<SubmittedAnswer> {
        (0..total)
            .map(|i| SubmittedAnswer {
                question_index: i,
                selected: if i < correct { (i % 4) as i64 } else { -1 },
            })
            .collect()
    }

    impl Fixture {
        pub async fn new() -> Self {
            Self::with_completion_badge(Some(COMPLETION_BADGE_POINTS)).await
        }

        /// `None` builds challenges without a linked badge
        pub async fn with_completion_badge(badge_points: Option<i64>) -> Self {
            let store = Arc::new(MemoryProgressionStore::new());
            let config = Arc::new(ProgressionConfig::default());
            let tenant = TenantId::new();
            let course = CourseId::new();

            let mut activities = Vec::new();
            for (order, (kind, points)) in [
                (ActivityType::Reading, 10),
                (ActivityType::Quiz, 50),
                (ActivityType::Assignment, 20),
            ]
            .into_iter()
            .enumerate()
            {
                let activity = Activity {
                    id: ActivityId::new(),
                    tenant_id: tenant,
                    course_id: course,
                    title: format!("{kind} {}", order + 1),
                    activity_type: kind,
                    order: order as i32 + 1,
                    points_value: points,
                    is_active: true,
                };
                activities.push(activity.id);
                store.seed_activity(activity).await;
            }

            let completion_badge = match badge_points {
                Some(points) => {
                    let badge = Badge {
                        id: BadgeId::new(),
                        tenant_id: tenant,
                        name: "Final Challenge Champion".into(),
                        criteria: json!({ "type": "completion" }),
                        points_value: points,
                        is_active: true,
                    };
                    let id = badge.id;
                    store.seed_badge(badge).await;
                    Some(id)
                }
                None => None,
            };

            let mut challenges = HashMap::new();
            for level in ChallengeLevel::ALL {
                let challenge = FinalChallenge {
                    id: ChallengeId::new(),
                    tenant_id: tenant,
                    course_id: course,
                    title: format!("Final challenge ({level})"),
                    level,
                    questions: questions(QUESTIONS),
                    badge_id: completion_badge,
                    time_limit_minutes: Some(30),
                    is_active: true,
                };
                challenges.insert(level, challenge.id);
                assert_ok!(store.seed_challenge(challenge).await);
            }

            let rules: Arc<Rules> = Arc::new(points_rule as Rules);
            let badges = BadgeAwarder::new(Arc::clone(&store), rules);

            Self {
                ledger: PointLedger::new(Arc::clone(&store), Arc::clone(&config)),
                tracker: ActivityProgressTracker::new(Arc::clone(&store), Arc::clone(&config)),
                progression: ChallengeProgression::new(Arc::clone(&store), badges.clone()),
                motivation: MotivationIncentive::new(Arc::clone(&store), Arc::clone(&config)),
                badges,
                store,
                tenant,
                course,
                activities,
                challenges,
                completion_badge,
            }
        }

        /// Seeded and enrolled learner
        pub async fn learner(&self, name: &str) -> UserId {
            let user = self.store.seed_user(self.tenant, name).await;
            self.store.enroll(self.tenant, user, self.course).await;
            user
        }

        pub async fn total(&self, user: UserId) -> i64 {
            self.store
                .user(self.tenant, user)
                .await
                .map_or(0, |u| u.total_points)
        }

        /// Start and submit one attempt scoring `percent` (a multiple of 5)
        pub async fn attempt(&self, user: UserId, level: ChallengeLevel, percent: usize) -> SubmissionResult {
            let attempt = assert_ok!(self.progression.start(self.tenant, user, self.course, level).await);
            let correct = QUESTIONS * percent / 100;
            assert_ok!(
                self.progression
                    .submit(self.tenant, user, attempt.id, answers(QUESTIONS, correct), 120)
                    .await
            )
        }

        /// Pass all three levels
        pub async fn pass_all(&self, user: UserId) -> SubmissionResult {
            self.attempt(user, ChallengeLevel::Easy, 100).await;
            self.attempt(user, ChallengeLevel::Medium, 100).await;
            self.attempt(user, ChallengeLevel::Hard, 100).await
        }
    }
}

#[cfg(test)]
mod ledger_tests {
    use super::support::*;
    use crate::application::point_ledger::PointsReason;
    use crate::domain::value_objects::{PointSource, PointType};
    use crate::error::ProgressionError;
    use kernel::id::UserId;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_total_is_floored_projection_of_ledger() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let manual = || PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);

        let posting = assert_ok!(f.ledger.award(f.tenant, user, 100, manual()).await);
        assert_eq!(posting.total_points, 100);
        let posting = assert_ok!(f.ledger.spend(f.tenant, user, 30, manual()).await);
        assert_eq!(posting.total_points, 70);
        let posting = assert_ok!(f.ledger.spend(f.tenant, user, 100, manual()).await);
        assert_eq!(posting.total_points, 0);
        let posting = assert_ok!(f.ledger.award(f.tenant, user, 20, manual()).await);
        assert_eq!(posting.total_points, 0);

        let entries = f.store.ledger_entries(f.tenant, user).await;
        let earned: i64 = entries
            .iter()
            .filter(|e| e.point_type == PointType::Earned)
            .map(|e| e.points)
            .sum();
        let spent: i64 = entries
            .iter()
            .filter(|e| e.point_type == PointType::Spent)
            .map(|e| e.points)
            .sum();
        assert_eq!((earned, spent), (120, 130));
        assert_eq!(f.total(user).await, (earned - spent).max(0));

        let balance = assert_ok!(f.ledger.balance(f.tenant, user).await);
        assert_eq!(balance.earned, 120);
        assert_eq!(balance.spent, 130);
        assert_eq!(balance.total_points, 0);
        assert_eq!(balance.level.level, 1);
    }

    #[tokio::test]
    async fn test_award_rejects_non_positive_amount() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);

        let err = assert_err!(f.ledger.award(f.tenant, user, 0, reason.clone()).await);
        assert!(matches!(err, ProgressionError::Validation(_)));
        let err = assert_err!(f.ledger.spend(f.tenant, user, -5, reason).await);
        assert!(matches!(err, ProgressionError::Validation(_)));

        assert!(f.store.ledger_entries(f.tenant, user).await.is_empty());
    }

    #[tokio::test]
    async fn test_award_to_unknown_user() {
        let f = Fixture::new().await;
        let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);
        let err = assert_err!(f.ledger.award(f.tenant, UserId::new(), 10, reason).await);
        assert!(matches!(err, ProgressionError::UserNotFound));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        for amount in 1..=4 {
            let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);
            assert_ok!(f.ledger.award(f.tenant, user, amount, reason).await);
        }

        let history = assert_ok!(f.ledger.history(f.tenant, user, Some(3)).await);
        let amounts: Vec<i64> = history.iter().map(|e| e.points).collect();
        assert_eq!(amounts, vec![4, 3, 2]);

        let history = assert_ok!(f.ledger.history(f.tenant, user, None).await);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_audit_repairs_drifted_totals() {
        let f = Fixture::new().await;
        let steady = f.learner("ada").await;
        let drifted = f.learner("grace").await;
        for user in [steady, drifted] {
            let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);
            assert_ok!(f.ledger.award(f.tenant, user, 40, reason).await);
        }
        f.store.overwrite_total_points(f.tenant, drifted, 999).await;

        let report = assert_ok!(f.ledger.audit_all(f.tenant).await);
        assert_eq!(report.users_checked, 2);
        assert_eq!(report.repaired.len(), 1);
        assert_eq!(report.repaired[0].user_id, drifted);
        assert_eq!(report.repaired[0].cached_total, 999);
        assert_eq!(f.total(drifted).await, 40);

        let outcome = assert_ok!(f.ledger.reconcile(f.tenant, drifted).await);
        assert!(!outcome.drifted());
    }

    #[tokio::test]
    async fn test_concurrent_awards_do_not_lose_updates() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = f.ledger.clone();
            let tenant = f.tenant;
            handles.push(tokio::spawn(async move {
                let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);
                ledger.award(tenant, user, 7, reason).await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        assert_eq!(f.total(user).await, 70);
        assert_eq!(f.store.ledger_entries(f.tenant, user).await.len(), 10);
    }
}

#[cfg(test)]
mod activity_tests {
    use super::support::*;
    use crate::domain::value_objects::{PointSource, PointType};
    use crate::error::ProgressionError;
    use kernel::id::UserId;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_complete_awards_once() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let reading = f.activities[0];

        let done = assert_ok!(
            f.tracker
                .complete(f.tenant, user, reading, 100, Some(json!({ "device": "web" })))
                .await
        );
        assert_eq!(done.points_awarded, 10);
        assert_eq!(done.total_points, Some(10));
        assert_eq!(done.user_activity.attempts, 1);
        assert_eq!(done.user_activity.metadata["device"], "web");

        let err = assert_err!(f.tracker.complete(f.tenant, user, reading, 50, None).await);
        assert!(matches!(err, ProgressionError::AlreadyCompleted));

        assert_eq!(f.total(user).await, 10);
        let entries = f.store.ledger_entries(f.tenant, user).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, PointSource::Activity);
        assert_eq!(entries[0].source_id, Some(reading.into_uuid()));
        assert_eq!(entries[0].point_type, PointType::Earned);
    }

    #[tokio::test]
    async fn test_quiz_below_pass_mark_completes_without_points() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        assert_ok!(f.tracker.complete(f.tenant, user, f.activities[0], 100, None).await);

        let quiz = f.activities[1];
        let done = assert_ok!(f.tracker.complete(f.tenant, user, quiz, 69, None).await);
        assert_eq!(done.points_awarded, 0);
        assert!(done.user_activity.is_completed());
        assert_eq!(done.user_activity.score, Some(69));
        assert_eq!(f.total(user).await, 10);

        // a failed quiz still counts as completed and cannot be retaken
        let err = assert_err!(f.tracker.complete(f.tenant, user, quiz, 100, None).await);
        assert!(matches!(err, ProgressionError::AlreadyCompleted));
    }

    #[tokio::test]
    async fn test_quiz_at_pass_mark_awards() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        assert_ok!(f.tracker.complete(f.tenant, user, f.activities[0], 100, None).await);

        let done = assert_ok!(f.tracker.complete(f.tenant, user, f.activities[1], 70, None).await);
        assert_eq!(done.points_awarded, 50);
        assert_eq!(f.total(user).await, 60);
    }

    #[tokio::test]
    async fn test_activities_unlock_in_order() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let [first, second, _third] = [f.activities[0], f.activities[1], f.activities[2]];

        assert!(assert_ok!(f.tracker.can_access(f.tenant, user, first).await));
        assert!(!assert_ok!(f.tracker.can_access(f.tenant, user, second).await));

        let err = assert_err!(f.tracker.start(f.tenant, user, second).await);
        assert!(matches!(err, ProgressionError::ActivityLocked));
        let err = assert_err!(f.tracker.complete(f.tenant, user, second, 100, None).await);
        assert!(matches!(err, ProgressionError::ActivityLocked));

        assert_ok!(f.tracker.complete(f.tenant, user, first, 100, None).await);
        assert!(assert_ok!(f.tracker.can_access(f.tenant, user, second).await));
        assert_ok!(f.tracker.start(f.tenant, user, second).await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;

        let first = assert_ok!(f.tracker.start(f.tenant, user, f.activities[0]).await);
        let again = assert_ok!(f.tracker.start(f.tenant, user, f.activities[0]).await);
        assert_eq!(first.started_at, again.started_at);
        assert_eq!(again.attempts, 0);
        assert!(!again.is_completed());
    }

    #[tokio::test]
    async fn test_not_enrolled_is_rejected() {
        let f = Fixture::new().await;
        let outsider = f.store.seed_user(f.tenant, "mallory").await;

        let err = assert_err!(f.tracker.start(f.tenant, outsider, f.activities[0]).await);
        assert!(matches!(err, ProgressionError::NotEnrolled));
        let err = assert_err!(f.tracker.complete(f.tenant, outsider, f.activities[0], 100, None).await);
        assert!(matches!(err, ProgressionError::NotEnrolled));
        assert_eq!(err.kind(), kernel::error::kind::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_invalid_score_and_unknown_activity() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;

        let err = assert_err!(f.tracker.complete(f.tenant, user, f.activities[0], 101, None).await);
        assert!(matches!(err, ProgressionError::Validation(_)));

        let err = assert_err!(
            f.tracker
                .complete(f.tenant, user, kernel::id::ActivityId::new(), 100, None)
                .await
        );
        assert!(matches!(err, ProgressionError::ActivityNotFound));
    }

    #[tokio::test]
    async fn test_failed_award_rolls_back_completion() {
        let f = Fixture::new().await;
        // enrolled but never created as a user: the ledger posting fails
        let ghost = UserId::new();
        f.store.enroll(f.tenant, ghost, f.course).await;

        let err = assert_err!(f.tracker.complete(f.tenant, ghost, f.activities[0], 100, None).await);
        assert!(matches!(err, ProgressionError::UserNotFound));

        let row = assert_ok!(f.tracker.start(f.tenant, ghost, f.activities[0]).await);
        assert!(!row.is_completed());
        assert_eq!(row.attempts, 0);
    }

    #[tokio::test]
    async fn test_course_progress() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        assert_ok!(f.tracker.complete(f.tenant, user, f.activities[0], 100, None).await);
        assert_ok!(f.tracker.start(f.tenant, user, f.activities[1]).await);

        let progress = assert_ok!(f.tracker.course_progress(f.tenant, user, f.course).await);
        assert_eq!(progress.total_activities, 3);
        assert_eq!(progress.completed_activities, 1);
        assert_eq!(progress.completion_percentage, 33.33);
        assert_eq!(progress.points_earned, 10);
        assert_eq!(progress.total_points_possible, 80);
        assert!(progress.activities[1].is_started);
        assert!(progress.activities[1].is_accessible);
        assert!(!progress.activities[2].is_accessible);
        assert!(!progress.is_completed);

        // a failed quiz completes the activity but earns nothing
        assert_ok!(f.tracker.complete(f.tenant, user, f.activities[1], 40, None).await);
        let progress = assert_ok!(f.tracker.course_progress(f.tenant, user, f.course).await);
        assert_eq!(progress.completed_activities, 2);
        assert_eq!(progress.points_earned, 10);
        assert_eq!(progress.points_earned, f.total(user).await);
        assert!(progress.activities[2].is_accessible);
    }

    #[tokio::test]
    async fn test_concurrent_completions_award_once() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let reading = f.activities[0];

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = f.tracker.clone();
            let tenant = f.tenant;
            handles.push(tokio::spawn(async move {
                tracker.complete(tenant, user, reading, 100, None).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, ProgressionError::AlreadyCompleted)),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(f.total(user).await, 10);
        assert_eq!(f.store.ledger_entries(f.tenant, user).await.len(), 1);
    }
}

#[cfg(test)]
mod challenge_tests {
    use super::support::*;
    use crate::domain::entities::SubmittedAnswer;
    use crate::domain::value_objects::{ChallengeLevel, Grade, PointSource, Score};
    use crate::error::ProgressionError;
    use kernel::id::AttemptId;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_medium_locked_until_easy_passes() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;

        let err = assert_err!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Medium)
                .await
        );
        assert!(matches!(err, ProgressionError::LevelLocked));

        let failed = f.attempt(user, ChallengeLevel::Easy, 55).await;
        assert!(!failed.passed);
        let err = assert_err!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Medium)
                .await
        );
        assert!(matches!(err, ProgressionError::LevelLocked));

        let passed = f.attempt(user, ChallengeLevel::Easy, 60).await;
        assert!(passed.passed);
        assert_ok!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Medium)
                .await
        );
    }

    #[tokio::test]
    async fn test_later_failure_keeps_level_unlocked() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        f.attempt(user, ChallengeLevel::Easy, 90).await;
        f.attempt(user, ChallengeLevel::Easy, 10).await;

        assert_ok!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Medium)
                .await
        );
    }

    #[tokio::test]
    async fn test_scoring_by_question_index() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let easy = f.challenges[&ChallengeLevel::Easy];
        assert_ok!(f.store.replace_questions(easy, questions(4)).await);

        let attempt = assert_ok!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Easy)
                .await
        );
        let answers = vec![
            SubmittedAnswer { question_index: 0, selected: 0 },
            SubmittedAnswer { question_index: 1, selected: 1 },
            SubmittedAnswer { question_index: 2, selected: 9 },
            SubmittedAnswer { question_index: 3, selected: 3 },
        ];
        let result = assert_ok!(f.progression.submit(f.tenant, user, attempt.id, answers, 45).await);

        assert_eq!(result.score.to_string(), "75.00");
        assert_eq!(result.correct_answers, 3);
        assert_eq!(result.total_questions, 4);
        assert_eq!(result.grade, Grade::B);
        assert!(result.passed);
        assert_eq!(result.attempt.time_spent_secs, 45);
    }

    #[tokio::test]
    async fn test_scoring_uses_last_answer_per_question_index() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let easy = f.challenges[&ChallengeLevel::Easy];
        assert_ok!(f.store.replace_questions(easy, questions(4)).await);

        let attempt = assert_ok!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Easy)
                .await
        );
        let answers = vec![
            SubmittedAnswer { question_index: 0, selected: 9 },
            SubmittedAnswer { question_index: 1, selected: 1 },
            SubmittedAnswer { question_index: 2, selected: 2 },
            SubmittedAnswer { question_index: 3, selected: 3 },
            SubmittedAnswer { question_index: 0, selected: 0 },
            SubmittedAnswer { question_index: 2, selected: 9 },
        ];
        let result = assert_ok!(f.progression.submit(f.tenant, user, attempt.id, answers, 45).await);

        assert_eq!(result.correct_answers, 3);
        assert_eq!(result.score.to_string(), "75.00");
    }

    #[tokio::test]
    async fn test_attempt_grades_its_snapshot() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let easy = f.challenges[&ChallengeLevel::Easy];

        let attempt = assert_ok!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Easy)
                .await
        );
        let mut edited = questions(QUESTIONS);
        for q in &mut edited {
            q.correct_answer = 3 - q.correct_answer;
        }
        assert_ok!(f.store.replace_questions(easy, edited).await);

        let result = assert_ok!(
            f.progression
                .submit(f.tenant, user, attempt.id, answers(QUESTIONS, QUESTIONS), 60)
                .await
        );
        assert_eq!(result.score, Score::MAX);
    }

    #[tokio::test]
    async fn test_zero_question_challenge_scores_zero() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let easy = f.challenges[&ChallengeLevel::Easy];
        assert_ok!(f.store.replace_questions(easy, Vec::new()).await);

        let result = f.attempt(user, ChallengeLevel::Easy, 100).await;
        assert_eq!(result.score, Score::ZERO);
        assert_eq!(result.grade, Grade::F);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_submit_rules() {
        let f = Fixture::new().await;
        let owner = f.learner("ada").await;
        let other = f.learner("grace").await;
        let attempt = assert_ok!(
            f.progression
                .start(f.tenant, owner, f.course, ChallengeLevel::Easy)
                .await
        );

        let err = assert_err!(
            f.progression
                .submit(f.tenant, other, attempt.id, answers(QUESTIONS, QUESTIONS), 1)
                .await
        );
        assert!(matches!(err, ProgressionError::AttemptNotFound));

        let err = assert_err!(
            f.progression
                .submit(f.tenant, owner, AttemptId::new(), Vec::new(), 1)
                .await
        );
        assert!(matches!(err, ProgressionError::AttemptNotFound));

        let first = assert_ok!(
            f.progression
                .submit(f.tenant, owner, attempt.id, answers(QUESTIONS, 14), 30)
                .await
        );
        let err = assert_err!(
            f.progression
                .submit(f.tenant, owner, attempt.id, answers(QUESTIONS, QUESTIONS), 99)
                .await
        );
        assert!(matches!(err, ProgressionError::AlreadyCompleted));

        let overview = assert_ok!(f.progression.progress(f.tenant, owner, f.course).await);
        assert_eq!(overview.levels[0].attempts.len(), 1);
        assert_eq!(overview.levels[0].best_score, Some(first.score));
    }

    #[tokio::test]
    async fn test_missing_challenge() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let other_course = kernel::id::CourseId::new();
        f.store.enroll(f.tenant, user, other_course).await;

        let err = assert_err!(
            f.progression
                .start(f.tenant, user, other_course, ChallengeLevel::Easy)
                .await
        );
        assert!(matches!(err, ProgressionError::ChallengeNotFound));
    }

    #[tokio::test]
    async fn test_end_to_end_completion_badge() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        assert_ok!(f.tracker.complete(f.tenant, user, f.activities[0], 100, None).await);
        let before = f.total(user).await;
        assert_eq!(before, 10);

        let easy = f.attempt(user, ChallengeLevel::Easy, 80).await;
        assert!(easy.passed);

        let medium = f.attempt(user, ChallengeLevel::Medium, 40).await;
        assert!(!medium.passed);
        let err = assert_err!(
            f.progression
                .start(f.tenant, user, f.course, ChallengeLevel::Hard)
                .await
        );
        assert!(matches!(err, ProgressionError::LevelLocked));

        let medium = f.attempt(user, ChallengeLevel::Medium, 75).await;
        assert!(medium.passed);
        assert!(!medium.all_levels_passed);

        let hard = f.attempt(user, ChallengeLevel::Hard, 85).await;
        assert!(hard.passed);
        assert!(hard.all_levels_passed);
        assert_eq!(hard.completion_points, COMPLETION_BADGE_POINTS);
        assert_eq!(hard.badges_granted, 1);

        assert_eq!(f.total(user).await, before + COMPLETION_BADGE_POINTS);
        let entries = f.store.ledger_entries(f.tenant, user).await;
        let completion: Vec<_> = entries
            .iter()
            .filter(|e| e.source == PointSource::FinalChallenge)
            .collect();
        assert_eq!(completion.len(), 1);
        assert_eq!(completion[0].points, COMPLETION_BADGE_POINTS);

        let earned = assert_ok!(f.badges.earned_badges(f.tenant, user).await);
        assert_eq!(earned.len(), 1);
        assert_eq!(Some(earned[0].badge.id), f.completion_badge);

        let overview = assert_ok!(f.progression.progress(f.tenant, user, f.course).await);
        assert!(overview.all_levels_passed);
        assert_eq!(overview.next_level, None);
        assert_eq!(overview.levels[1].attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_full_completion_does_not_repay() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let last = f.pass_all(user).await;
        assert_eq!(last.completion_points, COMPLETION_BADGE_POINTS);
        let total = f.total(user).await;

        for level in ChallengeLevel::ALL {
            let retry = f.attempt(user, level, 100).await;
            assert!(retry.passed);
            assert!(retry.all_levels_passed);
            assert_eq!(retry.completion_points, 0);
            assert_eq!(retry.badges_granted, 0);
        }

        assert_eq!(f.total(user).await, total);
        assert_eq!(assert_ok!(f.badges.earned_badges(f.tenant, user).await).len(), 1);
    }

    #[tokio::test]
    async fn test_completion_without_badge_pays_nothing() {
        let f = Fixture::with_completion_badge(None).await;
        let user = f.learner("ada").await;

        let last = f.pass_all(user).await;
        assert!(last.all_levels_passed);
        assert_eq!(last.completion_points, 0);
        assert_eq!(f.total(user).await, 0);
    }

    #[tokio::test]
    async fn test_progress_overview_next_level() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;

        let overview = assert_ok!(f.progression.progress(f.tenant, user, f.course).await);
        assert_eq!(overview.next_level, Some(ChallengeLevel::Easy));
        assert!(overview.levels[0].unlocked);
        assert!(!overview.levels[1].unlocked);

        f.attempt(user, ChallengeLevel::Easy, 70).await;
        let overview = assert_ok!(f.progression.progress(f.tenant, user, f.course).await);
        assert_eq!(overview.next_level, Some(ChallengeLevel::Medium));
        assert!(overview.levels[0].passed);
        assert_eq!(overview.levels[0].best_score, Some(Score::from_percent(70)));
    }
}

#[cfg(test)]
mod badge_tests {
    use super::support::*;
    use crate::application::point_ledger::PointsReason;
    use crate::domain::entities::Badge;
    use crate::domain::value_objects::{ChallengeLevel, PointSource};
    use crate::error::ProgressionError;
    use kernel::id::BadgeId;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    async fn seed_points_badge(f: &Fixture, min_points: i64, reward: i64) -> BadgeId {
        let badge = Badge {
            id: BadgeId::new(),
            tenant_id: f.tenant,
            name: format!("{min_points} club"),
            criteria: json!({ "min_points": min_points }),
            points_value: reward,
            is_active: true,
        };
        let id = badge.id;
        f.store.seed_badge(badge).await;
        id
    }

    #[tokio::test]
    async fn test_evaluate_all_is_idempotent() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        seed_points_badge(&f, 100, 25).await;

        assert_eq!(assert_ok!(f.badges.evaluate_all(f.tenant, user).await), 0);

        let reason = PointsReason::new(PointSource::Manual, None::<uuid::Uuid>);
        assert_ok!(f.ledger.award(f.tenant, user, 120, reason).await);

        assert_eq!(assert_ok!(f.badges.evaluate_all(f.tenant, user).await), 1);
        assert_eq!(f.total(user).await, 145);
        assert_eq!(assert_ok!(f.badges.evaluate_all(f.tenant, user).await), 0);
        assert_eq!(f.total(user).await, 145);
    }

    #[tokio::test]
    async fn test_completion_triggers_evaluation() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        // reachable only with the completion badge points
        let club = seed_points_badge(&f, 150, 0).await;

        let last = f.pass_all(user).await;
        assert_eq!(last.badges_granted, 2);
        let earned = assert_ok!(f.badges.earned_badges(f.tenant, user).await);
        assert!(earned.iter().any(|b| b.badge.id == club));
        assert_eq!(f.total(user).await, COMPLETION_BADGE_POINTS);
    }

    #[tokio::test]
    async fn test_direct_grant_is_idempotent() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        let badge = seed_points_badge(&f, i64::MAX, 40).await;

        let first = assert_ok!(f.badges.grant(f.tenant, user, badge).await);
        assert!(first.newly_granted);
        assert_eq!(first.points_awarded, 40);

        let again = assert_ok!(f.badges.grant(f.tenant, user, badge).await);
        assert!(!again.newly_granted);
        assert_eq!(f.total(user).await, 40);

        let err = assert_err!(f.badges.grant(f.tenant, user, BadgeId::new()).await);
        assert!(matches!(err, ProgressionError::BadgeNotFound));
    }

    #[tokio::test]
    async fn test_completion_badge_not_regranted_by_evaluation() {
        let f = Fixture::new().await;
        let user = f.learner("ada").await;
        f.attempt(user, ChallengeLevel::Easy, 100).await;
        f.attempt(user, ChallengeLevel::Medium, 100).await;

        let badge = f.completion_badge.unwrap();
        assert_ok!(f.badges.grant(f.tenant, user, badge).await);
        let total = f.total(user).await;

        let last = f.attempt(user, ChallengeLevel::Hard, 100).await;
        assert!(last.all_levels_passed);
        assert_eq!(last.completion_points, 0);
        assert_eq!(f.total(user).await, total);
    }
}

#[cfg(test)]
mod motivation_tests {
    use super::support::*;
    use crate::domain::entities::MotivationStatus;
    use crate::domain::value_objects::{ChallengeLevel, PointSource};
    use crate::error::ProgressionError;
    use kernel::id::{MotivationId, UserId};
    use tokio_test::{assert_err, assert_ok};

    const MESSAGE: &str = "You've got this!";

    #[tokio::test]
    async fn test_send_requires_all_levels_passed() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        f.attempt(sender, ChallengeLevel::Easy, 100).await;

        let err = assert_err!(
            f.motivation
                .send(f.tenant, sender, &[receiver], f.course, MESSAGE)
                .await
        );
        assert!(matches!(err, ProgressionError::ChallengeNotPassed));
        assert_eq!(err.kind(), kernel::error::kind::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_send_skips_self_and_duplicates() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let grace = f.learner("grace").await;
        let alan = f.learner("alan").await;
        f.pass_all(sender).await;

        let created = assert_ok!(
            f.motivation
                .send(f.tenant, sender, &[grace, sender, grace], f.course, MESSAGE)
                .await
        );
        assert_eq!(created, 1);

        let created = assert_ok!(
            f.motivation
                .send(f.tenant, sender, &[grace, alan], f.course, MESSAGE)
                .await
        );
        assert_eq!(created, 1);

        let sent = assert_ok!(f.motivation.sent(f.tenant, sender, Some(f.course)).await);
        assert_eq!(sent.len(), 2);
        let received = assert_ok!(f.motivation.received(f.tenant, grace, None).await);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status(), MotivationStatus::Pending);
    }

    #[tokio::test]
    async fn test_send_validation() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        f.pass_all(sender).await;

        let cases: Vec<(Vec<UserId>, String)> = vec![
            (Vec::new(), MESSAGE.to_string()),
            (vec![receiver; 6], MESSAGE.to_string()),
            (vec![receiver], "   ".to_string()),
            (vec![receiver], "x".repeat(501)),
            (vec![UserId::new()], MESSAGE.to_string()),
        ];
        for (receivers, message) in cases {
            let err = assert_err!(
                f.motivation
                    .send(f.tenant, sender, &receivers, f.course, &message)
                    .await
            );
            assert!(matches!(err, ProgressionError::Validation(_)), "{err}");
        }
        assert!(assert_ok!(f.motivation.sent(f.tenant, sender, None).await).is_empty());
    }

    async fn sent_motivation(f: &Fixture, sender: UserId, receiver: UserId) -> MotivationId {
        f.pass_all(sender).await;
        assert_ok!(
            f.motivation
                .send(f.tenant, sender, &[receiver], f.course, MESSAGE)
                .await
        );
        let received = assert_ok!(f.motivation.received(f.tenant, receiver, Some(f.course)).await);
        received[0].id
    }

    #[tokio::test]
    async fn test_confirm_pays_exactly_once() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        let id = sent_motivation(&f, sender, receiver).await;
        f.attempt(receiver, ChallengeLevel::Easy, 65).await;
        let before = f.total(receiver).await;

        let confirmed = assert_ok!(f.motivation.confirm(f.tenant, id, receiver).await);
        assert_eq!(confirmed.bonus_awarded, COMPLETION_BADGE_POINTS);
        assert!(confirmed.motivation.points_doubled);
        assert_eq!(
            confirmed.motivation.status(),
            MotivationStatus::Confirmed { bonus_paid: true }
        );
        assert_eq!(f.total(receiver).await, before + COMPLETION_BADGE_POINTS);

        let err = assert_err!(f.motivation.confirm(f.tenant, id, receiver).await);
        assert!(matches!(err, ProgressionError::AlreadyConfirmed));
        assert_eq!(f.total(receiver).await, before + COMPLETION_BADGE_POINTS);

        let bonuses = f
            .store
            .ledger_entries(f.tenant, receiver)
            .await
            .into_iter()
            .filter(|e| e.source == PointSource::Motivation)
            .count();
        assert_eq!(bonuses, 1);
    }

    #[tokio::test]
    async fn test_only_receiver_confirms() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        let id = sent_motivation(&f, sender, receiver).await;

        let err = assert_err!(f.motivation.confirm(f.tenant, id, sender).await);
        assert!(matches!(err, ProgressionError::NotReceiver));
        let err = assert_err!(f.motivation.confirm(f.tenant, MotivationId::new(), receiver).await);
        assert!(matches!(err, ProgressionError::MotivationNotFound));

        let stored = f.store.motivation(id).await.unwrap();
        assert_eq!(stored.status(), MotivationStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_without_passing_attempt_forfeits_bonus() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        let id = sent_motivation(&f, sender, receiver).await;
        f.attempt(receiver, ChallengeLevel::Easy, 50).await;

        let confirmed = assert_ok!(f.motivation.confirm(f.tenant, id, receiver).await);
        assert_eq!(confirmed.bonus_awarded, 0);
        assert!(!confirmed.motivation.points_doubled);
        assert_eq!(
            confirmed.motivation.status(),
            MotivationStatus::Confirmed { bonus_paid: false }
        );

        f.attempt(receiver, ChallengeLevel::Easy, 100).await;
        let err = assert_err!(f.motivation.confirm(f.tenant, id, receiver).await);
        assert!(matches!(err, ProgressionError::AlreadyConfirmed));
        assert_eq!(f.total(receiver).await, 0);
    }

    #[tokio::test]
    async fn test_confirm_uses_default_bonus_without_badge() {
        let f = Fixture::with_completion_badge(None).await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        let id = sent_motivation(&f, sender, receiver).await;
        f.attempt(receiver, ChallengeLevel::Easy, 100).await;

        let confirmed = assert_ok!(f.motivation.confirm(f.tenant, id, receiver).await);
        assert_eq!(confirmed.bonus_awarded, 100);
        assert_eq!(confirmed.total_points, Some(100));
    }

    #[tokio::test]
    async fn test_concurrent_confirms_pay_once() {
        let f = Fixture::new().await;
        let sender = f.learner("ada").await;
        let receiver = f.learner("grace").await;
        let id = sent_motivation(&f, sender, receiver).await;
        f.attempt(receiver, ChallengeLevel::Easy, 100).await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let motivation = f.motivation.clone();
            let tenant = f.tenant;
            handles.push(tokio::spawn(async move {
                motivation.confirm(tenant, id, receiver).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, ProgressionError::AlreadyConfirmed)),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(f.total(receiver).await, COMPLETION_BADGE_POINTS);
    }
}
