//! Domain Services
//!
//! Pure progression logic: scoring, level gating and learner levels.

use crate::domain::entities::{ChallengeAttempt, ChallengeQuestion, SubmittedAnswer};
use crate::domain::value_objects::{ChallengeLevel, Score};

/// Grade submitted answers against a question snapshot
///
/// Returns the number of correct answers and the score. Answers are keyed
/// by `question_index`, so a later answer for the same index replaces an
/// earlier one; questions without an answer count as incorrect.
pub fn score_answers(questions: &[ChallengeQuestion], answers: &[SubmittedAnswer]) -> (usize, Score) {
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(index, question)| {
            answers
                .iter()
                .rev()
                .find(|answer| answer.question_index == *index)
                .is_some_and(|answer| answer.selected == question.correct_answer)
        })
        .count();

    (correct, Score::from_ratio(correct, questions.len()))
}

/// Which challenge levels of one course a user has passed at least once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelProgress {
    easy: bool,
    medium: bool,
    hard: bool,
}

impl LevelProgress {
    pub fn from_attempts<'a>(attempts: impl IntoIterator<Item = &'a ChallengeAttempt>) -> Self {
        let mut progress = Self::default();
        for attempt in attempts {
            progress.record(attempt);
        }
        progress
    }

    /// Fold one attempt in. Only completed, passing attempts count.
    pub fn record(&mut self, attempt: &ChallengeAttempt) {
        if !attempt.is_passed() {
            return;
        }
        match attempt.level {
            ChallengeLevel::Easy => self.easy = true,
            ChallengeLevel::Medium => self.medium = true,
            ChallengeLevel::Hard => self.hard = true,
        }
    }

    pub fn passed(&self, level: ChallengeLevel) -> bool {
        match level {
            ChallengeLevel::Easy => self.easy,
            ChallengeLevel::Medium => self.medium,
            ChallengeLevel::Hard => self.hard,
        }
    }

    /// A level is open once its prerequisite has a passing attempt
    pub fn is_unlocked(&self, level: ChallengeLevel) -> bool {
        level.prerequisite().is_none_or(|prev| self.passed(prev))
    }

    pub fn all_passed(&self) -> bool {
        self.easy && self.medium && self.hard
    }

    /// Lowest level that is open and not yet passed
    pub fn next_level(&self) -> Option<ChallengeLevel> {
        ChallengeLevel::ALL
            .into_iter()
            .find(|level| self.is_unlocked(*level) && !self.passed(*level))
    }
}

/// Most recently completed attempt that passed its own level threshold
pub fn latest_passing_attempt<'a>(
    attempts: impl IntoIterator<Item = &'a ChallengeAttempt>,
) -> Option<&'a ChallengeAttempt> {
    attempts
        .into_iter()
        .filter(|attempt| attempt.is_passed())
        .max_by_key(|attempt| attempt.completed_at)
}

pub const MAX_LEARNER_LEVEL: u32 = 100;

const BASE_POINTS_PER_LEVEL: f64 = 100.0;
const LEVEL_MULTIPLIER: f64 = 1.5;

const LEVEL_TITLES: [(u32, &str); 11] = [
    (1, "Beginner"),
    (5, "Student"),
    (10, "Dedicated"),
    (15, "Persistent"),
    (20, "Knowledgeable"),
    (25, "Expert"),
    (30, "Mentor"),
    (40, "Guru"),
    (50, "Master"),
    (75, "Legend"),
    (100, "Immortal"),
];

/// Points needed to go from `level` to `level + 1`
pub fn points_for_level_up(level: u32) -> i64 {
    let exponent = f64::from(level.max(1) - 1) / 10.0;
    (BASE_POINTS_PER_LEVEL * LEVEL_MULTIPLIER.powf(exponent)).round() as i64
}

/// Cumulative points at which `level` is reached
pub fn points_required_for_level(level: u32) -> i64 {
    (1..level.min(MAX_LEARNER_LEVEL)).map(points_for_level_up).sum()
}

/// Highest level whose cumulative requirement is covered by `total_points`
pub fn level_for_points(total_points: i64) -> u32 {
    let mut level = 1;
    let mut required = 0;
    while level < MAX_LEARNER_LEVEL {
        required += points_for_level_up(level);
        if total_points < required {
            break;
        }
        level += 1;
    }
    level
}

pub fn level_title(level: u32) -> &'static str {
    LEVEL_TITLES
        .iter()
        .rev()
        .find(|(from, _)| level >= *from)
        .map_or(LEVEL_TITLES[0].1, |(_, title)| title)
}

/// Learner level derived from a point total
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    pub level: u32,
    pub title: &'static str,
    pub total_points: i64,
    pub points_in_level: i64,
    /// Zero at the maximum level
    pub points_to_next_level: i64,
    /// Percent of the current level covered, one decimal
    pub progress_percent: f64,
    pub is_max_level: bool,
}

impl LevelInfo {
    pub fn for_points(total_points: i64) -> Self {
        let total_points = total_points.max(0);
        let level = level_for_points(total_points);
        let floor = points_required_for_level(level);
        let is_max_level = level >= MAX_LEARNER_LEVEL;

        let (points_to_next_level, progress_percent) = if is_max_level {
            (0, 100.0)
        } else {
            let span = points_for_level_up(level);
            let into = total_points - floor;
            let progress = (into as f64 / span as f64 * 1000.0).round() / 10.0;
            (span - into, progress)
        };

        Self {
            level,
            title: level_title(level),
            total_points,
            points_in_level: total_points - floor,
            points_to_next_level,
            progress_percent,
            is_max_level,
        }
    }
}
