//! Domain Value Objects
//!
//! Immutable value types for the progression domain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final challenge tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeLevel {
    Easy,
    Medium,
    Hard,
}

impl ChallengeLevel {
    pub const ALL: [ChallengeLevel; 3] = [
        ChallengeLevel::Easy,
        ChallengeLevel::Medium,
        ChallengeLevel::Hard,
    ];

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            ChallengeLevel::Easy => "easy",
            ChallengeLevel::Medium => "medium",
            ChallengeLevel::Hard => "hard",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "easy" => Some(ChallengeLevel::Easy),
            "medium" => Some(ChallengeLevel::Medium),
            "hard" => Some(ChallengeLevel::Hard),
            _ => None,
        }
    }

    /// Minimum score to pass this level. Fixed per level, never taken from
    /// the challenge row.
    #[inline]
    pub const fn pass_threshold(&self) -> Score {
        match self {
            ChallengeLevel::Easy => Score::from_percent(60),
            ChallengeLevel::Medium => Score::from_percent(70),
            ChallengeLevel::Hard => Score::from_percent(80),
        }
    }

    /// Level whose pass unlocks this one
    #[inline]
    pub const fn prerequisite(&self) -> Option<ChallengeLevel> {
        match self {
            ChallengeLevel::Easy => None,
            ChallengeLevel::Medium => Some(ChallengeLevel::Easy),
            ChallengeLevel::Hard => Some(ChallengeLevel::Medium),
        }
    }

    #[inline]
    pub const fn next(&self) -> Option<ChallengeLevel> {
        match self {
            ChallengeLevel::Easy => Some(ChallengeLevel::Medium),
            ChallengeLevel::Medium => Some(ChallengeLevel::Hard),
            ChallengeLevel::Hard => None,
        }
    }

    #[inline]
    pub fn is_passing(&self, score: Score) -> bool {
        score >= self.pass_threshold()
    }
}

impl fmt::Display for ChallengeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind of course activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Lesson,
    Quiz,
    Assignment,
    Video,
    Reading,
}

impl ActivityType {
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            ActivityType::Lesson => "lesson",
            ActivityType::Quiz => "quiz",
            ActivityType::Assignment => "assignment",
            ActivityType::Video => "video",
            ActivityType::Reading => "reading",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "lesson" => Some(ActivityType::Lesson),
            "quiz" => Some(ActivityType::Quiz),
            "assignment" => Some(ActivityType::Assignment),
            "video" => Some(ActivityType::Video),
            "reading" => Some(ActivityType::Reading),
            _ => None,
        }
    }

    /// Only quizzes gate their points on the submitted score
    #[inline]
    pub const fn is_scored(&self) -> bool {
        matches!(self, ActivityType::Quiz)
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    Earned,
    Spent,
}

impl PointType {
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            PointType::Earned => "earned",
            PointType::Spent => "spent",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "earned" => Some(PointType::Earned),
            "spent" => Some(PointType::Spent),
            _ => None,
        }
    }
}

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    Activity,
    FinalChallenge,
    Badge,
    Motivation,
    /// Administrative adjustment or redemption
    Manual,
}

impl PointSource {
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            PointSource::Activity => "activity",
            PointSource::FinalChallenge => "final_challenge",
            PointSource::Badge => "badge",
            PointSource::Motivation => "motivation",
            PointSource::Manual => "manual",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "activity" => Some(PointSource::Activity),
            "final_challenge" => Some(PointSource::FinalChallenge),
            "badge" => Some(PointSource::Badge),
            "motivation" => Some(PointSource::Motivation),
            "manual" => Some(PointSource::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for PointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Percentage score with two decimal places, stored in hundredths
/// (`7500` is `75.00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Score(u16);

impl Score {
    pub const ZERO: Score = Score(0);
    pub const MAX: Score = Score(10_000);

    pub const fn from_percent(percent: u16) -> Self {
        Self(percent * 100)
    }

    pub fn from_hundredths(hundredths: u16) -> Option<Self> {
        (hundredths <= Self::MAX.0).then_some(Self(hundredths))
    }

    /// `round(100 * correct / total, 2)`, half away from zero.
    /// Zero questions score zero.
    pub fn from_ratio(correct: usize, total: usize) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        let correct = correct.min(total) as u64;
        let total = total as u64;
        let hundredths = (correct * 20_000 + total) / (2 * total);
        Self(hundredths as u16)
    }

    pub const fn hundredths(&self) -> u16 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Letter grade shown with a submitted attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn for_score(score: Score) -> Self {
        match score.hundredths() {
            9_000.. => Grade::APlus,
            8_000.. => Grade::A,
            7_000.. => Grade::B,
            6_000.. => Grade::C,
            5_000.. => Grade::D,
            _ => Grade::F,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
