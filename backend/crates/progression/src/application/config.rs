//! Application Configuration
//!
//! Tunables for the progression use cases. Challenge level thresholds are
//! fixed in the domain and are not configurable.

use std::env;
use std::str::FromStr;

use crate::error::{ProgressionError, ProgressionResult};

/// Progression application configuration
#[derive(Debug, Clone)]
pub struct ProgressionConfig {
    /// Minimum quiz score (percent) that awards activity points
    pub quiz_pass_percent: u8,
    /// Motivation bonus when the qualifying challenge has no badge
    pub default_motivation_bonus: i64,
    /// Max receivers per `send` call
    pub max_motivation_receivers: usize,
    /// Max motivation message length in characters
    pub max_motivation_message_len: usize,
    /// Default ledger history page size
    pub history_page_size: usize,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            quiz_pass_percent: 70,
            default_motivation_bonus: 100,
            max_motivation_receivers: 5,
            max_motivation_message_len: 500,
            history_page_size: 50,
        }
    }
}

impl ProgressionConfig {
    /// Defaults overridden by `PROGRESSION_*` environment variables
    pub fn from_env() -> ProgressionResult<Self> {
        let defaults = Self::default();
        Self {
            quiz_pass_percent: read_var("PROGRESSION_QUIZ_PASS_PERCENT", defaults.quiz_pass_percent)?,
            default_motivation_bonus: read_var(
                "PROGRESSION_DEFAULT_MOTIVATION_BONUS",
                defaults.default_motivation_bonus,
            )?,
            max_motivation_receivers: read_var(
                "PROGRESSION_MAX_MOTIVATION_RECEIVERS",
                defaults.max_motivation_receivers,
            )?,
            max_motivation_message_len: read_var(
                "PROGRESSION_MAX_MOTIVATION_MESSAGE_LEN",
                defaults.max_motivation_message_len,
            )?,
            history_page_size: read_var("PROGRESSION_HISTORY_PAGE_SIZE", defaults.history_page_size)?,
        }
        .validated()
    }

    fn validated(self) -> ProgressionResult<Self> {
        if self.quiz_pass_percent > 100 {
            return Err(ProgressionError::Validation(
                "quiz_pass_percent must be between 0 and 100".into(),
            ));
        }
        if self.default_motivation_bonus < 0 {
            return Err(ProgressionError::Validation(
                "default_motivation_bonus must not be negative".into(),
            ));
        }
        if self.history_page_size == 0 {
            return Err(ProgressionError::Validation(
                "history_page_size must be positive".into(),
            ));
        }
        Ok(self)
    }
}

fn read_var<T: FromStr>(name: &str, default: T) -> ProgressionResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ProgressionError::Validation(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
