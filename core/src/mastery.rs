use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{ConfigError, LearningState, MasteryConfig};

/// Decides how a single answer moves a word's learning state.
#[derive(Debug, Clone, Default)]
pub struct MasteryEngine {
    config: MasteryConfig,
}

impl MasteryEngine {
    pub fn new(config: MasteryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    pub fn mastery_threshold(&self) -> u32 {
        self.config.mastery_threshold
    }

    /// Applies one answer to `state` and returns the resulting state.
    ///
    /// Only learned words carry a due date; answers on a word that is still
    /// new move its counters but leave `next_due_at` unset.
    pub fn update(&self, state: &LearningState, correct: bool, now: DateTime<Utc>) -> LearningState {
        let mut next = state.clone();
        let max_index = self.config.max_interval_index();
        next.review_interval_index = next.review_interval_index.min(max_index);

        if correct {
            next.consecutive_correct = next.consecutive_correct.saturating_add(1);
            if !next.is_learned && next.consecutive_correct >= self.config.mastery_threshold {
                next.is_learned = true;
                next.review_interval_index = 0;
                debug!(streak = next.consecutive_correct, "word promoted to learned");
            } else if next.is_learned {
                next.review_interval_index = (next.review_interval_index + 1).min(max_index);
            }
            if next.is_difficult && next.consecutive_correct >= self.config.difficulty_clear_threshold {
                next.is_difficult = false;
                debug!(streak = next.consecutive_correct, "difficulty flag cleared");
            }
        } else {
            next.consecutive_correct = 0;
            next.error_count = next.error_count.saturating_add(1);
            next.review_interval_index = next.review_interval_index.saturating_sub(1);
            if !next.is_difficult && next.error_count >= self.config.auto_flag_threshold {
                next.is_difficult = true;
                debug!(errors = next.error_count, "word auto-flagged as difficult");
            }
        }

        if next.is_learned {
            next.next_due_at = Some(now + self.config.interval(next.review_interval_index));
        }
        next.last_reviewed = Some(now);
        next
    }

    /// Moves a word into the review rotation if it is not there yet. Words that
    /// are already learned are returned unchanged.
    pub fn confirm_learned(&self, state: &LearningState, now: DateTime<Utc>) -> LearningState {
        if state.is_learned {
            return state.clone();
        }
        LearningState {
            is_learned: true,
            review_interval_index: 0,
            next_due_at: Some(now + self.config.interval(0)),
            ..state.clone()
        }
    }
}
