pub mod import;
pub mod mastery;
pub mod practice;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod store;
pub mod sync;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use mastery::MasteryEngine;
pub use practice::{PracticeOutcome, QuickPractice};
pub use session::{
    AnswerOutcome, Advance, Answer, PresentationMode, Question, SessionCoordinator, SessionMode,
    Stage,
};
pub use store::{InMemoryStore, StoreError, StoreResult, WordStore};

pub type WordId = Uuid;
pub type CourseId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Word {
    pub id: WordId,
    pub course_id: CourseId,
    pub word: String,
    pub pinyin: String,
    pub definition: String,
    pub example: Option<String>,
    pub audio_ref: Option<String>,
}

/// Per-word learning progress. Created all-default alongside its word and
/// only ever mutated by [`MasteryEngine`], the difficulty toggle, or review
/// confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LearningState {
    pub is_learned: bool,
    pub is_difficult: bool,
    pub consecutive_correct: u32,
    pub error_count: u32,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub review_interval_index: usize,
}

impl LearningState {
    /// Builds a state from raw stored counters, clamping anything negative to
    /// zero.
    pub fn from_raw(
        is_learned: bool,
        is_difficult: bool,
        consecutive_correct: i64,
        error_count: i64,
        last_reviewed: Option<DateTime<Utc>>,
        next_due_at: Option<DateTime<Utc>>,
        review_interval_index: i64,
    ) -> Self {
        Self {
            is_learned,
            is_difficult,
            consecutive_correct: clamp_counter(consecutive_correct),
            error_count: clamp_counter(error_count),
            last_reviewed,
            next_due_at,
            review_interval_index: review_interval_index.max(0) as usize,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_learned && self.next_due_at.is_some_and(|due| due <= now)
    }
}

fn clamp_counter(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

/// A word together with its learning state, the unit every store returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyWord {
    pub word: Word,
    pub state: LearningState,
}

impl StudyWord {
    pub fn id(&self) -> WordId {
        self.word.id
    }
}

/// Content of a word that has not been stored yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewWord {
    pub word: String,
    pub pinyin: String,
    pub definition: String,
    pub example: Option<String>,
    pub audio_ref: Option<String>,
}

impl NewWord {
    pub fn into_word(self, course_id: CourseId) -> Word {
        Word {
            id: Uuid::new_v4(),
            course_id,
            word: self.word,
            pinyin: self.pinyin,
            definition: self.definition,
            example: self.example,
            audio_ref: self.audio_ref,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mastery_threshold must be at least 1")]
    ZeroMasteryThreshold,
    #[error("auto_flag_threshold must be at least 1")]
    ZeroAutoFlagThreshold,
    #[error("interval_ladder_hours must contain at least one step")]
    EmptyLadder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasteryConfig {
    pub mastery_threshold: u32,
    pub difficulty_clear_threshold: u32,
    pub auto_flag_threshold: u32,
    pub interval_ladder_hours: Vec<u32>,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            mastery_threshold: 5,
            difficulty_clear_threshold: 1,
            auto_flag_threshold: 3,
            interval_ladder_hours: vec![4, 24, 72, 168, 336, 720],
        }
    }
}

impl MasteryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mastery_threshold == 0 {
            return Err(ConfigError::ZeroMasteryThreshold);
        }
        if self.auto_flag_threshold == 0 {
            return Err(ConfigError::ZeroAutoFlagThreshold);
        }
        if self.interval_ladder_hours.is_empty() {
            return Err(ConfigError::EmptyLadder);
        }
        Ok(())
    }

    pub fn interval(&self, index: usize) -> Duration {
        let last = self.interval_ladder_hours.len().saturating_sub(1);
        let hours = self
            .interval_ladder_hours
            .get(index.min(last))
            .copied()
            .unwrap_or(0);
        Duration::hours(hours.into())
    }

    pub fn max_interval_index(&self) -> usize {
        self.interval_ladder_hours.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub session_size: usize,
    pub practice_seconds: u64,
    pub practice_questions: usize,
    pub review_limit: usize,
    pub choice_count: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_size: 10,
            practice_seconds: 60,
            practice_questions: 50,
            review_limit: 20,
            choice_count: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_counters_are_clamped() {
        let state = LearningState::from_raw(false, false, -3, -1, None, None, -2);
        assert_eq!(state.consecutive_correct, 0);
        assert_eq!(state.error_count, 0);
        assert_eq!(state.review_interval_index, 0);
    }

    #[test]
    fn interval_saturates_at_last_step() {
        let config = MasteryConfig::default();
        assert_eq!(config.interval(0), Duration::hours(4));
        assert_eq!(config.interval(99), Duration::hours(720));
    }

    #[test]
    fn validate_rejects_empty_ladder() {
        let config = MasteryConfig {
            interval_ladder_hours: Vec::new(),
            ..MasteryConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyLadder));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"session_size": 4}"#).unwrap();
        assert_eq!(config.session_size, 4);
        assert_eq!(config.practice_questions, 50);
    }
}
