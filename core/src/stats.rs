use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StudyWord;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseStats {
    pub total: usize,
    pub learned: usize,
    pub difficult: usize,
    pub due: usize,
    pub accuracy_percent: u32,
    pub progress_percent: u32,
}

fn percent(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// Summarises a set of words. Accuracy is estimated from the current streak
/// against lifetime errors, counting only words that have been answered.
pub fn course_stats(words: &[StudyWord], now: DateTime<Utc>) -> CourseStats {
    let mut stats = CourseStats {
        total: words.len(),
        ..CourseStats::default()
    };
    let mut streaks = 0u64;
    let mut answered = 0u64;
    for entry in words {
        let state = &entry.state;
        if state.is_learned {
            stats.learned += 1;
        }
        if state.is_difficult {
            stats.difficult += 1;
        }
        if state.is_due(now) {
            stats.due += 1;
        }
        let correct = u64::from(state.consecutive_correct);
        let errors = u64::from(state.error_count);
        if correct > 0 || errors > 0 {
            streaks += correct;
            answered += correct + errors;
        }
    }
    stats.accuracy_percent = percent(streaks, answered);
    stats.progress_percent = percent(stats.learned as u64, stats.total as u64);
    stats
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PerformanceTier {
    Perfect,
    Strong,
    Fair,
    NeedsWork,
}

/// Running count of answers given in one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTally {
    pub answered: u32,
    pub correct: u32,
}

impl SessionTally {
    pub fn record(&mut self, correct: bool) {
        self.answered += 1;
        if correct {
            self.correct += 1;
        }
    }

    pub fn incorrect(&self) -> u32 {
        self.answered - self.correct
    }

    pub fn accuracy_percent(&self) -> u32 {
        percent(self.correct.into(), self.answered.into())
    }

    pub fn tier(&self) -> PerformanceTier {
        let correct = f64::from(self.correct);
        let answered = f64::from(self.answered);
        if self.answered > 0 && self.correct == self.answered {
            PerformanceTier::Perfect
        } else if correct > answered * 0.8 {
            PerformanceTier::Strong
        } else if correct > answered * 0.6 {
            PerformanceTier::Fair
        } else {
            PerformanceTier::NeedsWork
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LearningState, Word};
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(state: LearningState) -> StudyWord {
        StudyWord {
            word: Word {
                id: Uuid::new_v4(),
                course_id: Uuid::nil(),
                word: "字".to_string(),
                pinyin: "zì".to_string(),
                definition: "character".to_string(),
                example: None,
                audio_ref: None,
            },
            state,
        }
    }

    #[test]
    fn stats_count_each_pool() {
        let now = Utc::now();
        let words = vec![
            entry(LearningState::default()),
            entry(LearningState {
                is_learned: true,
                consecutive_correct: 6,
                error_count: 2,
                next_due_at: Some(now - Duration::hours(1)),
                ..LearningState::default()
            }),
            entry(LearningState {
                is_difficult: true,
                consecutive_correct: 0,
                error_count: 4,
                ..LearningState::default()
            }),
        ];
        let stats = course_stats(&words, now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.learned, 1);
        assert_eq!(stats.difficult, 1);
        assert_eq!(stats.due, 1);
        assert_eq!(stats.accuracy_percent, 50);
        assert_eq!(stats.progress_percent, 33);
    }

    #[test]
    fn empty_set_has_zero_percentages() {
        let stats = course_stats(&[], Utc::now());
        assert_eq!(stats, CourseStats::default());
    }

    #[test]
    fn tally_tiers() {
        let tally = |answered, correct| SessionTally { answered, correct };
        assert_eq!(tally(5, 5).tier(), PerformanceTier::Perfect);
        assert_eq!(tally(10, 9).tier(), PerformanceTier::Strong);
        assert_eq!(tally(10, 8).tier(), PerformanceTier::Fair);
        assert_eq!(tally(10, 6).tier(), PerformanceTier::NeedsWork);
        assert_eq!(tally(0, 0).tier(), PerformanceTier::NeedsWork);
        assert_eq!(tally(4, 3).incorrect(), 1);
        assert_eq!(tally(4, 3).accuracy_percent(), 75);
    }
}
