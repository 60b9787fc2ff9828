//! Timed drill: one question per word, no preview or verify stage, bounded by
//! a wall-clock budget and a question cap.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::scheduler;
use crate::session::{self, Answer, Question, SessionError, SessionMode};
use crate::stats::SessionTally;
use crate::store::{StoreResult, WordStore};
use crate::{CourseId, LearningState, MasteryEngine, SessionConfig, StudyWord, Word};

const POINTS_PER_CORRECT: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PracticeOutcome {
    pub word: Word,
    pub correct: bool,
    pub state: LearningState,
    pub score: u32,
    pub persist_error: Option<String>,
}

pub struct QuickPractice<'a, S: WordStore + ?Sized, R: Rng> {
    store: &'a S,
    engine: MasteryEngine,
    rng: R,
    config: SessionConfig,
    words: Vec<StudyWord>,
    cursor: usize,
    started_at: DateTime<Utc>,
    question: Option<Question>,
    tally: SessionTally,
}

impl<'a, S: WordStore + ?Sized, R: Rng> QuickPractice<'a, S, R> {
    /// Shuffles the practice pool (learned words still flagged difficult) and
    /// caps it at `practice_questions`. The clock starts at `now`.
    pub fn start(
        store: &'a S,
        course_id: Option<CourseId>,
        now: DateTime<Utc>,
        config: SessionConfig,
        mut rng: R,
    ) -> StoreResult<Self> {
        let all = session::load(store, course_id)?;
        let mut words: Vec<StudyWord> = scheduler::practice_words(&all).into_iter().cloned().collect();
        words.shuffle(&mut rng);
        words.truncate(config.practice_questions);
        info!(mode = ?SessionMode::Practice, course = ?course_id, words = words.len(), "session started");
        Ok(Self {
            store,
            engine: store.engine().clone(),
            rng,
            config,
            words,
            cursor: 0,
            started_at: now,
            question: None,
            tally: SessionTally::default(),
        })
    }

    fn deadline(&self) -> DateTime<Utc> {
        let budget = i64::try_from(self.config.practice_seconds).unwrap_or(i64::MAX / 1_000);
        self.started_at + Duration::seconds(budget)
    }

    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline() - now).max(Duration::zero())
    }

    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
            || self.tally.answered as usize >= self.config.practice_questions
            || self.cursor >= self.words.len()
    }

    pub fn score(&self) -> u32 {
        self.tally.correct * POINTS_PER_CORRECT
    }

    pub fn tally(&self) -> SessionTally {
        self.tally
    }

    pub fn current(&self) -> Option<&StudyWord> {
        self.words.get(self.cursor)
    }

    /// The question for the current word, or `None` once either bound is hit
    /// or the pool runs out. Asking again without answering returns the same
    /// question.
    pub fn next_question(&mut self, now: DateTime<Utc>) -> Option<Question> {
        if self.is_over(now) {
            return None;
        }
        if let Some(question) = &self.question {
            return Some(question.clone());
        }
        let target = self.words[self.cursor].word.clone();
        let question = session::pick_presentation(&target, &self.words, self.config.choice_count, &mut self.rng);
        self.question = Some(question.clone());
        Some(question)
    }

    pub fn answer(&mut self, answer: &Answer, now: DateTime<Utc>) -> Result<PracticeOutcome, SessionError> {
        if self.is_over(now) {
            self.question = None;
            return Err(SessionError::Finished);
        }
        let Some(question) = self.question.take() else {
            return Err(SessionError::WrongStage {
                expected: session::Stage::Attempt,
                actual: session::Stage::Preview,
            });
        };
        let entry = &self.words[self.cursor];
        let correct = match session::grade(&question, &entry.word, answer) {
            Ok(correct) => correct,
            Err(err) => {
                self.question = Some(question);
                return Err(err);
            }
        };
        let (state, persist_error) = session::record(self.store, &self.engine, entry, correct, now);
        let word = entry.word.clone();
        self.words[self.cursor].state = state.clone();
        self.tally.record(correct);
        self.cursor += 1;

        if self.is_over(now) {
            info!(
                mode = ?SessionMode::Practice,
                answered = self.tally.answered,
                score = self.score(),
                "session complete"
            );
        }
        Ok(PracticeOutcome {
            word,
            correct,
            state,
            score: self.score(),
            persist_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PresentationMode;
    use crate::store::InMemoryStore;
    use crate::NewWord;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn practice_store(count: usize) -> InMemoryStore {
        let store = InMemoryStore::default();
        let course = store.create_course("drill", None).unwrap();
        let words = (0..count)
            .map(|i| NewWord {
                word: format!("练{i}"),
                pinyin: format!("lian{i}"),
                definition: format!("drill {i}"),
                example: None,
                audio_ref: None,
            })
            .collect();
        let stored = store.insert_words(course.id, words).unwrap();
        for word in stored {
            let state = LearningState {
                is_learned: true,
                is_difficult: true,
                next_due_at: Some(Utc::now()),
                ..LearningState::default()
            };
            store.put_state(word.id, &state).unwrap();
        }
        store
    }

    fn right(question: &Question, target: &Word) -> Answer {
        match question.mode {
            PresentationMode::SpellWord => Answer::Text(target.word.clone()),
            _ => Answer::Choice(target.id),
        }
    }

    #[test]
    fn question_cap_ends_the_drill() {
        let store = practice_store(8);
        let config = SessionConfig {
            practice_questions: 5,
            ..SessionConfig::default()
        };
        let now = Utc::now();
        let mut drill = QuickPractice::start(&store, None, now, config, StdRng::seed_from_u64(8)).unwrap();
        let mut answered = 0;
        while let Some(question) = drill.next_question(now) {
            let target = drill.current().unwrap().word.clone();
            drill.answer(&right(&question, &target), now).unwrap();
            answered += 1;
        }
        assert_eq!(answered, 5);
        assert_eq!(drill.score(), 50);
    }

    #[test]
    fn timer_ends_the_drill() {
        let store = practice_store(8);
        let now = Utc::now();
        let mut drill =
            QuickPractice::start(&store, None, now, SessionConfig::default(), StdRng::seed_from_u64(3)).unwrap();
        let question = drill.next_question(now).unwrap();
        let target = drill.current().unwrap().word.clone();

        let late = now + Duration::seconds(61);
        assert!(matches!(drill.answer(&right(&question, &target), late), Err(SessionError::Finished)));
        assert!(drill.next_question(late).is_none());
        assert_eq!(drill.time_left(late), Duration::zero());
        assert_eq!(drill.score(), 0);
    }

    #[test]
    fn exhausted_pool_ends_the_drill_and_scores_correct_answers() {
        let store = practice_store(4);
        let now = Utc::now();
        let mut drill =
            QuickPractice::start(&store, None, now, SessionConfig::default(), StdRng::seed_from_u64(5)).unwrap();
        let mut first = true;
        while let Some(question) = drill.next_question(now) {
            let target = drill.current().unwrap().word.clone();
            let answer = if first {
                first = false;
                Answer::Text("不对".into())
            } else {
                right(&question, &target)
            };
            match drill.answer(&answer, now) {
                Ok(_) => {}
                Err(SessionError::AnswerKind { .. }) => {
                    let other = question.options.iter().find(|option| option.id != target.id).unwrap();
                    drill.answer(&Answer::Choice(other.id), now).unwrap();
                }
                Err(err) => panic!("unexpected error {err}"),
            }
        }
        assert_eq!(drill.tally().answered, 4);
        assert_eq!(drill.score(), 30);
    }

    #[test]
    fn only_learned_difficult_words_are_drilled() {
        let store = practice_store(2);
        let course = store.create_course("fresh", None).unwrap();
        store
            .insert_words(course.id, vec![NewWord {
                word: "新".into(),
                pinyin: "xīn".into(),
                definition: "new".into(),
                example: None,
                audio_ref: None,
            }])
            .unwrap();
        let now = Utc::now();
        let config = SessionConfig::default();
        let drill = QuickPractice::start(&store, None, now, config.clone(), StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(drill.words.len(), 2);
        let empty = QuickPractice::start(&store, Some(course.id), now, config, StdRng::seed_from_u64(1)).unwrap();
        assert!(empty.is_over(Utc::now()));
    }
}
