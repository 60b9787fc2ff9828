//! Preview / attempt / verify cycles over a working set of words.
//!
//! A coordinator owns the in-memory copy of its working set. Every answer is
//! written through the store straight away; when that write fails the
//! coordinator keeps going with the state it computed locally and reports the
//! failure in the outcome instead of aborting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scheduler;
use crate::stats::SessionTally;
use crate::store::{StoreError, StoreResult, WordStore};
use crate::{CourseId, LearningState, MasteryEngine, SessionConfig, StudyWord, Word, WordId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionMode {
    Learn,
    Review,
    Difficult,
    Practice,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    Preview,
    Attempt,
    Verify,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PresentationMode {
    /// Word shown, pick its definition.
    SelectDefinition,
    /// Definition shown, pick the word.
    SelectWord,
    /// Audio played, pick the word it belongs to.
    SelectPronunciation,
    /// Definition shown, type the word.
    SpellWord,
}

impl PresentationMode {
    pub fn is_multiple_choice(self) -> bool {
        !matches!(self, PresentationMode::SpellWord)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub word_id: WordId,
    pub mode: PresentationMode,
    pub options: Vec<Word>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Answer {
    Choice(WordId),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub word: Word,
    pub correct: bool,
    pub state: LearningState,
    /// Set when the store rejected the write; `state` is then the locally
    /// computed one.
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub mode: SessionMode,
    pub words: usize,
    pub rounds: u32,
    pub tally: SessionTally,
    pub promoted: Vec<WordId>,
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next,
    /// The learn gate was not met; the set starts over from the first word.
    Restarted { pending: usize },
    Complete(SessionSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyToggle {
    pub word_id: WordId,
    pub is_difficult: bool,
    pub advance: Option<Advance>,
    pub persist_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("expected the {expected:?} stage but the session is at {actual:?}")]
    WrongStage { expected: Stage, actual: Stage },
    #[error("the session has finished")]
    Finished,
    #[error("option {0} was not offered")]
    UnknownOption(WordId),
    #[error("{mode:?} expects a {expected} answer")]
    AnswerKind {
        mode: PresentationMode,
        expected: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Picks how the next word is asked. Multiple-choice modes need a full set of
/// options; pronunciation additionally needs audio. Spelling is always there
/// as the fallback.
pub(crate) fn pick_presentation<R: Rng + ?Sized>(
    target: &Word,
    pool: &[StudyWord],
    choice_count: usize,
    rng: &mut R,
) -> Question {
    let mut modes = vec![PresentationMode::SpellWord];
    if scheduler::multiple_choice_available(pool.len(), choice_count) {
        modes.push(PresentationMode::SelectDefinition);
        modes.push(PresentationMode::SelectWord);
        if target.audio_ref.is_some() {
            modes.push(PresentationMode::SelectPronunciation);
        }
    }
    let mode = modes.choose(rng).copied().unwrap_or(PresentationMode::SpellWord);
    let options = if mode.is_multiple_choice() {
        scheduler::build_choices(target, pool, choice_count, rng)
    } else {
        None
    };
    match options {
        Some(options) => Question {
            word_id: target.id,
            mode,
            options,
        },
        None => Question {
            word_id: target.id,
            mode: PresentationMode::SpellWord,
            options: Vec::new(),
        },
    }
}

pub(crate) fn grade(question: &Question, target: &Word, answer: &Answer) -> Result<bool, SessionError> {
    match (question.mode, answer) {
        (PresentationMode::SelectDefinition | PresentationMode::SelectPronunciation, Answer::Choice(id)) => {
            if !question.options.iter().any(|option| option.id == *id) {
                return Err(SessionError::UnknownOption(*id));
            }
            Ok(*id == target.id)
        }
        (PresentationMode::SelectWord, Answer::Choice(id)) => question
            .options
            .iter()
            .find(|option| option.id == *id)
            .map(|option| option.word == target.word)
            .ok_or(SessionError::UnknownOption(*id)),
        (PresentationMode::SelectWord | PresentationMode::SpellWord, Answer::Text(text)) => {
            Ok(text.trim() == target.word)
        }
        (mode @ (PresentationMode::SelectDefinition | PresentationMode::SelectPronunciation), Answer::Text(_)) => {
            Err(SessionError::AnswerKind {
                mode,
                expected: "choice",
            })
        }
        (mode @ PresentationMode::SpellWord, Answer::Choice(_)) => Err(SessionError::AnswerKind {
            mode,
            expected: "text",
        }),
    }
}

/// Applies an answer to the session's copy of the state and writes the result
/// through the store. The session's copy stays authoritative whether or not
/// the write lands.
pub(crate) fn record<S: WordStore + ?Sized>(
    store: &S,
    engine: &MasteryEngine,
    entry: &StudyWord,
    correct: bool,
    now: DateTime<Utc>,
) -> (LearningState, Option<String>) {
    let next = engine.update(&entry.state, correct, now);
    match store.put_state(entry.word.id, &next) {
        Ok(()) => (next, None),
        Err(err) => {
            warn!(word = %entry.word.id, error = %err, "answer not persisted; continuing with local state");
            (next, Some(err.to_string()))
        }
    }
}

pub struct SessionCoordinator<'a, S: WordStore + ?Sized, R: Rng> {
    store: &'a S,
    engine: MasteryEngine,
    rng: R,
    config: SessionConfig,
    course_id: Option<CourseId>,
    mode: SessionMode,
    working_set: Vec<StudyWord>,
    progress: HashMap<WordId, u32>,
    cursor: usize,
    stage: Stage,
    question: Option<Question>,
    tally: SessionTally,
    rounds: u32,
    summary: Option<SessionSummary>,
}

impl<'a, S: WordStore + ?Sized, R: Rng> SessionCoordinator<'a, S, R> {
    fn with_working_set(
        store: &'a S,
        config: SessionConfig,
        rng: R,
        course_id: Option<CourseId>,
        mode: SessionMode,
        working_set: Vec<StudyWord>,
    ) -> Self {
        let progress = working_set.iter().map(|entry| (entry.word.id, 0)).collect();
        let mut session = Self {
            store,
            engine: store.engine().clone(),
            rng,
            config,
            course_id,
            mode,
            working_set,
            progress,
            cursor: 0,
            stage: Stage::Preview,
            question: None,
            tally: SessionTally::default(),
            rounds: 1,
            summary: None,
        };
        info!(mode = ?mode, course = ?course_id, words = session.working_set.len(), "session started");
        if session.working_set.is_empty() {
            session.finish(Vec::new(), None);
        }
        session
    }

    /// Draws up to `session_size` new words from the course.
    pub fn learn(store: &'a S, course_id: CourseId, config: SessionConfig, mut rng: R) -> StoreResult<Self> {
        let words = store.list_words(course_id)?;
        let working_set = scheduler::draw_learn_set(&words, config.session_size, &mut rng);
        Ok(Self::with_working_set(
            store,
            config,
            rng,
            Some(course_id),
            SessionMode::Learn,
            working_set,
        ))
    }

    /// Words due at `now`, most overdue first, across one course or all.
    pub fn review(
        store: &'a S,
        course_id: Option<CourseId>,
        now: DateTime<Utc>,
        config: SessionConfig,
        rng: R,
    ) -> StoreResult<Self> {
        let words = load(store, course_id)?;
        let working_set = scheduler::due_for_review(&words, now)
            .into_iter()
            .take(config.review_limit)
            .cloned()
            .collect();
        Ok(Self::with_working_set(
            store,
            config,
            rng,
            course_id,
            SessionMode::Review,
            working_set,
        ))
    }

    /// A linear walk over the difficult words.
    pub fn difficult(
        store: &'a S,
        course_id: Option<CourseId>,
        config: SessionConfig,
        rng: R,
    ) -> StoreResult<Self> {
        let words = load(store, course_id)?;
        let working_set = scheduler::difficult_words(&words)
            .into_iter()
            .take(config.review_limit)
            .cloned()
            .collect();
        Ok(Self::with_working_set(
            store,
            config,
            rng,
            course_id,
            SessionMode::Difficult,
            working_set,
        ))
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.working_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working_set.is_empty()
    }

    pub fn round(&self) -> u32 {
        self.rounds
    }

    /// Correct answers in a row each word needs before a learn session ends.
    pub fn mastery_threshold(&self) -> u32 {
        self.engine.mastery_threshold()
    }

    pub fn working_set(&self) -> &[StudyWord] {
        &self.working_set
    }

    pub fn current(&self) -> Option<&StudyWord> {
        if self.stage == Stage::Complete {
            return None;
        }
        self.working_set.get(self.cursor)
    }

    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    /// Correct answers in a row for `word_id` within this session.
    pub fn session_streak(&self, word_id: WordId) -> u32 {
        self.progress.get(&word_id).copied().unwrap_or(0)
    }

    pub fn tally(&self) -> SessionTally {
        self.tally
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    fn expect_stage(&self, expected: Stage) -> Result<(), SessionError> {
        if self.stage == Stage::Complete {
            return Err(SessionError::Finished);
        }
        if self.stage != expected {
            return Err(SessionError::WrongStage {
                expected,
                actual: self.stage,
            });
        }
        Ok(())
    }

    /// Leaves the preview of the current word and poses its question.
    pub fn begin_attempt(&mut self) -> Result<Question, SessionError> {
        self.expect_stage(Stage::Preview)?;
        let target = self.working_set[self.cursor].word.clone();
        let question = pick_presentation(&target, &self.working_set, self.config.choice_count, &mut self.rng);
        self.question = Some(question.clone());
        self.stage = Stage::Attempt;
        Ok(question)
    }

    pub fn submit(&mut self, answer: &Answer, now: DateTime<Utc>) -> Result<AnswerOutcome, SessionError> {
        self.expect_stage(Stage::Attempt)?;
        let Some(question) = self.question.as_ref() else {
            return Err(SessionError::WrongStage {
                expected: Stage::Attempt,
                actual: Stage::Preview,
            });
        };
        let entry = &self.working_set[self.cursor];
        let correct = grade(question, &entry.word, answer)?;

        let (state, persist_error) = record(self.store, &self.engine, entry, correct, now);
        let word = entry.word.clone();
        self.working_set[self.cursor].state = state.clone();

        let streak = self.progress.entry(word.id).or_insert(0);
        if correct {
            *streak += 1;
        } else {
            *streak = 0;
        }
        self.tally.record(correct);
        self.stage = Stage::Verify;

        Ok(AnswerOutcome {
            word,
            correct,
            state,
            persist_error,
        })
    }

    /// Moves on from the verify stage.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Advance, SessionError> {
        self.expect_stage(Stage::Verify)?;
        self.question = None;
        if self.cursor + 1 < self.working_set.len() {
            self.cursor += 1;
            self.stage = Stage::Preview;
            return Ok(Advance::Next);
        }
        Ok(self.end_of_pass(now))
    }

    /// Deletes the current word from the store and drops it from the session.
    pub fn delete_current(&mut self, now: DateTime<Utc>) -> Result<Advance, SessionError> {
        if self.stage == Stage::Complete {
            return Err(SessionError::Finished);
        }
        let word_id = self.working_set[self.cursor].word.id;
        self.store.delete_word(word_id)?;
        info!(word = %word_id, "word deleted during session");
        Ok(self.remove_current(now))
    }

    /// Flips the difficulty flag of the current word. In a difficult-word
    /// walk, clearing the flag also takes the word out of the walk.
    pub fn toggle_difficult(&mut self, now: DateTime<Utc>) -> Result<DifficultyToggle, SessionError> {
        if self.stage == Stage::Complete {
            return Err(SessionError::Finished);
        }
        let entry = &mut self.working_set[self.cursor];
        let word_id = entry.word.id;
        let value = !entry.state.is_difficult;
        let flipped = LearningState {
            is_difficult: value,
            ..entry.state.clone()
        };
        let persist_error = match self.store.put_state(word_id, &flipped) {
            Ok(()) => None,
            Err(err) => {
                warn!(word = %word_id, error = %err, "difficulty flag not persisted");
                Some(err.to_string())
            }
        };
        entry.state = flipped;

        let advance = if self.mode == SessionMode::Difficult && !value {
            Some(self.remove_current(now))
        } else {
            None
        };
        Ok(DifficultyToggle {
            word_id,
            is_difficult: value,
            advance,
            persist_error,
        })
    }

    fn remove_current(&mut self, now: DateTime<Utc>) -> Advance {
        let removed = self.working_set.remove(self.cursor);
        self.progress.remove(&removed.word.id);
        self.question = None;
        self.stage = Stage::Preview;
        if self.cursor < self.working_set.len() {
            return Advance::Next;
        }
        if self.working_set.is_empty() {
            self.finish(Vec::new(), None);
            return Advance::Complete(self.summary_or_default());
        }
        self.end_of_pass(now)
    }

    fn end_of_pass(&mut self, now: DateTime<Utc>) -> Advance {
        if self.mode != SessionMode::Learn {
            self.finish(Vec::new(), None);
            return Advance::Complete(self.summary_or_default());
        }

        let threshold = self.engine.mastery_threshold();
        let pending = self
            .working_set
            .iter()
            .filter(|entry| self.session_streak(entry.word.id) < threshold)
            .count();
        if pending > 0 {
            self.cursor = 0;
            self.stage = Stage::Preview;
            self.rounds += 1;
            debug!(pending, round = self.rounds, "learn gate not met; restarting set");
            return Advance::Restarted { pending };
        }

        let ids: Vec<WordId> = self.working_set.iter().map(|entry| entry.word.id).collect();
        let sync_error = match self.store.add_to_review(&self.working_set, now) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "could not confirm learned words");
                Some(err.to_string())
            }
        };
        for entry in &mut self.working_set {
            entry.state = self.engine.confirm_learned(&entry.state, now);
        }
        self.finish(ids, sync_error);
        Advance::Complete(self.summary_or_default())
    }

    fn finish(&mut self, promoted: Vec<WordId>, sync_error: Option<String>) {
        self.stage = Stage::Complete;
        self.question = None;
        let summary = SessionSummary {
            mode: self.mode,
            words: self.working_set.len(),
            rounds: self.rounds,
            tally: self.tally,
            promoted,
            sync_error,
        };
        info!(
            mode = ?self.mode,
            answered = summary.tally.answered,
            correct = summary.tally.correct,
            rounds = summary.rounds,
            "session complete"
        );
        self.summary = Some(summary);
    }

    fn summary_or_default(&self) -> SessionSummary {
        self.summary.clone().unwrap_or(SessionSummary {
            mode: self.mode,
            words: self.working_set.len(),
            rounds: self.rounds,
            tally: self.tally,
            promoted: Vec::new(),
            sync_error: None,
        })
    }
}

pub(crate) fn load<S: WordStore + ?Sized>(store: &S, course_id: Option<CourseId>) -> StoreResult<Vec<StudyWord>> {
    match course_id {
        Some(course_id) => store.list_words(course_id),
        None => store.list_all_words(),
    }
}
