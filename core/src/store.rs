//! The persistence collaborator every session talks to, and a process-local
//! implementation of it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::import::{self, ImportError, ImportReport};
use crate::{Course, CourseId, LearningState, MasteryEngine, NewWord, StudyWord, Word, WordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Course,
    Word,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Course => write!(f, "course"),
            EntityKind::Word => write!(f, "word"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("storage backend failed: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn word_not_found(id: WordId) -> Self {
        StoreError::NotFound { kind: EntityKind::Word, id }
    }

    pub fn course_not_found(id: CourseId) -> Self {
        StoreError::NotFound { kind: EntityKind::Course, id }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Source of courses, words and learning state. The network backend and the
/// offline cache both implement this, and sessions cannot tell them apart.
pub trait WordStore {
    fn engine(&self) -> &MasteryEngine;

    fn list_courses(&self) -> StoreResult<Vec<Course>>;
    fn get_course(&self, course_id: CourseId) -> StoreResult<Course>;
    fn create_course(&self, title: &str, description: Option<&str>) -> StoreResult<Course>;
    /// Removes the course together with its words and their states.
    fn delete_course(&self, course_id: CourseId) -> StoreResult<()>;

    fn list_words(&self, course_id: CourseId) -> StoreResult<Vec<StudyWord>>;
    fn list_all_words(&self) -> StoreResult<Vec<StudyWord>>;
    fn get_word(&self, word_id: WordId) -> StoreResult<StudyWord>;
    /// Stores new words with default learning state.
    fn insert_words(&self, course_id: CourseId, words: Vec<NewWord>) -> StoreResult<Vec<Word>>;
    fn delete_word(&self, word_id: WordId) -> StoreResult<()>;

    /// Overwrites the stored state of a word as a single write.
    fn put_state(&self, word_id: WordId, state: &LearningState) -> StoreResult<()>;

    fn set_difficult(&self, word_id: WordId, value: bool) -> StoreResult<()> {
        let mut state = self.get_word(word_id)?.state;
        state.is_difficult = value;
        self.put_state(word_id, &state)
    }

    fn record_answer(&self, word_id: WordId, correct: bool, now: DateTime<Utc>) -> StoreResult<LearningState> {
        let current = self.get_word(word_id)?;
        let next = self.engine().update(&current.state, correct, now);
        self.put_state(word_id, &next)?;
        Ok(next)
    }

    /// Confirms a finished learn session: every entry ends up in the review
    /// rotation. The caller's states are written as given, so answers whose
    /// own writes failed earlier are not lost.
    fn add_to_review(&self, entries: &[StudyWord], now: DateTime<Utc>) -> StoreResult<()> {
        for entry in entries {
            let confirmed = self.engine().confirm_learned(&entry.state, now);
            self.put_state(entry.word.id, &confirmed)?;
        }
        Ok(())
    }

    /// Maps raw rows (header first) to words and stores them. Malformed rows
    /// are skipped and counted; the import only fails when nothing is valid.
    fn bulk_import_words(&self, course_id: CourseId, rows: &[Vec<String>]) -> StoreResult<ImportReport> {
        self.get_course(course_id)?;
        let batch = import::map_rows(rows)?;
        let skipped = batch.skipped;
        let words = self.insert_words(course_id, batch.words)?;
        info!(course = %course_id, imported = words.len(), skipped, "bulk import finished");
        Ok(ImportReport { words, skipped })
    }
}

#[derive(Default)]
struct Tables {
    courses: Vec<Course>,
    words: Vec<Word>,
    states: HashMap<WordId, LearningState>,
}

/// Keeps everything in memory; useful as a scratch store and in tests.
#[derive(Default)]
pub struct InMemoryStore {
    engine: MasteryEngine,
    tables: Mutex<Tables>,
    fail_writes: Mutex<bool>,
}

impl InMemoryStore {
    pub fn new(engine: MasteryEngine) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    /// Makes every subsequent state write fail, to exercise callers' handling
    /// of an unreachable backend.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut guard) = self.fail_writes.lock() {
            *guard = fail;
        }
    }

    fn tables(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> StoreResult<()> {
        let failing = self.fail_writes.lock().map(|guard| *guard).unwrap_or(false);
        if failing {
            return Err(StoreError::Backend("writes are disabled".to_string()));
        }
        Ok(())
    }
}

fn pair(tables: &Tables, word: &Word) -> StudyWord {
    StudyWord {
        word: word.clone(),
        state: tables.states.get(&word.id).cloned().unwrap_or_default(),
    }
}

impl WordStore for InMemoryStore {
    fn engine(&self) -> &MasteryEngine {
        &self.engine
    }

    fn list_courses(&self) -> StoreResult<Vec<Course>> {
        Ok(self.tables()?.courses.clone())
    }

    fn get_course(&self, course_id: CourseId) -> StoreResult<Course> {
        self.tables()?
            .courses
            .iter()
            .find(|course| course.id == course_id)
            .cloned()
            .ok_or_else(|| StoreError::course_not_found(course_id))
    }

    fn create_course(&self, title: &str, description: Option<&str>) -> StoreResult<Course> {
        let course = Course {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.map(|value| value.to_string()),
            created_at: Utc::now(),
        };
        self.tables()?.courses.push(course.clone());
        Ok(course)
    }

    fn delete_course(&self, course_id: CourseId) -> StoreResult<()> {
        let mut tables = self.tables()?;
        let before = tables.courses.len();
        tables.courses.retain(|course| course.id != course_id);
        if tables.courses.len() == before {
            return Err(StoreError::course_not_found(course_id));
        }
        let removed: Vec<WordId> = tables
            .words
            .iter()
            .filter(|word| word.course_id == course_id)
            .map(|word| word.id)
            .collect();
        tables.words.retain(|word| word.course_id != course_id);
        for id in removed {
            tables.states.remove(&id);
        }
        Ok(())
    }

    fn list_words(&self, course_id: CourseId) -> StoreResult<Vec<StudyWord>> {
        let tables = self.tables()?;
        if !tables.courses.iter().any(|course| course.id == course_id) {
            return Err(StoreError::course_not_found(course_id));
        }
        Ok(tables
            .words
            .iter()
            .filter(|word| word.course_id == course_id)
            .map(|word| pair(&tables, word))
            .collect())
    }

    fn list_all_words(&self) -> StoreResult<Vec<StudyWord>> {
        let tables = self.tables()?;
        Ok(tables.words.iter().map(|word| pair(&tables, word)).collect())
    }

    fn get_word(&self, word_id: WordId) -> StoreResult<StudyWord> {
        let tables = self.tables()?;
        tables
            .words
            .iter()
            .find(|word| word.id == word_id)
            .map(|word| pair(&tables, word))
            .ok_or_else(|| StoreError::word_not_found(word_id))
    }

    fn insert_words(&self, course_id: CourseId, words: Vec<NewWord>) -> StoreResult<Vec<Word>> {
        let mut tables = self.tables()?;
        if !tables.courses.iter().any(|course| course.id == course_id) {
            return Err(StoreError::course_not_found(course_id));
        }
        let mut stored = Vec::with_capacity(words.len());
        for new_word in words {
            let word = new_word.into_word(course_id);
            tables.states.insert(word.id, LearningState::default());
            tables.words.push(word.clone());
            stored.push(word);
        }
        Ok(stored)
    }

    fn delete_word(&self, word_id: WordId) -> StoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        let before = tables.words.len();
        tables.words.retain(|word| word.id != word_id);
        if tables.words.len() == before {
            return Err(StoreError::word_not_found(word_id));
        }
        tables.states.remove(&word_id);
        Ok(())
    }

    fn put_state(&self, word_id: WordId, state: &LearningState) -> StoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        if !tables.words.iter().any(|word| word.id == word_id) {
            return Err(StoreError::word_not_found(word_id));
        }
        tables.states.insert(word_id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|line| line.iter().map(|field| field.to_string()).collect())
            .collect()
    }

    #[test]
    fn deleting_a_course_cascades_to_words() {
        let store = InMemoryStore::default();
        let course = store.create_course("HSK 1", None).unwrap();
        let other = store.create_course("HSK 2", Some("next level")).unwrap();
        store
            .bulk_import_words(course.id, &rows(&[&["word", "pinyin", "definition"], &["你好", "nǐ hǎo", "hello"]]))
            .unwrap();
        store
            .bulk_import_words(other.id, &rows(&[&["word", "pinyin", "definition"], &["谢谢", "xiè xie", "thanks"]]))
            .unwrap();

        store.delete_course(course.id).unwrap();
        assert_eq!(store.list_all_words().unwrap().len(), 1);
        assert!(matches!(
            store.list_words(course.id),
            Err(StoreError::NotFound { kind: EntityKind::Course, .. })
        ));
    }

    #[test]
    fn record_answer_persists_engine_result() {
        let store = InMemoryStore::default();
        let course = store.create_course("HSK 1", None).unwrap();
        let report = store
            .bulk_import_words(course.id, &rows(&[&["word", "pinyin", "definition"], &["水", "shuǐ", "water"]]))
            .unwrap();
        let id = report.words[0].id;

        let state = store.record_answer(id, false, Utc::now()).unwrap();
        assert_eq!(state.error_count, 1);
        assert_eq!(store.get_word(id).unwrap().state, state);
    }

    #[test]
    fn unknown_word_is_not_found() {
        let store = InMemoryStore::default();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.record_answer(missing, true, Utc::now()),
            Err(StoreError::NotFound { kind: EntityKind::Word, id }) if id == missing
        ));
    }

    #[test]
    fn set_difficult_toggles_flag() {
        let store = InMemoryStore::default();
        let course = store.create_course("HSK 1", None).unwrap();
        let word = store
            .insert_words(course.id, vec![NewWord {
                word: "难".to_string(),
                pinyin: "nán".to_string(),
                definition: "difficult".to_string(),
                example: None,
                audio_ref: None,
            }])
            .unwrap()
            .remove(0);
        store.set_difficult(word.id, true).unwrap();
        assert!(store.get_word(word.id).unwrap().state.is_difficult);
        store.set_difficult(word.id, false).unwrap();
        assert!(!store.get_word(word.id).unwrap().state.is_difficult);
    }

    #[test]
    fn failing_writes_surface_backend_error() {
        let store = InMemoryStore::default();
        let course = store.create_course("HSK 1", None).unwrap();
        let report = store
            .bulk_import_words(course.id, &rows(&[&["word", "pinyin", "definition"], &["火", "huǒ", "fire"]]))
            .unwrap();
        store.set_fail_writes(true);
        assert!(matches!(
            store.record_answer(report.words[0].id, true, Utc::now()),
            Err(StoreError::Backend(_))
        ));
        assert_eq!(store.get_word(report.words[0].id).unwrap().state, LearningState::default());
    }
}
