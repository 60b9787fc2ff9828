use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;
use wl_core::{
    Course, CourseId, LearningState, MasteryEngine, NewWord, StoreError, StoreResult, StudyWord, Word, WordId,
    WordStore,
};

use crate::db::{
    log_sql, parse_optional_time, CourseRow, Db, DbError, DbResult, StateParams, WordRow, WORD_SELECT,
};

const UPSERT_STATE: &str = "INSERT INTO learning_states (word_id, is_learned, is_difficult, consecutive_correct,
        error_count, last_reviewed, next_due_at, review_interval_index)
 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
 ON CONFLICT(word_id) DO UPDATE SET
        is_learned = excluded.is_learned,
        is_difficult = excluded.is_difficult,
        consecutive_correct = excluded.consecutive_correct,
        error_count = excluded.error_count,
        last_reviewed = excluded.last_reviewed,
        next_due_at = excluded.next_due_at,
        review_interval_index = excluded.review_interval_index";

const INSERT_WORD: &str = "INSERT INTO words
 (id, course_id, word, pinyin, definition, example, audio_ref, created_at, position)
 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Local database. Used directly as the `sqlite` backend, and as the offline
/// cache that `sync` fills from the server.
pub struct SqliteDb {
    conn: Connection,
    engine: MasteryEngine,
}

fn course_row(row: &Row<'_>) -> rusqlite::Result<CourseRow> {
    Ok(CourseRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn word_row(row: &Row<'_>) -> rusqlite::Result<WordRow> {
    Ok(WordRow {
        id: row.get(0)?,
        course_id: row.get(1)?,
        word: row.get(2)?,
        pinyin: row.get(3)?,
        definition: row.get(4)?,
        example: row.get(5)?,
        audio_ref: row.get(6)?,
        is_learned: row.get(7)?,
        is_difficult: row.get(8)?,
        consecutive_correct: row.get(9)?,
        error_count: row.get(10)?,
        last_reviewed: row.get(11)?,
        next_due_at: row.get(12)?,
        review_interval_index: row.get(13)?,
    })
}

fn write_state(conn: &Connection, word_id: WordId, state: &LearningState) -> rusqlite::Result<usize> {
    let values = StateParams::from(state);
    log_sql(UPSERT_STATE, &[
        ("word_id", word_id.to_string()),
        ("is_learned", values.is_learned.to_string()),
        ("consecutive_correct", values.consecutive_correct.to_string()),
        ("error_count", values.error_count.to_string()),
        ("review_interval_index", values.review_interval_index.to_string()),
    ]);
    conn.execute(UPSERT_STATE, params![
        word_id.to_string(),
        values.is_learned,
        values.is_difficult,
        values.consecutive_correct,
        values.error_count,
        values.last_reviewed,
        values.next_due_at,
        values.review_interval_index
    ])
}

fn write_word(conn: &Connection, word: &Word, created_at: DateTime<Utc>, position: usize) -> rusqlite::Result<usize> {
    log_sql(INSERT_WORD, &[("id", word.id.to_string()), ("course_id", word.course_id.to_string())]);
    conn.execute(INSERT_WORD, params![
        word.id.to_string(),
        word.course_id.to_string(),
        word.word,
        word.pinyin,
        word.definition,
        word.example,
        word.audio_ref,
        created_at.to_rfc3339(),
        position as i64
    ])
}

impl SqliteDb {
    pub fn open(path: &Path, engine: MasteryEngine) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn, engine })
    }

    #[cfg(test)]
    pub fn open_in_memory(engine: MasteryEngine) -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, engine })
    }

    /// Caches written before the interval ladder lack its columns.
    fn ensure_state_columns(&self) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(learning_states)")?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut existing = HashSet::new();
        for column in columns {
            existing.insert(column?);
        }

        let mut missing = Vec::new();
        if !existing.contains("next_due_at") {
            missing.push("ALTER TABLE learning_states ADD COLUMN next_due_at TEXT");
        }
        if !existing.contains("review_interval_index") {
            missing.push("ALTER TABLE learning_states ADD COLUMN review_interval_index INTEGER NOT NULL DEFAULT 0");
        }
        for stmt in missing {
            log_sql(stmt, &[]);
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn fetch_courses(&self) -> DbResult<Vec<Course>> {
        let query = "SELECT id, title, description, created_at FROM courses ORDER BY created_at, title";
        log_sql(query, &[]);
        let mut stmt = self.conn.prepare(query)?;
        let rows = stmt.query_map([], course_row)?;
        let mut courses = Vec::new();
        for row in rows {
            courses.push(row?.decode()?);
        }
        Ok(courses)
    }

    fn fetch_course(&self, course_id: CourseId) -> DbResult<Option<Course>> {
        let query = "SELECT id, title, description, created_at FROM courses WHERE id = ?1";
        log_sql(query, &[("id", course_id.to_string())]);
        let row = self
            .conn
            .query_row(query, params![course_id.to_string()], course_row)
            .optional()?;
        row.map(CourseRow::decode).transpose()
    }

    fn fetch_words(&self, course_id: Option<CourseId>) -> DbResult<Vec<StudyWord>> {
        let mut words = Vec::new();
        let rows = match course_id {
            Some(course_id) => {
                let query = format!("{WORD_SELECT} WHERE w.course_id = ?1 ORDER BY w.created_at, w.position");
                log_sql(&query, &[("course_id", course_id.to_string())]);
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map(params![course_id.to_string()], word_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let query = format!("{WORD_SELECT} ORDER BY w.course_id, w.created_at, w.position");
                log_sql(&query, &[]);
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map([], word_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        for row in rows {
            words.push(row.decode()?);
        }
        Ok(words)
    }

    fn fetch_word(&self, word_id: WordId) -> DbResult<Option<StudyWord>> {
        let query = format!("{WORD_SELECT} WHERE w.id = ?1");
        log_sql(&query, &[("id", word_id.to_string())]);
        let row = self
            .conn
            .query_row(&query, params![word_id.to_string()], word_row)
            .optional()?;
        row.map(WordRow::decode).transpose()
    }

    fn store_course(&self, course: &Course) -> DbResult<()> {
        let query = "INSERT INTO courses (id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)";
        log_sql(query, &[("id", course.id.to_string()), ("title", course.title.clone())]);
        self.conn.execute(query, params![
            course.id.to_string(),
            course.title,
            course.description,
            course.created_at.to_rfc3339()
        ])?;
        Ok(())
    }

    fn remove_course(&self, course_id: CourseId) -> DbResult<usize> {
        let id = course_id.to_string();
        let tx = self.conn.unchecked_transaction()?;
        for query in [
            "DELETE FROM learning_states WHERE word_id IN (SELECT id FROM words WHERE course_id = ?1)",
            "DELETE FROM words WHERE course_id = ?1",
            "DELETE FROM course_sync WHERE course_id = ?1",
        ] {
            log_sql(query, &[("course_id", id.clone())]);
            tx.execute(query, params![id])?;
        }
        let query = "DELETE FROM courses WHERE id = ?1";
        log_sql(query, &[("id", id.clone())]);
        let removed = tx.execute(query, params![id])?;
        tx.commit()?;
        Ok(removed)
    }

    fn store_words(&self, course_id: CourseId, words: Vec<NewWord>) -> DbResult<Vec<Word>> {
        let now = Utc::now();
        let tx = self.conn.unchecked_transaction()?;
        let mut stored = Vec::with_capacity(words.len());
        for (position, new_word) in words.into_iter().enumerate() {
            let word = new_word.into_word(course_id);
            write_word(&tx, &word, now, position)?;
            write_state(&tx, word.id, &LearningState::default())?;
            stored.push(word);
        }
        tx.commit()?;
        Ok(stored)
    }

    fn remove_word(&self, word_id: WordId) -> DbResult<usize> {
        let id = word_id.to_string();
        let tx = self.conn.unchecked_transaction()?;
        let query = "DELETE FROM learning_states WHERE word_id = ?1";
        log_sql(query, &[("word_id", id.clone())]);
        tx.execute(query, params![id])?;
        let query = "DELETE FROM words WHERE id = ?1";
        log_sql(query, &[("id", id.clone())]);
        let removed = tx.execute(query, params![id])?;
        tx.commit()?;
        Ok(removed)
    }

    fn word_exists(&self, word_id: WordId) -> DbResult<bool> {
        let query = "SELECT 1 FROM words WHERE id = ?1 LIMIT 1";
        log_sql(query, &[("id", word_id.to_string())]);
        let mut stmt = self.conn.prepare(query)?;
        let mut rows = stmt.query(params![word_id.to_string()])?;
        Ok(rows.next()?.is_some())
    }

    /// When the course was last pulled from the server, if ever.
    pub fn synced_at(&self, course_id: CourseId) -> DbResult<Option<DateTime<Utc>>> {
        let query = "SELECT synced_at FROM course_sync WHERE course_id = ?1";
        log_sql(query, &[("course_id", course_id.to_string())]);
        let value: Option<String> = self
            .conn
            .query_row(query, params![course_id.to_string()], |row| row.get(0))
            .optional()?;
        parse_optional_time(value)
    }

    /// Replaces the cached copy of a course with `words` in one transaction
    /// and stamps it with `now`.
    pub fn replace_snapshot(&self, course: &Course, words: &[StudyWord], now: DateTime<Utc>) -> DbResult<()> {
        let id = course.id.to_string();
        let tx = self.conn.unchecked_transaction()?;
        for query in [
            "DELETE FROM learning_states WHERE word_id IN (SELECT id FROM words WHERE course_id = ?1)",
            "DELETE FROM words WHERE course_id = ?1",
        ] {
            log_sql(query, &[("course_id", id.clone())]);
            tx.execute(query, params![id])?;
        }

        let query = "INSERT INTO courses (id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, description = excluded.description";
        log_sql(query, &[("id", id.clone()), ("title", course.title.clone())]);
        tx.execute(query, params![id, course.title, course.description, course.created_at.to_rfc3339()])?;

        for (position, entry) in words.iter().enumerate() {
            write_word(&tx, &entry.word, course.created_at, position)?;
            write_state(&tx, entry.word.id, &entry.state)?;
        }

        let query = "INSERT INTO course_sync (course_id, synced_at) VALUES (?1, ?2)
             ON CONFLICT(course_id) DO UPDATE SET synced_at = excluded.synced_at";
        log_sql(query, &[("course_id", id.clone()), ("synced_at", now.to_rfc3339())]);
        tx.execute(query, params![id, now.to_rfc3339()])?;
        tx.commit()?;
        Ok(())
    }
}

impl Db for SqliteDb {
    fn init(&self) -> DbResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS words (
                id TEXT PRIMARY KEY,
                course_id TEXT NOT NULL,
                word TEXT NOT NULL,
                pinyin TEXT NOT NULL,
                definition TEXT NOT NULL,
                example TEXT,
                audio_ref TEXT,
                created_at TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(course_id) REFERENCES courses(id)
            );
            CREATE TABLE IF NOT EXISTS learning_states (
                word_id TEXT PRIMARY KEY,
                is_learned INTEGER NOT NULL DEFAULT 0,
                is_difficult INTEGER NOT NULL DEFAULT 0,
                consecutive_correct INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_reviewed TEXT,
                next_due_at TEXT,
                review_interval_index INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(word_id) REFERENCES words(id)
            );
            CREATE TABLE IF NOT EXISTS course_sync (
                course_id TEXT PRIMARY KEY,
                synced_at TEXT NOT NULL
            );",
        )?;
        self.ensure_state_columns()?;
        Ok(())
    }
}

impl WordStore for SqliteDb {
    fn engine(&self) -> &MasteryEngine {
        &self.engine
    }

    fn list_courses(&self) -> StoreResult<Vec<Course>> {
        Ok(self.fetch_courses()?)
    }

    fn get_course(&self, course_id: CourseId) -> StoreResult<Course> {
        self.fetch_course(course_id)?
            .ok_or_else(|| StoreError::course_not_found(course_id))
    }

    fn create_course(&self, title: &str, description: Option<&str>) -> StoreResult<Course> {
        let course = Course {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.map(|value| value.to_string()),
            created_at: Utc::now(),
        };
        self.store_course(&course)?;
        Ok(course)
    }

    fn delete_course(&self, course_id: CourseId) -> StoreResult<()> {
        match self.remove_course(course_id)? {
            0 => Err(StoreError::course_not_found(course_id)),
            _ => Ok(()),
        }
    }

    fn list_words(&self, course_id: CourseId) -> StoreResult<Vec<StudyWord>> {
        self.get_course(course_id)?;
        Ok(self.fetch_words(Some(course_id))?)
    }

    fn list_all_words(&self) -> StoreResult<Vec<StudyWord>> {
        Ok(self.fetch_words(None)?)
    }

    fn get_word(&self, word_id: WordId) -> StoreResult<StudyWord> {
        self.fetch_word(word_id)?
            .ok_or_else(|| StoreError::word_not_found(word_id))
    }

    fn insert_words(&self, course_id: CourseId, words: Vec<NewWord>) -> StoreResult<Vec<Word>> {
        self.get_course(course_id)?;
        Ok(self.store_words(course_id, words)?)
    }

    fn delete_word(&self, word_id: WordId) -> StoreResult<()> {
        match self.remove_word(word_id)? {
            0 => Err(StoreError::word_not_found(word_id)),
            _ => Ok(()),
        }
    }

    fn put_state(&self, word_id: WordId, state: &LearningState) -> StoreResult<()> {
        if !self.word_exists(word_id)? {
            return Err(StoreError::word_not_found(word_id));
        }
        write_state(&self.conn, word_id, state).map_err(DbError::from)?;
        Ok(())
    }
}
