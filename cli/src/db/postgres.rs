use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use postgres::{Client, GenericClient, Row};
use postgres_native_tls::MakeTlsConnector;
use tracing::error;
use uuid::Uuid;
use wl_core::{
    Course, CourseId, LearningState, MasteryEngine, NewWord, StoreError, StoreResult, StudyWord, Word, WordId,
    WordStore,
};

use crate::db::{log_sql, CourseRow, Db, DbError, DbResult, StateParams, WordRow, WORD_SELECT};

const UPSERT_STATE: &str = "INSERT INTO learning_states (word_id, is_learned, is_difficult, consecutive_correct,
        error_count, last_reviewed, next_due_at, review_interval_index)
 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
 ON CONFLICT (word_id) DO UPDATE SET
        is_learned = EXCLUDED.is_learned,
        is_difficult = EXCLUDED.is_difficult,
        consecutive_correct = EXCLUDED.consecutive_correct,
        error_count = EXCLUDED.error_count,
        last_reviewed = EXCLUDED.last_reviewed,
        next_due_at = EXCLUDED.next_due_at,
        review_interval_index = EXCLUDED.review_interval_index";

/// Server-held state, shared by every device that syncs against it.
pub struct PostgresDb {
    client: Mutex<Client>,
    engine: MasteryEngine,
}

fn failed(context: &'static str) -> impl FnOnce(postgres::Error) -> DbError {
    move |err| {
        error!(target: "sql", %err, "Postgres {context} failed");
        DbError::Postgres(err)
    }
}

fn course_row(row: &Row) -> DbResult<CourseRow> {
    Ok(CourseRow {
        id: row.try_get(0)?,
        title: row.try_get(1)?,
        description: row.try_get(2)?,
        created_at: row.try_get(3)?,
    })
}

fn word_row(row: &Row) -> DbResult<WordRow> {
    Ok(WordRow {
        id: row.try_get(0)?,
        course_id: row.try_get(1)?,
        word: row.try_get(2)?,
        pinyin: row.try_get(3)?,
        definition: row.try_get(4)?,
        example: row.try_get(5)?,
        audio_ref: row.try_get(6)?,
        is_learned: row.try_get(7)?,
        is_difficult: row.try_get(8)?,
        consecutive_correct: row.try_get(9)?,
        error_count: row.try_get(10)?,
        last_reviewed: row.try_get(11)?,
        next_due_at: row.try_get(12)?,
        review_interval_index: row.try_get(13)?,
    })
}

fn write_state(client: &mut impl GenericClient, word_id: WordId, state: &LearningState) -> DbResult<u64> {
    let values = StateParams::from(state);
    let id = word_id.to_string();
    log_sql(UPSERT_STATE, &[
        ("word_id", id.clone()),
        ("is_learned", values.is_learned.to_string()),
        ("consecutive_correct", values.consecutive_correct.to_string()),
        ("error_count", values.error_count.to_string()),
        ("review_interval_index", values.review_interval_index.to_string()),
    ]);
    client
        .execute(UPSERT_STATE, &[
            &id,
            &values.is_learned,
            &values.is_difficult,
            &values.consecutive_correct,
            &values.error_count,
            &values.last_reviewed,
            &values.next_due_at,
            &values.review_interval_index,
        ])
        .map_err(failed("learning_states upsert"))
}

impl PostgresDb {
    pub fn connect(url: &str, tls: MakeTlsConnector, engine: MasteryEngine) -> DbResult<Self> {
        let client = Client::connect(url, tls)?;
        Ok(Self {
            client: Mutex::new(client),
            engine,
        })
    }

    fn client(&self) -> DbResult<MutexGuard<'_, Client>> {
        self.client
            .lock()
            .map_err(|_| DbError::Config("Postgres client lock poisoned".to_string()))
    }

    fn fetch_courses(&self) -> DbResult<Vec<Course>> {
        let query = "SELECT id, title, description, created_at FROM courses ORDER BY created_at, title";
        log_sql(query, &[]);
        let rows = self.client()?.query(query, &[]).map_err(failed("courses select"))?;
        rows.iter().map(|row| course_row(row)?.decode()).collect()
    }

    fn fetch_course(&self, course_id: CourseId) -> DbResult<Option<Course>> {
        let query = "SELECT id, title, description, created_at FROM courses WHERE id = $1";
        let id = course_id.to_string();
        log_sql(query, &[("id", id.clone())]);
        let row = self
            .client()?
            .query_opt(query, &[&id])
            .map_err(failed("course select"))?;
        row.map(|row| course_row(&row)?.decode()).transpose()
    }

    fn fetch_words(&self, course_id: Option<CourseId>) -> DbResult<Vec<StudyWord>> {
        let rows = match course_id {
            Some(course_id) => {
                let query = format!("{WORD_SELECT} WHERE w.course_id = $1 ORDER BY w.created_at, w.position");
                let id = course_id.to_string();
                log_sql(&query, &[("course_id", id.clone())]);
                self.client()?.query(&query, &[&id]).map_err(failed("words select"))?
            }
            None => {
                let query = format!("{WORD_SELECT} ORDER BY w.course_id, w.created_at, w.position");
                log_sql(&query, &[]);
                self.client()?.query(&query, &[]).map_err(failed("words select"))?
            }
        };
        rows.iter().map(|row| word_row(row)?.decode()).collect()
    }

    fn fetch_word(&self, word_id: WordId) -> DbResult<Option<StudyWord>> {
        let query = format!("{WORD_SELECT} WHERE w.id = $1");
        let id = word_id.to_string();
        log_sql(&query, &[("id", id.clone())]);
        let row = self
            .client()?
            .query_opt(&query, &[&id])
            .map_err(failed("word select"))?;
        row.map(|row| word_row(&row)?.decode()).transpose()
    }

    fn store_course(&self, course: &Course) -> DbResult<()> {
        let query = "INSERT INTO courses (id, title, description, created_at) VALUES ($1, $2, $3, $4)";
        let id = course.id.to_string();
        let created_at = course.created_at.to_rfc3339();
        log_sql(query, &[("id", id.clone()), ("title", course.title.clone())]);
        self.client()?
            .execute(query, &[&id, &course.title, &course.description, &created_at])
            .map_err(failed("courses insert"))?;
        Ok(())
    }

    fn remove_course(&self, course_id: CourseId) -> DbResult<u64> {
        let id = course_id.to_string();
        let mut client = self.client()?;
        let mut tx = client.transaction()?;
        for query in [
            "DELETE FROM learning_states WHERE word_id IN (SELECT id FROM words WHERE course_id = $1)",
            "DELETE FROM words WHERE course_id = $1",
        ] {
            log_sql(query, &[("course_id", id.clone())]);
            tx.execute(query, &[&id]).map_err(failed("course cascade delete"))?;
        }
        let query = "DELETE FROM courses WHERE id = $1";
        log_sql(query, &[("id", id.clone())]);
        let removed = tx.execute(query, &[&id]).map_err(failed("courses delete"))?;
        tx.commit()?;
        Ok(removed)
    }

    fn store_words(&self, course_id: CourseId, words: Vec<NewWord>) -> DbResult<Vec<Word>> {
        let query = "INSERT INTO words
             (id, course_id, word, pinyin, definition, example, audio_ref, created_at, position)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";
        let created_at = Utc::now().to_rfc3339();
        let course = course_id.to_string();
        let mut client = self.client()?;
        let mut tx = client.transaction()?;
        let mut stored = Vec::with_capacity(words.len());
        for (position, new_word) in words.into_iter().enumerate() {
            let word = new_word.into_word(course_id);
            let id = word.id.to_string();
            let position = position as i64;
            log_sql(query, &[("id", id.clone()), ("course_id", course.clone()), ("word", word.word.clone())]);
            tx.execute(query, &[
                &id,
                &course,
                &word.word,
                &word.pinyin,
                &word.definition,
                &word.example,
                &word.audio_ref,
                &created_at,
                &position,
            ])
            .map_err(failed("words insert"))?;
            write_state(&mut tx, word.id, &LearningState::default())?;
            stored.push(word);
        }
        tx.commit()?;
        Ok(stored)
    }

    fn remove_word(&self, word_id: WordId) -> DbResult<u64> {
        let id = word_id.to_string();
        let mut client = self.client()?;
        let mut tx = client.transaction()?;
        let query = "DELETE FROM learning_states WHERE word_id = $1";
        log_sql(query, &[("word_id", id.clone())]);
        tx.execute(query, &[&id]).map_err(failed("learning_states delete"))?;
        let query = "DELETE FROM words WHERE id = $1";
        log_sql(query, &[("id", id.clone())]);
        let removed = tx.execute(query, &[&id]).map_err(failed("words delete"))?;
        tx.commit()?;
        Ok(removed)
    }

    fn word_exists(&self, word_id: WordId) -> DbResult<bool> {
        let query = "SELECT 1 FROM words WHERE id = $1 LIMIT 1";
        let id = word_id.to_string();
        log_sql(query, &[("id", id.clone())]);
        let row = self.client()?.query_opt(query, &[&id]).map_err(failed("word lookup"))?;
        Ok(row.is_some())
    }
}

impl Db for PostgresDb {
    fn init(&self) -> DbResult<()> {
        let mut client = self.client()?;
        client.batch_execute(
            "CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS words (
                id TEXT PRIMARY KEY,
                course_id TEXT NOT NULL REFERENCES courses(id),
                word TEXT NOT NULL,
                pinyin TEXT NOT NULL,
                definition TEXT NOT NULL,
                example TEXT,
                audio_ref TEXT,
                created_at TEXT NOT NULL,
                position BIGINT NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS learning_states (
                word_id TEXT PRIMARY KEY REFERENCES words(id),
                is_learned BOOLEAN NOT NULL DEFAULT FALSE,
                is_difficult BOOLEAN NOT NULL DEFAULT FALSE,
                consecutive_correct BIGINT NOT NULL DEFAULT 0,
                error_count BIGINT NOT NULL DEFAULT 0,
                last_reviewed TEXT,
                next_due_at TEXT,
                review_interval_index BIGINT NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS words_course_idx ON words (course_id);",
        )?;
        Ok(())
    }
}

impl WordStore for PostgresDb {
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
        let mut client = self.client()?;
        write_state(&mut *client, word_id, state)?;
        Ok(())
    }
}
