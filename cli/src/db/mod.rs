mod postgres;
mod sqlite;

use std::path::Path;

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use wl_core::{Course, LearningState, MasteryEngine, StoreError, StudyWord, Word, WordStore};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Postgres(#[from] ::postgres::Error),
    #[error("{0}")]
    Config(String),
    #[error("stored value could not be read: {0}")]
    Decode(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub(crate) fn log_sql(query: &str, params: &[(&str, String)]) {
    debug!(target: "sql", query, params = ?params);
}

pub(crate) fn parse_id(value: &str) -> DbResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| DbError::Decode(format!("id '{value}': {err}")))
}

pub(crate) fn parse_time(value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| DbError::Decode(format!("timestamp '{value}': {err}")))
}

pub(crate) fn parse_optional_time(value: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

pub(crate) const WORD_SELECT: &str = "SELECT w.id, w.course_id, w.word, w.pinyin, w.definition, w.example, w.audio_ref,
        s.is_learned, s.is_difficult, s.consecutive_correct, s.error_count,
        s.last_reviewed, s.next_due_at, s.review_interval_index
 FROM words w
 LEFT JOIN learning_states s ON s.word_id = w.id";

pub(crate) struct CourseRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl CourseRow {
    pub fn decode(self) -> DbResult<Course> {
        Ok(Course {
            id: parse_id(&self.id)?,
            title: self.title,
            description: self.description,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

/// A word joined with its state row. The state columns are null when a word
/// was stored without one, which reads back as a fresh state.
pub(crate) struct WordRow {
    pub id: String,
    pub course_id: String,
    pub word: String,
    pub pinyin: String,
    pub definition: String,
    pub example: Option<String>,
    pub audio_ref: Option<String>,
    pub is_learned: Option<bool>,
    pub is_difficult: Option<bool>,
    pub consecutive_correct: Option<i64>,
    pub error_count: Option<i64>,
    pub last_reviewed: Option<String>,
    pub next_due_at: Option<String>,
    pub review_interval_index: Option<i64>,
}

impl WordRow {
    pub fn decode(self) -> DbResult<StudyWord> {
        let state = LearningState::from_raw(
            self.is_learned.unwrap_or(false),
            self.is_difficult.unwrap_or(false),
            self.consecutive_correct.unwrap_or(0),
            self.error_count.unwrap_or(0),
            parse_optional_time(self.last_reviewed)?,
            parse_optional_time(self.next_due_at)?,
            self.review_interval_index.unwrap_or(0),
        );
        Ok(StudyWord {
            word: Word {
                id: parse_id(&self.id)?,
                course_id: parse_id(&self.course_id)?,
                word: self.word,
                pinyin: self.pinyin,
                definition: self.definition,
                example: self.example,
                audio_ref: self.audio_ref,
            },
            state,
        })
    }
}

/// Column values for a `learning_states` upsert, in statement order after
/// the word id.
pub(crate) struct StateParams {
    pub is_learned: bool,
    pub is_difficult: bool,
    pub consecutive_correct: i64,
    pub error_count: i64,
    pub last_reviewed: Option<String>,
    pub next_due_at: Option<String>,
    pub review_interval_index: i64,
}

impl From<&LearningState> for StateParams {
    fn from(state: &LearningState) -> Self {
        Self {
            is_learned: state.is_learned,
            is_difficult: state.is_difficult,
            consecutive_correct: state.consecutive_correct.into(),
            error_count: state.error_count.into(),
            last_reviewed: state.last_reviewed.map(|at| at.to_rfc3339()),
            next_due_at: state.next_due_at.map(|at| at.to_rfc3339()),
            review_interval_index: i64::try_from(state.review_interval_index).unwrap_or(i64::MAX),
        }
    }
}

/// A persistent word store the binary can open and migrate.
pub trait Db: WordStore {
    fn init(&self) -> DbResult<()>;
}

/// Picks the backend named by `BACKEND` (`sqlite` unless set). The SQLite
/// file lives at `path`; Postgres reads `DATABASE_URL`.
pub fn get_db_backend(path: &Path, engine: MasteryEngine) -> DbResult<Box<dyn Db>> {
    let backend = std::env::var("BACKEND").unwrap_or_else(|_| "sqlite".to_string());
    match backend.as_str() {
        "sqlite" => Ok(Box::new(SqliteDb::open(path, engine)?)),
        "postgres" => Ok(Box::new(connect_postgres(engine)?)),
        other => Err(DbError::Config(format!("Unknown BACKEND '{other}', expected sqlite or postgres"))),
    }
}

pub fn connect_postgres(engine: MasteryEngine) -> DbResult<PostgresDb> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| DbError::Config("DATABASE_URL is required for postgres".to_string()))?;
    let connector =
        TlsConnector::new().map_err(|err| DbError::Config(format!("Failed to create TLS connector: {err}")))?;
    PostgresDb::connect(&url, MakeTlsConnector::new(connector), engine)
}

pub use postgres::PostgresDb;
pub use sqlite::SqliteDb;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_ids_and_timestamps_are_decode_errors() {
        assert!(matches!(parse_id("not-a-uuid"), Err(DbError::Decode(_))));
        assert!(matches!(parse_time("yesterday"), Err(DbError::Decode(_))));
        assert_eq!(parse_optional_time(None).unwrap(), None);
    }

    #[test]
    fn db_errors_become_backend_store_errors() {
        let err: StoreError = DbError::Config("no url".to_string()).into();
        assert!(matches!(err, StoreError::Backend(message) if message == "no url"));
    }
}
