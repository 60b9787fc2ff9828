use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::info;
use wl_core::sync::{reconcile, Reconciliation};
use wl_core::{CourseId, StoreError, StoreResult, WordId, WordStore};

use crate::db::SqliteDb;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub words: usize,
    pub pushed: usize,
    pub dropped: usize,
    pub previous_sync: Option<DateTime<Utc>>,
}

/// Pulls a course from `remote` into the local cache. Cached answers newer
/// than the server's are pushed back before the snapshot is replaced.
pub fn sync_course<R: WordStore + ?Sized>(
    remote: &R,
    cache: &SqliteDb,
    course_id: CourseId,
    now: DateTime<Utc>,
) -> StoreResult<SyncReport> {
    let course = remote.get_course(course_id)?;
    let remote_words = remote.list_words(course_id)?;
    let cached = match cache.list_words(course_id) {
        Ok(words) => words,
        Err(StoreError::NotFound { .. }) => Vec::new(),
        Err(err) => return Err(err),
    };
    let previous_sync = cache.synced_at(course_id)?;

    let remote_ids: HashSet<WordId> = remote_words.iter().map(|entry| entry.id()).collect();
    let dropped = cached.iter().filter(|entry| !remote_ids.contains(&entry.id())).count();

    let Reconciliation { merged, push } = reconcile(remote_words, cached);
    for (word_id, state) in &push {
        remote.put_state(*word_id, state)?;
    }
    cache.replace_snapshot(&course, &merged, now)?;

    info!(course = %course_id, words = merged.len(), pushed = push.len(), dropped, "course synced");
    Ok(SyncReport {
        words: merged.len(),
        pushed: push.len(),
        dropped,
        previous_sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use wl_core::{MasteryEngine, NewWord};

    fn open() -> SqliteDb {
        let db = SqliteDb::open_in_memory(MasteryEngine::default()).unwrap();
        db.init().unwrap();
        db
    }

    fn words(texts: &[&str]) -> Vec<NewWord> {
        texts
            .iter()
            .map(|text| NewWord {
                word: text.to_string(),
                pinyin: "p".to_string(),
                definition: "d".to_string(),
                example: None,
                audio_ref: None,
            })
            .collect()
    }

    #[test]
    fn first_sync_copies_the_course() {
        let remote = open();
        let cache = open();
        let course = remote.create_course("HSK 1", Some("basics")).unwrap();
        remote.insert_words(course.id, words(&["一", "二"])).unwrap();

        let report = sync_course(&remote, &cache, course.id, Utc::now()).unwrap();
        assert_eq!(report.words, 2);
        assert_eq!(report.pushed, 0);
        assert_eq!(report.previous_sync, None);
        assert_eq!(cache.list_words(course.id).unwrap(), remote.list_words(course.id).unwrap());
        assert_eq!(cache.get_course(course.id).unwrap().description.as_deref(), Some("basics"));
    }

    #[test]
    fn offline_answers_are_pushed_and_remote_deletes_are_dropped() {
        let remote = open();
        let cache = open();
        let course = remote.create_course("HSK 1", None).unwrap();
        let stored = remote.insert_words(course.id, words(&["一", "二", "三"])).unwrap();
        sync_course(&remote, &cache, course.id, Utc::now()).unwrap();

        let answered = cache.record_answer(stored[0].id, false, Utc::now()).unwrap();
        remote.delete_word(stored[2].id).unwrap();

        let report = sync_course(&remote, &cache, course.id, Utc::now()).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.dropped, 1);
        assert!(report.previous_sync.is_some());
        assert_eq!(remote.get_word(stored[0].id).unwrap().state, answered);
        assert_eq!(cache.list_words(course.id).unwrap().len(), 2);
    }

    #[test]
    fn unknown_remote_course_is_not_found() {
        let remote = open();
        let cache = open();
        let missing = uuid::Uuid::new_v4();
        assert!(matches!(
            sync_course(&remote, &cache, missing, Utc::now()),
            Err(StoreError::NotFound { .. })
        ));
    }
}
