//! Merging a course's cached snapshot with the state held by the server.

use std::collections::HashMap;

use crate::{LearningState, StudyWord, WordId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The course as the cache should hold it after the sync.
    pub merged: Vec<StudyWord>,
    /// Cached states that are newer than the server's copy.
    pub push: Vec<(WordId, LearningState)>,
}

fn cache_is_newer(cached: &LearningState, remote: &LearningState) -> bool {
    match (cached.last_reviewed, remote.last_reviewed) {
        (Some(cached_at), Some(remote_at)) => cached_at > remote_at,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Word content always comes from the server; for each word the learning
/// state answered most recently wins, with ties going to the server. Words
/// the server no longer has are dropped.
pub fn reconcile(remote: Vec<StudyWord>, cached: Vec<StudyWord>) -> Reconciliation {
    let mut cached_states: HashMap<WordId, LearningState> = cached
        .into_iter()
        .map(|entry| (entry.word.id, entry.state))
        .collect();

    let mut result = Reconciliation::default();
    for mut entry in remote {
        if let Some(local) = cached_states.remove(&entry.word.id)
            && cache_is_newer(&local, &entry.state)
        {
            result.push.push((entry.word.id, local.clone()));
            entry.state = local;
        }
        result.merged.push(entry);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Word;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn word(id: u128) -> Word {
        Word {
            id: Uuid::from_u128(id),
            course_id: Uuid::nil(),
            word: format!("w{id}"),
            pinyin: String::new(),
            definition: String::new(),
            example: None,
            audio_ref: None,
        }
    }

    fn reviewed(hours_ago: i64, errors: u32) -> LearningState {
        LearningState {
            last_reviewed: Some(Utc::now() - Duration::hours(hours_ago)),
            error_count: errors,
            ..LearningState::default()
        }
    }

    #[test]
    fn newer_cached_state_wins_and_is_pushed() {
        let remote = vec![
            StudyWord { word: word(1), state: reviewed(5, 1) },
            StudyWord { word: word(2), state: reviewed(1, 2) },
        ];
        let cached = vec![
            StudyWord { word: word(1), state: reviewed(2, 3) },
            StudyWord { word: word(2), state: reviewed(3, 9) },
        ];
        let result = reconcile(remote, cached);
        assert_eq!(result.merged[0].state.error_count, 3);
        assert_eq!(result.merged[1].state.error_count, 2);
        assert_eq!(result.push.len(), 1);
        assert_eq!(result.push[0].0, Uuid::from_u128(1));
    }

    #[test]
    fn words_deleted_remotely_are_dropped() {
        let remote = vec![StudyWord { word: word(1), state: LearningState::default() }];
        let cached = vec![
            StudyWord { word: word(1), state: LearningState::default() },
            StudyWord { word: word(7), state: reviewed(1, 0) },
        ];
        let result = reconcile(remote, cached);
        assert_eq!(result.merged.len(), 1);
        assert!(result.push.is_empty());
    }

    #[test]
    fn unreviewed_cache_never_overrides_server() {
        let remote = vec![StudyWord { word: word(1), state: reviewed(4, 1) }];
        let cached = vec![StudyWord { word: word(1), state: LearningState::default() }];
        let result = reconcile(remote, cached);
        assert_eq!(result.merged[0].state.error_count, 1);
        assert!(result.push.is_empty());
    }
}
