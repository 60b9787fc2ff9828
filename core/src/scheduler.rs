//! Queries that split a course's words into the new, due, difficult and
//! practice pools, plus the random draws sessions are built from.
//!
//! None of these fail on an empty pool: an empty result means there is
//! nothing to study in that mode.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::{IteratorRandom, SliceRandom};

use crate::{StudyWord, Word};

pub fn new_words(words: &[StudyWord]) -> Vec<&StudyWord> {
    words.iter().filter(|entry| !entry.state.is_learned).collect()
}

/// Learned words whose due time has passed, most overdue first. Ties are
/// broken by id so repeated calls agree on the order.
pub fn due_for_review(words: &[StudyWord], now: DateTime<Utc>) -> Vec<&StudyWord> {
    let mut due: Vec<&StudyWord> = words.iter().filter(|entry| entry.state.is_due(now)).collect();
    due.sort_by(|a, b| {
        a.state
            .next_due_at
            .cmp(&b.state.next_due_at)
            .then_with(|| a.word.id.cmp(&b.word.id))
    });
    due
}

pub fn difficult_words(words: &[StudyWord]) -> Vec<&StudyWord> {
    words.iter().filter(|entry| entry.state.is_difficult).collect()
}

pub fn practice_words(words: &[StudyWord]) -> Vec<&StudyWord> {
    words
        .iter()
        .filter(|entry| entry.state.is_learned && entry.state.is_difficult)
        .collect()
}

/// Uniform draw without replacement of up to `size` new words.
pub fn draw_learn_set<R: Rng + ?Sized>(words: &[StudyWord], size: usize, rng: &mut R) -> Vec<StudyWord> {
    let pool = new_words(words);
    let mut drawn: Vec<StudyWord> = pool
        .into_iter()
        .choose_multiple(rng, size)
        .into_iter()
        .cloned()
        .collect();
    drawn.shuffle(rng);
    drawn
}

pub fn multiple_choice_available(pool_len: usize, choice_count: usize) -> bool {
    choice_count >= 2 && pool_len >= choice_count
}

/// Picks `choice_count - 1` distractors from `pool` (never the target) and
/// returns them shuffled together with the target. `None` when the pool is
/// too small for a full set of options.
pub fn build_choices<R: Rng + ?Sized>(
    target: &Word,
    pool: &[StudyWord],
    choice_count: usize,
    rng: &mut R,
) -> Option<Vec<Word>> {
    let others: Vec<&Word> = pool
        .iter()
        .map(|entry| &entry.word)
        .filter(|word| word.id != target.id)
        .collect();
    if !multiple_choice_available(others.len() + 1, choice_count) {
        return None;
    }
    let mut options: Vec<Word> = others
        .choose_multiple(rng, choice_count - 1)
        .map(|word| (*word).clone())
        .collect();
    options.push(target.clone());
    options.shuffle(rng);
    Some(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LearningState;
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn entry(text: &str, state: LearningState) -> StudyWord {
        StudyWord {
            word: Word {
                id: Uuid::new_v4(),
                course_id: Uuid::nil(),
                word: text.to_string(),
                pinyin: String::new(),
                definition: format!("meaning of {text}"),
                example: None,
                audio_ref: None,
            },
            state,
        }
    }

    fn learned_due_at(offset_hours: i64) -> LearningState {
        LearningState {
            is_learned: true,
            next_due_at: Some(now() + Duration::hours(offset_hours)),
            ..LearningState::default()
        }
    }

    #[test]
    fn pools_partition_by_flags() {
        let words = vec![
            entry("新", LearningState::default()),
            entry("难", LearningState { is_difficult: true, ..LearningState::default() }),
            entry("练", LearningState { is_difficult: true, ..learned_due_at(5) }),
            entry("学", learned_due_at(-1)),
        ];
        assert_eq!(new_words(&words).len(), 2);
        assert_eq!(difficult_words(&words).len(), 2);
        let practice = practice_words(&words);
        assert_eq!(practice.len(), 1);
        assert_eq!(practice[0].word.word, "练");
        let due = due_for_review(&words, now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].word.word, "学");
    }

    #[test]
    fn due_is_most_overdue_first_and_stable() {
        let mut words = vec![
            entry("a", learned_due_at(-1)),
            entry("b", learned_due_at(-10)),
            entry("c", learned_due_at(-1)),
            entry("d", learned_due_at(2)),
        ];
        words[0].word.id = Uuid::from_u128(2);
        words[2].word.id = Uuid::from_u128(1);

        let first: Vec<&str> = due_for_review(&words, now()).iter().map(|e| e.word.word.as_str()).collect();
        let second: Vec<&str> = due_for_review(&words, now()).iter().map(|e| e.word.word.as_str()).collect();
        assert_eq!(first, vec!["b", "c", "a"]);
        assert_eq!(first, second);
    }

    #[test]
    fn unlearned_word_with_due_date_is_not_due() {
        let words = vec![entry("x", LearningState {
            next_due_at: Some(now() - Duration::hours(1)),
            ..LearningState::default()
        })];
        assert!(due_for_review(&words, now()).is_empty());
    }

    #[test]
    fn learn_draw_takes_all_when_pool_is_small() {
        let words: Vec<StudyWord> = (0..4).map(|i| entry(&i.to_string(), LearningState::default())).collect();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(draw_learn_set(&words, 10, &mut rng).len(), 4);
    }

    #[test]
    fn learn_draw_is_capped_and_distinct() {
        let mut words: Vec<StudyWord> = (0..25).map(|i| entry(&i.to_string(), LearningState::default())).collect();
        words.push(entry("done", learned_due_at(1)));
        let mut rng = StdRng::seed_from_u64(7);
        let drawn = draw_learn_set(&words, 10, &mut rng);
        assert_eq!(drawn.len(), 10);
        let ids: HashSet<_> = drawn.iter().map(|e| e.id()).collect();
        assert_eq!(ids.len(), 10);
        assert!(drawn.iter().all(|e| !e.state.is_learned));
    }

    #[test]
    fn choices_contain_target_and_three_others() {
        let words: Vec<StudyWord> = (0..8).map(|i| entry(&i.to_string(), LearningState::default())).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let target = &words[2].word;
        let options = build_choices(target, &words, 4, &mut rng).unwrap();
        assert_eq!(options.len(), 4);
        assert_eq!(options.iter().filter(|w| w.id == target.id).count(), 1);
        let ids: HashSet<_> = options.iter().map(|w| w.id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn three_words_cannot_support_multiple_choice() {
        let words: Vec<StudyWord> = (0..3).map(|i| entry(&i.to_string(), LearningState::default())).collect();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(!multiple_choice_available(words.len(), 4));
        assert!(build_choices(&words[0].word, &words, 4, &mut rng).is_none());
    }
}
