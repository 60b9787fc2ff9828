use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use wl_core::stats::{course_stats, CourseStats};
use wl_core::{import, Course, LearningState, WordStore};

/// Finds a course by id, or by a case-insensitive prefix of its title.
pub fn resolve_course<S: WordStore + ?Sized>(store: &S, needle: &str) -> anyhow::Result<Course> {
    if let Ok(id) = Uuid::parse_str(needle) {
        return Ok(store.get_course(id)?);
    }
    let needle = needle.to_lowercase();
    let matches: Vec<Course> = store
        .list_courses()?
        .into_iter()
        .filter(|course| course.title.to_lowercase().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [course] => Ok(course.clone()),
        [] => bail!("no course matches '{needle}'"),
        many => {
            if let Some(exact) = many.iter().find(|course| course.title.to_lowercase() == needle) {
                return Ok(exact.clone());
            }
            let titles: Vec<&str> = many.iter().map(|course| course.title.as_str()).collect();
            bail!("'{needle}' matches several courses: {}", titles.join(", "))
        }
    }
}

pub fn list_courses<S: WordStore + ?Sized>(store: &S) -> anyhow::Result<()> {
    let courses = store.list_courses()?;
    if courses.is_empty() {
        println!("No courses yet. Create one with `wordloop add-course <title>`.");
        return Ok(());
    }
    for course in courses {
        let words = store.list_words(course.id)?;
        println!("{}  {} ({} words)", course.id, course.title, words.len());
        if let Some(description) = &course.description {
            println!("    {description}");
        }
    }
    Ok(())
}

pub fn import_file<S: WordStore + ?Sized>(store: &S, course: &Course, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let rows = import::read_csv(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?;
    let report = store.bulk_import_words(course.id, &rows)?;
    println!("Imported {} words into {}", report.words.len(), course.title);
    if report.skipped > 0 {
        println!("Skipped {} malformed rows", report.skipped);
    }
    Ok(())
}

fn status(state: &LearningState, now: DateTime<Utc>) -> String {
    let mut parts = Vec::new();
    if state.is_learned {
        match state.next_due_at {
            Some(due) if due <= now => parts.push("learned, due now".to_string()),
            Some(due) => parts.push(format!("learned, due {}", due.format("%Y-%m-%d %H:%M"))),
            None => parts.push("learned".to_string()),
        }
    } else {
        parts.push(format!("new ({} in a row)", state.consecutive_correct));
    }
    if state.is_difficult {
        parts.push("difficult".to_string());
    }
    if state.error_count > 0 {
        parts.push(format!("{} errors", state.error_count));
    }
    parts.join(", ")
}

pub fn list_words<S: WordStore + ?Sized>(store: &S, course: &Course) -> anyhow::Result<()> {
    let now = Utc::now();
    let words = store.list_words(course.id)?;
    println!("{} ({} words)", course.title, words.len());
    for entry in &words {
        let word = &entry.word;
        println!("  {}  [{}]  {}  | {}", word.word, word.pinyin, word.definition, status(&entry.state, now));
    }
    Ok(())
}

fn print_stats(label: &str, stats: &CourseStats) {
    println!(
        "{label}: {} words, {} learned ({}%), {} difficult, {} due, accuracy {}%",
        stats.total, stats.learned, stats.progress_percent, stats.difficult, stats.due, stats.accuracy_percent
    );
}

pub fn show_stats<S: WordStore + ?Sized>(store: &S, course: Option<&Course>) -> anyhow::Result<()> {
    let now = Utc::now();
    if let Some(course) = course {
        let words = store.list_words(course.id)?;
        print_stats(&course.title, &course_stats(&words, now));
        return Ok(());
    }
    for course in store.list_courses()? {
        let words = store.list_words(course.id)?;
        print_stats(&course.title, &course_stats(&words, now));
    }
    print_stats("All courses", &course_stats(&store.list_all_words()?, now));
    Ok(())
}
