mod commands;
mod config;
mod db;
mod logging;
mod study;
mod sync;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;
use wl_core::{MasteryEngine, QuickPractice, SessionConfig, SessionCoordinator, WordStore};

use crate::db::{Db, SqliteDb};
use crate::study::Prompt;

#[derive(Parser)]
#[command(name = "wordloop", about = "Chinese vocabulary drills with spaced review", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List courses
    Courses,

    /// Create a course
    AddCourse {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a course and all of its words
    DeleteCourse {
        /// Course id or title prefix
        course: String,
    },

    /// Import words from a CSV file (word, pinyin, definition, example, audio)
    Import { course: String, file: PathBuf },

    /// List a course's words with their progress
    Words { course: String },

    /// Progress and accuracy, per course or for one course
    Stats { course: Option<String> },

    /// Learn new words until each reaches the configured streak of correct answers
    Learn { course: String },

    /// Review words whose interval has elapsed
    Review { course: Option<String> },

    /// Walk through the words marked difficult
    Difficult { course: Option<String> },

    /// Timed drill over learned words that are still difficult
    Practice { course: String },

    /// Pull a course from the server into the local cache
    Sync { course: String },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let data_dir = config::data_dir();
    fs::create_dir_all(&data_dir)?;
    let log_dir = std::env::var_os("LOG_DIR").map(PathBuf::from);
    let _log_guard = logging::init_tracing("warn", log_dir.as_deref());

    let config = config::load_config(&data_dir.join("config.toml"))?;
    let engine = MasteryEngine::new(config.mastery.clone())?;
    let db_path = data_dir.join("words.db");
    debug!(path = %db_path.display(), "data directory ready");

    match cli.command {
        Command::Sync { course } => sync_command(&course, &db_path, engine),
        command => {
            let db = db::get_db_backend(&db_path, engine)?;
            db.init()?;
            run(&*db, command, config.session)
        }
    }
}

/// Sync always pairs the Postgres server with the local SQLite cache,
/// whatever `BACKEND` selects.
fn sync_command(course: &str, db_path: &Path, engine: MasteryEngine) -> anyhow::Result<()> {
    let remote = db::connect_postgres(engine.clone())?;
    remote.init()?;
    let cache = SqliteDb::open(db_path, engine)?;
    cache.init()?;
    let course = commands::resolve_course(&remote, course)?;
    let report = sync::sync_course(&remote, &cache, course.id, Utc::now())?;
    println!(
        "Synced {}: {} words cached, {} local answers pushed, {} removed",
        course.title, report.words, report.pushed, report.dropped
    );
    if let Some(previous) = report.previous_sync {
        println!("Previous sync {}", previous.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

fn run<S: WordStore + ?Sized>(store: &S, command: Command, session_config: SessionConfig) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut prompt = Prompt::new(stdin.lock(), io::stdout());
    let rng = rand::thread_rng();
    let optional_course = |needle: Option<String>| {
        needle
            .map(|needle| commands::resolve_course(store, &needle).map(|course| course.id))
            .transpose()
    };

    match command {
        Command::Courses => commands::list_courses(store)?,
        Command::AddCourse { title, description } => {
            let course = store.create_course(&title, description.as_deref())?;
            println!("Created {} ({})", course.title, course.id);
        }
        Command::DeleteCourse { course } => {
            let course = commands::resolve_course(store, &course)?;
            store.delete_course(course.id)?;
            println!("Deleted {}", course.title);
        }
        Command::Import { course, file } => {
            let course = commands::resolve_course(store, &course)?;
            commands::import_file(store, &course, &file)?;
        }
        Command::Words { course } => {
            let course = commands::resolve_course(store, &course)?;
            commands::list_words(store, &course)?;
        }
        Command::Stats { course } => {
            let course = course
                .map(|needle| commands::resolve_course(store, &needle))
                .transpose()?;
            commands::show_stats(store, course.as_ref())?;
        }
        Command::Learn { course } => {
            let course = commands::resolve_course(store, &course)?;
            let mut session = SessionCoordinator::learn(store, course.id, session_config, rng)?;
            study::run_session(&mut session, &mut prompt)?;
        }
        Command::Review { course } => {
            let course_id = optional_course(course)?;
            let mut session = SessionCoordinator::review(store, course_id, Utc::now(), session_config, rng)?;
            study::run_session(&mut session, &mut prompt)?;
        }
        Command::Difficult { course } => {
            let course_id = optional_course(course)?;
            let mut session = SessionCoordinator::difficult(store, course_id, session_config, rng)?;
            study::run_session(&mut session, &mut prompt)?;
        }
        Command::Practice { course } => {
            let course = commands::resolve_course(store, &course)?;
            let mut drill = QuickPractice::start(store, Some(course.id), Utc::now(), session_config, rng)?;
            study::run_practice(&mut drill, &mut prompt)?;
        }
        Command::Sync { .. } => bail!("sync needs the server connection"),
    }
    Ok(())
}
