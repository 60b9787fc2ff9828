//! Line-oriented driver for sessions and quick practice. Reads one line per
//! step; `q` quits at any prompt.

use std::io::{self, BufRead, Write};

use chrono::Utc;
use rand::Rng;
use wl_core::session::{SessionError, SessionSummary};
use wl_core::stats::{PerformanceTier, SessionTally};
use wl_core::{
    Advance, Answer, PresentationMode, QuickPractice, Question, SessionCoordinator, SessionMode, StudyWord, Word,
    WordStore,
};

pub struct Prompt<R, W> {
    input: R,
    output: W,
}

enum Reply {
    Line(String),
    Quit,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, text: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.output, "{}", text.as_ref())
    }

    fn ask(&mut self, prompt: &str) -> io::Result<Reply> {
        write!(self.output, "{prompt} ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(Reply::Quit);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.trim().eq_ignore_ascii_case("q") {
            return Ok(Reply::Quit);
        }
        Ok(Reply::Line(line))
    }
}

fn show_card<R: BufRead, W: Write>(prompt: &mut Prompt<R, W>, word: &Word) -> io::Result<()> {
    prompt.say(format!("  {}  [{}]", word.word, word.pinyin))?;
    prompt.say(format!("  {}", word.definition))?;
    if let Some(example) = &word.example {
        prompt.say(format!("  e.g. {example}"))?;
    }
    if let Some(audio) = &word.audio_ref {
        prompt.say(format!("  audio: {audio}"))?;
    }
    Ok(())
}

fn show_question<R: BufRead, W: Write>(
    prompt: &mut Prompt<R, W>,
    question: &Question,
    target: &Word,
) -> io::Result<()> {
    match question.mode {
        PresentationMode::SelectDefinition => {
            prompt.say(format!("What does {} [{}] mean?", target.word, target.pinyin))?
        }
        PresentationMode::SelectWord => prompt.say(format!("Which word means \"{}\"?", target.definition))?,
        PresentationMode::SelectPronunciation => prompt.say(format!(
            "Which word is this? audio: {}",
            target.audio_ref.as_deref().unwrap_or("-")
        ))?,
        PresentationMode::SpellWord => {
            prompt.say(format!("Write the word for \"{}\" [{}]", target.definition, target.pinyin))?
        }
    }
    for (index, option) in question.options.iter().enumerate() {
        let label = match question.mode {
            PresentationMode::SelectDefinition => option.definition.as_str(),
            _ => option.word.as_str(),
        };
        prompt.say(format!("  {}) {label}", index + 1))?;
    }
    Ok(())
}

/// Reads an answer of the kind the question expects. `None` means quit.
fn read_answer<R: BufRead, W: Write>(prompt: &mut Prompt<R, W>, question: &Question) -> io::Result<Option<Answer>> {
    loop {
        let label = if question.mode.is_multiple_choice() { ">" } else { "word>" };
        let line = match prompt.ask(label)? {
            Reply::Quit => return Ok(None),
            Reply::Line(line) => line,
        };
        if !question.mode.is_multiple_choice() {
            return Ok(Some(Answer::Text(line)));
        }
        let picked = line
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| question.options.get(index));
        match picked {
            Some(option) => return Ok(Some(Answer::Choice(option.id))),
            None => prompt.say(format!("Pick a number from 1 to {}", question.options.len()))?,
        }
    }
}

fn tier_label(tier: PerformanceTier) -> &'static str {
    match tier {
        PerformanceTier::Perfect => "perfect",
        PerformanceTier::Strong => "strong",
        PerformanceTier::Fair => "fair",
        PerformanceTier::NeedsWork => "needs work",
    }
}

fn show_tally<R: BufRead, W: Write>(prompt: &mut Prompt<R, W>, tally: SessionTally) -> io::Result<()> {
    prompt.say(format!(
        "{} answered, {} correct, {} wrong ({}%, {})",
        tally.answered,
        tally.correct,
        tally.incorrect(),
        tally.accuracy_percent(),
        tier_label(tally.tier())
    ))
}

fn show_summary<R: BufRead, W: Write>(prompt: &mut Prompt<R, W>, summary: &SessionSummary) -> io::Result<()> {
    prompt.say(format!("Session finished: {} words, {} rounds", summary.words, summary.rounds))?;
    if summary.mode == SessionMode::Learn {
        prompt.say(format!("{} words moved to review", summary.promoted.len()))?;
    }
    if let Some(err) = &summary.sync_error {
        prompt.say(format!("warning: results not saved: {err}"))?;
    }
    show_tally(prompt, summary.tally)
}

fn verify_line(correct: bool, word: &Word) -> String {
    if correct {
        format!("Correct: {} [{}] {}", word.word, word.pinyin, word.definition)
    } else {
        format!("Wrong. It was {} [{}] {}", word.word, word.pinyin, word.definition)
    }
}

/// Walks a session to completion or until the user quits.
pub fn run_session<S, G, R, W>(
    session: &mut SessionCoordinator<'_, S, G>,
    prompt: &mut Prompt<R, W>,
) -> anyhow::Result<()>
where
    S: WordStore + ?Sized,
    G: Rng,
    R: BufRead,
    W: Write,
{
    if let Some(summary) = session.summary() {
        prompt.say("Nothing to study here.")?;
        return Ok(show_summary(prompt, summary)?);
    }

    loop {
        let Some(StudyWord { word, .. }) = session.current().cloned() else {
            break;
        };
        prompt.say(format!("\n[{}/{} round {}]", session.cursor() + 1, session.len(), session.round()))?;
        show_card(prompt, &word)?;

        let advance = match prompt.ask("enter=answer d=difficult x=delete q=quit>")? {
            Reply::Quit => break,
            Reply::Line(line) if line.trim() == "d" => {
                let toggle = session.toggle_difficult(Utc::now())?;
                let status = if toggle.is_difficult { "marked difficult" } else { "no longer difficult" };
                prompt.say(format!("{} {status}", word.word))?;
                if let Some(err) = &toggle.persist_error {
                    prompt.say(format!("warning: not saved: {err}"))?;
                }
                match toggle.advance {
                    Some(advance) => advance,
                    None => continue,
                }
            }
            Reply::Line(line) if line.trim() == "x" => match session.delete_current(Utc::now()) {
                Ok(advance) => {
                    prompt.say(format!("{} deleted", word.word))?;
                    advance
                }
                Err(SessionError::Store(err)) => {
                    prompt.say(format!("could not delete {}: {err}", word.word))?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            },
            Reply::Line(_) => {
                let question = session.begin_attempt()?;
                show_question(prompt, &question, &word)?;
                let outcome = loop {
                    let Some(answer) = read_answer(prompt, &question)? else {
                        show_tally(prompt, session.tally())?;
                        return Ok(());
                    };
                    match session.submit(&answer, Utc::now()) {
                        Ok(outcome) => break outcome,
                        Err(SessionError::UnknownOption(_) | SessionError::AnswerKind { .. }) => {
                            prompt.say("That answer does not fit this question.")?;
                        }
                        Err(err) => return Err(err.into()),
                    }
                };
                prompt.say(verify_line(outcome.correct, &outcome.word))?;
                if let Some(err) = &outcome.persist_error {
                    prompt.say(format!("warning: progress kept locally only: {err}"))?;
                }
                if let Reply::Quit = prompt.ask("enter=next>")? {
                    break;
                }
                session.advance(Utc::now())?
            }
        };

        match advance {
            Advance::Next => {}
            Advance::Restarted { pending } => {
                let streak = session.mastery_threshold();
                prompt.say(format!("\n{pending} words still need {streak} in a row. Starting the set again."))?;
            }
            Advance::Complete(summary) => {
                show_summary(prompt, &summary)?;
                return Ok(());
            }
        }
    }

    show_tally(prompt, session.tally())?;
    Ok(())
}

/// Runs the timed drill until time, questions or words run out.
pub fn run_practice<S, G, R, W>(drill: &mut QuickPractice<'_, S, G>, prompt: &mut Prompt<R, W>) -> anyhow::Result<()>
where
    S: WordStore + ?Sized,
    G: Rng,
    R: BufRead,
    W: Write,
{
    while let Some(question) = drill.next_question(Utc::now()) {
        let Some(word) = drill.current().map(|entry| entry.word.clone()) else {
            break;
        };
        prompt.say(format!("\n[{}s left, score {}]", drill.time_left(Utc::now()).num_seconds(), drill.score()))?;
        show_question(prompt, &question, &word)?;
        let Some(answer) = read_answer(prompt, &question)? else {
            break;
        };
        match drill.answer(&answer, Utc::now()) {
            Ok(outcome) => {
                prompt.say(verify_line(outcome.correct, &outcome.word))?;
                if let Some(err) = &outcome.persist_error {
                    prompt.say(format!("warning: progress kept locally only: {err}"))?;
                }
            }
            Err(SessionError::Finished) => {
                prompt.say("Time is up.")?;
                break;
            }
            Err(SessionError::UnknownOption(_) | SessionError::AnswerKind { .. }) => {
                prompt.say("That answer does not fit this question.")?;
            }
            Err(err) => return Err(err.into()),
        }
    }
    prompt.say(format!("Practice over. Score {}", drill.score()))?;
    show_tally(prompt, drill.tally())?;
    Ok(())
}
