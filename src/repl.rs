use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use quill_core::persona::PersonaContext;
use quill_core::stream::StreamFragment;
use quill_engine::{EngineError, WritingSession};
use quill_store::ConversationStore;

const HELP: &str = "\
Type to write the next turn. Commands:
  /hint TEXT   steer the next reply
  /summary     show the running summary
  /new         start over with a blank conversation
  /continue    start over, carrying the summary forward
  /sessions    list stored sessions
  /quit        exit";

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Say(&'a str),
    Hint(&'a str),
    Summary,
    New { carry_over: bool },
    Sessions,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "hint" => Command::Hint(arg),
        "summary" => Command::Summary,
        "new" => Command::New { carry_over: false },
        "continue" => Command::New { carry_over: true },
        "sessions" => Command::Sessions,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other),
    }
}

pub async fn run(session: &WritingSession, store: &dyn ConversationStore, persona: &PersonaContext) -> Result<()> {
    let snapshot = session.snapshot();
    println!(
        "session {} ({} turns, {} folded). /help for commands.",
        session.name(),
        snapshot.len(),
        snapshot.fold_boundary()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hint: Option<String> = None;

    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Say(text) => {
                let result = session
                    .reply(text, persona, hint.as_deref(), render_fragment)
                    .await;
                println!();
                match result {
                    Ok(_) => hint = None,
                    Err(EngineError::Completion(_)) => eprintln!("reply not recorded; send again to retry"),
                    Err(e) => return Err(e).context("Session error"),
                }
            }
            Command::Hint(text) if text.is_empty() => {
                hint = None;
                println!("hint cleared");
            }
            Command::Hint(text) => {
                hint = Some(text.to_string());
                println!("hint set for the next reply");
            }
            Command::Summary => {
                let snapshot = session.snapshot();
                println!(
                    "{} turns, {} folded, ~{} context tokens",
                    snapshot.len(),
                    snapshot.fold_boundary(),
                    session.token_estimate(persona)
                );
                if snapshot.summary().is_empty() {
                    println!("(no summary yet)");
                } else {
                    println!("{}", snapshot.summary());
                }
            }
            Command::New { carry_over } => {
                let id = session
                    .start_new_conversation(carry_over)
                    .await
                    .context("Failed to start a new conversation")?;
                println!("started {id}");
            }
            Command::Sessions => {
                for name in store.list().context("Failed to list sessions")? {
                    let marker = if name == session.name() { "*" } else { " " };
                    println!("{marker} {name}");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Unknown(name) => println!("unknown command /{name}; try /help"),
        }
    }
    Ok(())
}

fn render_fragment(fragment: &StreamFragment) {
    if fragment.is_error() {
        eprint!("{}", fragment.display_text());
    } else {
        print!("{}", fragment.display_text());
        let _ = std::io::stdout().flush();
    }
}
