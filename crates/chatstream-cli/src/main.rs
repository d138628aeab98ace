//! chatstream - terminal front end for a research-assistant chat backend.

mod render;

use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use chatstream_core::observability::{ConsoleTarget, init_observability};
use chatstream_core::{ChatClientConfig, Conversation, Turn, TurnOutcome};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use crate::render::{Renderer, ledger_line};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Stream answers from a research-assistant chat backend.
#[derive(Parser)]
#[command(name = "chatstream")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (overrides CHATSTREAM_BACKEND_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Cancel a turn that has not finished after this many seconds
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,

    /// Print the request ledger before exiting
    #[arg(long, global = true)]
    show_ledger: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply
    Ask {
        /// Message text, joined with spaces
        #[arg(required = true)]
        text: Vec<String>,

        /// Print the final message as JSON instead of streaming text
        #[arg(long)]
        json: bool,
    },
    /// Send one message per stdin line, keeping the conversation going
    Repl,
}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Empty,
    Quit,
    Checkpoint,
    Ledger,
    Unknown(&'a str),
    Message(&'a str),
}

fn parse_command(line: &str) -> ReplCommand<'_> {
    let line = line.trim();
    match line {
        "" => ReplCommand::Empty,
        "/quit" | "/exit" => ReplCommand::Quit,
        "/checkpoint" => ReplCommand::Checkpoint,
        "/ledger" => ReplCommand::Ledger,
        cmd if cmd.starts_with('/') => ReplCommand::Unknown(cmd),
        text => ReplCommand::Message(text),
    }
}

/// Load .env from the crate dir or the current dir.
fn load_env() {
    if let Ok(canon) = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(".env")
        .canonicalize()
    {
        let _ = dotenvy::from_path(canon);
    }
    let _ = dotenvy::dotenv();
}

#[tokio::main]
async fn main() -> CliResult<ExitCode> {
    load_env();
    init_observability(ConsoleTarget::Stderr);
    let cli = Cli::parse();

    let mut config = ChatClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url.clone() {
        config = config.base_url(base_url);
    }
    info!(base_url = %config.base_url, "starting chatstream");
    let mut chat = Conversation::from_config(&config)?;
    let deadline = cli.deadline_secs.map(Duration::from_secs);

    let code = match cli.command {
        Commands::Ask { text, json } => {
            let outcome = ask(&mut chat, &text.join(" "), deadline, json).await?;
            match outcome {
                TurnOutcome::Failed(_) => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
        Commands::Repl => {
            repl(&mut chat, deadline).await?;
            ExitCode::SUCCESS
        }
    };
    if cli.show_ledger {
        print_ledger(&chat);
    }
    Ok(code)
}

async fn ask(
    chat: &mut Conversation,
    text: &str,
    deadline: Option<Duration>,
    json: bool,
) -> CliResult<TurnOutcome> {
    let mut turn = chat.submit(text)?;
    let mut renderer = Renderer::default();
    let outcome = drive_turn(&mut turn, deadline, &mut renderer, !json).await;
    if json {
        if let Some(snapshot) = turn.snapshot() {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    } else {
        println!();
    }
    Ok(outcome)
}

async fn repl(chat: &mut Conversation, deadline: Option<Duration>) -> CliResult<()> {
    for message in chat.transcript().messages() {
        println!("{}", message.text);
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Checkpoint => println!("{}", chat.checkpoint().unwrap_or("(none)")),
            ReplCommand::Ledger => print_ledger(chat),
            ReplCommand::Unknown(cmd) => eprintln!("unknown command: {cmd}"),
            ReplCommand::Message(text) => {
                let mut turn = chat.submit(text)?;
                let mut renderer = Renderer::default();
                let outcome = drive_turn(&mut turn, deadline, &mut renderer, true).await;
                println!();
                if let TurnOutcome::Failed(err) = outcome {
                    warn!(request_id = %turn.request_id(), error = %err, "turn failed");
                }
            }
        }
        prompt();
    }
    Ok(())
}

/// Streams one turn to the terminal until it settles or the deadline passes.
async fn drive_turn(
    turn: &mut Turn<'_>,
    deadline: Option<Duration>,
    renderer: &mut Renderer,
    stream_text: bool,
) -> TurnOutcome {
    let expires = deadline.map(|d| tokio::time::Instant::now() + d);
    loop {
        let next = match expires {
            Some(at) => {
                let waited = tokio::time::timeout_at(at, turn.next_snapshot()).await;
                match waited {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(request_id = %turn.request_id(), "turn deadline elapsed, cancelling");
                        turn.cancel();
                        break;
                    }
                }
            }
            None => turn.next_snapshot().await,
        };
        let Some(snapshot) = next else {
            break;
        };
        for line in renderer.progress_lines(snapshot.progress.as_ref()) {
            eprintln!("{line}");
        }
        if stream_text && let Some(delta) = renderer.text_delta(&snapshot.text) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
    }
    turn.outcome().cloned().unwrap_or(TurnOutcome::Cancelled)
}

fn print_ledger(chat: &Conversation) {
    for entry in chat.ledger().entries() {
        println!("{}", ledger_line(&entry));
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
