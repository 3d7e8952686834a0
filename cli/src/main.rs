//! `deepresearch` binary: start research runs, answer the review pause, inspect threads.
//!
//! Subcommands: `start`, `resume`, `history`, `state`. Runs use the scripted offline
//! collaborators (`--offline`); checkpoints and archived conversations go to SQLite
//! (`--db`, default from `DEEPRESEARCH_DB`) or stay in memory (`--in-memory`).

mod logging;

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cli::output::{render_history, render_snapshot};
use cli::{open_runner, CliError, EventPrinter, Storage};
use deepresearch::research::{ResearchConfig, ResearchEvent, ReviewAction, ReviewDecision};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Parser, Debug)]
#[command(name = "deepresearch")]
#[command(about = "deepresearch: budget-bounded research runs with a human review step")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Print events and results as JSON, one object per line
    #[arg(long, global = true)]
    json: bool,

    /// SQLite file for checkpoints and conversations (default: DEEPRESEARCH_DB or ./deepresearch.db)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Keep checkpoints and conversations in memory only (lost on exit)
    #[arg(long, global = true, conflicts_with = "db")]
    in_memory: bool,

    /// Use the built-in scripted collaborators (no model or search access)
    #[arg(long, global = true)]
    offline: bool,

    /// Verbose: log stage execution and routing to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start research, or answer the clarifying questions of an existing thread.
    /// Reads the message from stdin when none is given.
    Start {
        #[arg(long, value_name = "ID")]
        thread_id: Option<String>,
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Answer the review pause of a thread
    Resume {
        #[arg(long, value_name = "ID")]
        thread_id: String,
        #[arg(long, value_enum)]
        action: ActionArg,
        /// Refinement instructions, or the query of the extra research task
        #[arg(long, value_name = "TEXT")]
        feedback: Option<String>,
    },
    /// List archived conversations, newest first
    History {
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        /// Print the stored report of one conversation instead of the list
        #[arg(long, value_name = "CONVERSATION_ID")]
        show: Option<String>,
    },
    /// Show the latest checkpoint of a thread
    State {
        #[arg(long, value_name = "ID")]
        thread_id: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionArg {
    Approve,
    Refine,
    #[value(name = "re_research", alias = "re-research")]
    ReResearch,
}

impl From<ActionArg> for ReviewAction {
    fn from(a: ActionArg) -> Self {
        match a {
            ActionArg::Approve => ReviewAction::Approve,
            ActionArg::Refine => ReviewAction::Refine,
            ActionArg::ReResearch => ReviewAction::ReResearch,
        }
    }
}

fn storage(args: &Args, config: &ResearchConfig) -> Storage {
    if args.in_memory {
        Storage::InMemory
    } else {
        Storage::Sqlite(args.db.clone().unwrap_or_else(|| config.db_path.clone()))
    }
}

fn require_offline(args: &Args) -> Result<(), CliError> {
    if args.offline {
        Ok(())
    } else {
        Err(CliError::Usage(
            "no live collaborators are built in; pass --offline to run with the scripted ones".into(),
        ))
    }
}

fn read_message(words: &[String]) -> Result<String, CliError> {
    let message = if words.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        words.join(" ")
    };
    let message = message.trim().to_string();
    if message.is_empty() {
        return Err(CliError::Usage("provide a message as arguments or on stdin".into()));
    }
    Ok(message)
}

async fn print_events(
    mut events: ReceiverStream<ResearchEvent>,
    printer: &mut EventPrinter,
) -> Result<(), CliError> {
    while let Some(event) = events.next().await {
        for line in printer.render(&event)? {
            println!("{}", line);
        }
    }
    Ok(())
}

fn print_resume_hint(printer: &EventPrinter, json: bool, thread_id: &str) {
    if printer.interrupted() && !json {
        println!(
            "\nresume with: deepresearch resume --thread-id {} --action approve|refine|re_research [--feedback TEXT]",
            thread_id
        );
    }
}

async fn run(args: Args, config: ResearchConfig) -> Result<(), CliError> {
    let storage = storage(&args, &config);
    let runner = open_runner(&storage, config)?;
    let json = args.json;

    match &args.cmd {
        Command::Start { thread_id, message } => {
            require_offline(&args)?;
            let message = read_message(message)?;
            let (thread_id, events) = runner.start(&message, thread_id.clone()).await?;
            let mut printer = EventPrinter::new(json);
            println!("{}", printer.thread_line(&thread_id)?);
            print_events(events, &mut printer).await?;
            print_resume_hint(&printer, json, &thread_id);
        }
        Command::Resume {
            thread_id,
            action,
            feedback,
        } => {
            require_offline(&args)?;
            if matches!(action, ActionArg::Refine) && feedback.is_none() {
                return Err(CliError::Usage("--action refine needs --feedback".into()));
            }
            let decision = ReviewDecision::new((*action).into(), feedback.clone());
            let events = runner.resume(thread_id, decision).await?;
            let mut printer = EventPrinter::new(json);
            print_events(events, &mut printer).await?;
            print_resume_hint(&printer, json, thread_id);
        }
        Command::History {
            user_id,
            limit,
            show,
        } => {
            let user_id = user_id
                .clone()
                .unwrap_or_else(|| runner.config().user_id.clone());
            match show {
                Some(id) => {
                    let record = runner
                        .conversation(&user_id, id)
                        .await?
                        .ok_or_else(|| CliError::Usage(format!("no conversation {}", id)))?;
                    if json {
                        println!("{}", serde_json::to_string(&record)?);
                    } else {
                        println!("{}", record.report_content);
                    }
                }
                None => {
                    let limit = limit.unwrap_or(runner.config().history_limit);
                    let items = runner.history(&user_id, limit).await?;
                    println!("{}", render_history(&items, json)?);
                }
            }
        }
        Command::State { thread_id } => {
            let snapshot = runner
                .state(thread_id)
                .await?
                .ok_or_else(|| CliError::Usage(format!("unknown thread {}", thread_id)))?;
            println!("{}", render_snapshot(&snapshot, json)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = ResearchConfig::load(None)?;
    let log_guard = logging::init(args.verbose)?;

    if let Err(e) = run(args, config).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("deepresearch: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }
    Ok(())
}
