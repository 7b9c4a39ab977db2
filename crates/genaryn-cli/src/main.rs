//! genaryn - streaming chat client for the Genaryn Deputy Commander

mod commands;
mod config;
mod printer;

use clap::Parser;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use genaryn_ai::{EndpointConfig, MessageStatus, providers::openai::OpenAICompatTransport};
use genaryn_chat::{
    ChatSession, ConversationUpdate, DEFAULT_CONTINUE_INSTRUCTION, SessionConfig, TurnOutcome,
};
use tracing_subscriber::EnvFilter;

use crate::commands::{CommandResult, ExportCommand, HistoryCommand};
use crate::printer::StreamPrinter;

/// genaryn - streaming chat client
#[derive(Parser, Debug)]
#[command(name = "genaryn")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat completions URL
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Model to use (default: gpt-oss-120b)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens per response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Cancel a response still streaming after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Send no system prompt
    #[arg(long)]
    no_system_prompt: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("genaryn=debug,genaryn_ai=debug,genaryn_chat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();

    // CLI takes precedence over the config file
    let mut endpoint = EndpointConfig::new(
        args.endpoint
            .or(cfg.endpoint.clone())
            .unwrap_or_else(|| config::DEFAULT_ENDPOINT.to_string()),
        args.model
            .or(cfg.model.clone())
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string()),
    );
    endpoint.headers = cfg.headers.clone();
    match cfg.api_key() {
        Some(key) => endpoint.api_key = Some(key),
        None => tracing::warn!(
            "No API key found in config or {}; sending unauthenticated requests",
            config::API_KEY_ENV
        ),
    }

    let system_prompt = if args.no_system_prompt {
        None
    } else {
        Some(cfg.system_prompt()?)
    };
    let session_config = SessionConfig {
        system_prompt,
        temperature: args.temperature.or(cfg.temperature),
        max_tokens: args.max_tokens.or(cfg.max_tokens),
        continue_instruction: cfg
            .continue_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTINUE_INSTRUCTION.to_string()),
        stream_timeout: args
            .timeout
            .or(cfg.stream_timeout_secs)
            .map(Duration::from_secs),
    };
    let model = endpoint.model.clone();
    let transport = Arc::new(OpenAICompatTransport::new(endpoint)?);
    let session = ChatSession::new(session_config, transport);

    let printer = Arc::new(StreamPrinter::new(io::stdout()));
    session.subscribe({
        let printer = Arc::clone(&printer);
        move |update: &ConversationUpdate| printer.on_update(update)
    });

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_command(&session, &command).await;
    }

    run_interactive(&session, &model).await
}

/// Await a turn, cancelling the stream on Ctrl-C
async fn drive(
    session: &ChatSession,
    turn: impl Future<Output = genaryn_chat::Result<TurnOutcome>>,
) -> genaryn_chat::Result<TurnOutcome> {
    tokio::pin!(turn);
    tokio::select! {
        outcome = &mut turn => outcome,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            turn.await
        }
    }
}

fn report_usage(outcome: &TurnOutcome) {
    if let Some(usage) = outcome.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Turn usage"
        );
    }
    if outcome.decode_errors > 0 {
        tracing::warn!("Skipped {} malformed frames", outcome.decode_errors);
    }
}

async fn run_command(session: &ChatSession, command: &str) -> anyhow::Result<()> {
    let outcome = drive(session, session.submit(command)).await?;
    report_usage(&outcome);

    if outcome.status() != MessageStatus::Complete {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_interactive(session: &ChatSession, model: &str) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("genaryn ({}) - /help for commands", model);
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let turn = match commands::execute_command(input) {
            None => drive(session, session.submit(input)).await,
            Some(CommandResult::Continue) => drive(session, session.continue_last()).await,
            Some(CommandResult::Retry) => drive(session, session.retry_last()).await,
            Some(CommandResult::Export(path)) => {
                let exporter = ExportCommand::exporter_for(&path);
                match session.export_to(exporter.as_ref()) {
                    Ok(()) => println!("Transcript written to {}", path.display()),
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }
            Some(CommandResult::History) => {
                println!("{}", HistoryCommand::execute(&session.snapshot()));
                continue;
            }
            Some(CommandResult::Clear) => {
                match session.clear() {
                    Ok(()) => println!("Cleared conversation."),
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }
            Some(CommandResult::Message(msg)) => {
                println!("{}", msg);
                continue;
            }
            Some(CommandResult::Exit) => break,
            Some(CommandResult::Unknown(cmd)) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
                continue;
            }
        };

        match turn {
            Ok(outcome) => report_usage(&outcome),
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    Ok(())
}
