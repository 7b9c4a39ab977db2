//! Slash commands for interactive mode

mod export;
mod history;

pub use export::ExportCommand;
pub use history::HistoryCommand;

use std::path::PathBuf;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Resume the truncated last response
    Continue,
    /// Resend the user turn whose response failed
    Retry,
    /// Write the transcript to a file
    Export(PathBuf),
    /// Print the transcript
    History,
    /// Clear the conversation
    Clear,
    /// Show a message to the user (not sent to the endpoint)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "continue" | "cont" => CommandResult::Continue,

        "retry" | "r" => CommandResult::Retry,

        "export" | "e" => ExportCommand::execute(args),

        "history" | "hist" => CommandResult::History,

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /continue, /cont       Resume a truncated response where it stopped
  /retry, /r             Resend the question whose response failed
  /export, /e <path>     Save the transcript (.txt for plain text, JSON otherwise)
  /history, /hist        Show the transcript with message status
  /clear, /c             Clear conversation history
  /quit, /exit, /q       Exit genaryn

Ctrl-C stops a response that is streaming; the partial text is kept and
can be resumed with /continue. Ctrl-D exits."#
        .to_string()
}
