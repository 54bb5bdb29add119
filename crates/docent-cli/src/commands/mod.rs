//! Slash commands for interactive mode

mod tasks;

pub use tasks::TaskCommand;

use std::path::PathBuf;

use docent_agent::TaskEngine;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Forget the current session's history
    Clear,
    /// Show collection, conversation and task counts
    Stats,
    /// Copy a file into the upload directory and index it
    Ingest(PathBuf),
    /// Show a message to the user (not sent to the concierge)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, tasks: &TaskEngine) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "stats" => CommandResult::Stats,

        "tasks" => TaskCommand::list(tasks, args),

        "task" => TaskCommand::status(tasks, args),

        "cancel" => TaskCommand::cancel(tasks, args),

        "ingest" | "i" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /ingest <path>".to_string())
            } else {
                CommandResult::Ingest(PathBuf::from(args))
            }
        }

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /stats               Show document, conversation and task counts
  /tasks [n]           List the n most recent tasks (default 3)
  /task <id>           Show a task's progress step by step
  /cancel <id>         Cancel a running task
  /ingest, /i <path>   Upload a document and index it for search
  /clear, /c           Start a fresh conversation
  /quit, /exit, /q     Exit docent

Anything else is sent to the assistant."#
        .to_string()
}
