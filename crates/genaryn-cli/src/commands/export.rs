//! /export command - write the transcript to a file

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use genaryn_ai::Message;
use genaryn_chat::{Conversation, Error, Result, TranscriptExporter};
use serde::Serialize;

use super::CommandResult;

pub struct ExportCommand;

impl ExportCommand {
    pub fn execute(args: &str) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message("Usage: /export <path>".to_string());
        }
        CommandResult::Export(PathBuf::from(args))
    }

    /// Pick a format from the file extension
    pub fn exporter_for(path: &Path) -> Box<dyn TranscriptExporter> {
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        if is_text {
            Box::new(TextExporter::new(path))
        } else {
            Box::new(JsonExporter::new(path))
        }
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::Export(e.to_string()))?;
    }
    fs::write(path, content)
        .map_err(|e| Error::Export(format!("{}: {}", path.display(), e)))
}

#[derive(Serialize)]
struct JsonTranscript<'a> {
    exported_at: String,
    messages: Vec<JsonMessage<'a>>,
}

#[derive(Serialize)]
struct JsonMessage<'a> {
    sequence_index: u64,
    role: &'a str,
    content: &'a str,
    status: genaryn_ai::MessageStatus,
    created_at: String,
}

impl<'a> From<&'a Message> for JsonMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            sequence_index: message.sequence_index,
            role: message.role.as_str(),
            content: &message.content,
            status: message.status,
            created_at: DateTime::<Utc>::from_timestamp_millis(message.timestamp)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        }
    }
}

/// Writes the transcript as pretty-printed JSON
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TranscriptExporter for JsonExporter {
    fn name(&self) -> &str {
        "json"
    }

    fn export(&self, conversation: &Conversation) -> Result<()> {
        let transcript = JsonTranscript {
            exported_at: Utc::now().to_rfc3339(),
            messages: conversation.messages.iter().map(JsonMessage::from).collect(),
        };
        let content = serde_json::to_string_pretty(&transcript)
            .map_err(|e| Error::Export(e.to_string()))?;
        write_file(&self.path, &content)
    }
}

/// Writes the transcript as plain text
pub struct TextExporter {
    path: PathBuf,
}

impl TextExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn render(conversation: &Conversation) -> String {
        let mut lines = vec![
            "CONVERSATION EXPORT".to_string(),
            "=".repeat(50),
            format!("Exported: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
            format!("Messages: {}", conversation.len()),
            "=".repeat(50),
            String::new(),
        ];

        for message in &conversation.messages {
            let mut header = format!(
                "[{}] {}:",
                format_timestamp(message.timestamp),
                message.role.as_str().to_uppercase()
            );
            match message.status {
                genaryn_ai::MessageStatus::Truncated => header.push_str(" (truncated)"),
                genaryn_ai::MessageStatus::Failed => header.push_str(" (failed)"),
                _ => {}
            }
            lines.push(header);
            lines.push(message.content.clone());
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

impl TranscriptExporter for TextExporter {
    fn name(&self) -> &str {
        "text"
    }

    fn export(&self, conversation: &Conversation) -> Result<()> {
        write_file(&self.path, &Self::render(conversation))
    }
}
