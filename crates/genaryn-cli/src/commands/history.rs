//! /history command - show the transcript

use genaryn_ai::{MessageStatus, Role};
use genaryn_chat::Conversation;

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn execute(conversation: &Conversation) -> String {
        if conversation.is_empty() {
            return "No messages yet.".to_string();
        }

        let mut output = String::new();
        for message in &conversation.messages {
            let speaker = match message.role {
                Role::User => "You",
                Role::Assistant => "Deputy",
                Role::System => "System",
            };
            output.push_str(&format!(
                "[{}] {}{}:\n",
                message.sequence_index,
                speaker,
                status_tag(message.status)
            ));
            if message.content.is_empty() {
                output.push_str("  (no content)\n");
            } else {
                for line in message.content.lines() {
                    output.push_str("  ");
                    output.push_str(line);
                    output.push('\n');
                }
            }
        }

        let failed = count(conversation, MessageStatus::Failed);
        let truncated = count(conversation, MessageStatus::Truncated);
        output.push_str(&format!(
            "\n{} messages ({} truncated, {} failed)",
            conversation.len(),
            truncated,
            failed
        ));
        output
    }
}

fn status_tag(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Complete => "",
        MessageStatus::Streaming => " (streaming)",
        MessageStatus::Truncated => " (truncated)",
        MessageStatus::Failed => " (failed)",
    }
}

fn count(conversation: &Conversation, status: MessageStatus) -> usize {
    conversation
        .messages
        .iter()
        .filter(|m| m.status == status)
        .count()
}
