//! Incremental terminal rendering of conversation updates

use std::io::Write;

use genaryn_ai::{MessageStatus, Role};
use genaryn_chat::{ConversationUpdate, Transition};
use parking_lot::Mutex;

#[derive(Default)]
struct Cursor {
    /// Sequence index of the assistant message being printed
    sequence: Option<u64>,
    /// Bytes of its content already written
    printed: usize,
}

/// Writes assistant text as it streams in.
///
/// Only the new suffix of the streaming message is written on each update,
/// so output reads like a single continuous reply.
pub struct StreamPrinter<W: Write + Send> {
    out: Mutex<W>,
    cursor: Mutex<Cursor>,
}

impl<W: Write + Send> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn on_update(&self, update: &ConversationUpdate) {
        let Some(message) = update.message() else {
            return;
        };
        if message.role != Role::Assistant {
            return;
        }

        let mut cursor = self.cursor.lock();
        match update.transition {
            Transition::Append => {
                cursor.sequence = Some(message.sequence_index);
                cursor.printed = 0;
                return;
            }
            Transition::Resume => {
                cursor.sequence = Some(message.sequence_index);
                cursor.printed = message.content.len();
                return;
            }
            Transition::Clear => return,
            _ => {}
        }
        if cursor.sequence != Some(message.sequence_index) {
            return;
        }

        let mut out = self.out.lock();
        if let Some(new_text) = message.content.get(cursor.printed..) {
            let _ = out.write_all(new_text.as_bytes());
            cursor.printed = message.content.len();
        }

        if update.transition.is_terminal() {
            let _ = writeln!(out);
            if let Some(note) = status_note(message.status, message.error.as_deref()) {
                let _ = writeln!(out, "{}", note);
            }
            cursor.sequence = None;
        }
        let _ = out.flush();
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

/// Hint shown after a response that did not complete
pub fn status_note(status: MessageStatus, error: Option<&str>) -> Option<String> {
    let cause = error.unwrap_or("unknown cause");
    match status {
        MessageStatus::Truncated => Some(format!(
            "[Response cut short: {}. Type /continue to resume.]",
            cause
        )),
        MessageStatus::Failed => Some(format!(
            "[Response failed: {}. Type /retry to resend.]",
            cause
        )),
        _ => None,
    }
}
