//! Export collaborator interface

use crate::conversation::Conversation;
use crate::error::Result;

/// Receives finalized transcripts on demand.
///
/// Formatting and output are entirely up to the implementation.
pub trait TranscriptExporter: Send + Sync {
    /// Short name for logs, e.g. "json"
    fn name(&self) -> &str;

    fn export(&self, conversation: &Conversation) -> Result<()>;
}
