//! Incremental terminal rendering of streamed assistant messages

use std::collections::HashMap;

use shipwright_chat::{ChatMessage, Role};
use uuid::Uuid;

/// Tracks what has already been printed for each assistant message so that
/// each update only writes the new part.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: HashMap<Uuid, String>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for an updated message, if anything changed.
    ///
    /// Content that extends what was printed yields only the suffix. Content
    /// that rewrites it (throttled flushes replace the whole text) is
    /// reprinted on a fresh line.
    pub fn render(&mut self, message: &ChatMessage) -> Option<String> {
        if message.role != Role::Assistant {
            return None;
        }

        let printed = self.printed.entry(message.id).or_default();
        if message.content == *printed {
            return None;
        }

        let out = match message.content.strip_prefix(printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{}", message.content),
        };
        *printed = message.content.clone();
        Some(out)
    }

    /// Forget a finished message
    pub fn finish(&mut self, id: Uuid) {
        self.printed.remove(&id);
    }

    pub fn reset(&mut self) {
        self.printed.clear();
    }
}
