//! Conversation state: the ordered list of chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Whether the content is still being filled in
    pub streaming: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// An empty assistant message awaiting streamed content
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            streaming: true,
        }
    }
}

/// Ordered chat history owned by the reconciler
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Replace content and streaming flag of a message in place.
    ///
    /// Returns the updated message, or `None` if it no longer exists
    /// (e.g. the conversation was cleared mid-stream).
    pub fn update(
        &mut self,
        id: Uuid,
        content: Option<String>,
        streaming: bool,
    ) -> Option<&ChatMessage> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        if let Some(content) = content {
            message.content = content;
        }
        message.streaming = streaming;
        Some(message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_in_place() {
        let mut conv = Conversation::default();
        conv.push(ChatMessage::user("hi"));
        let placeholder = ChatMessage::placeholder();
        let id = placeholder.id;
        conv.push(placeholder);

        let updated = conv.update(id, Some("partial".into()), true).unwrap();
        assert_eq!(updated.content, "partial");
        assert!(updated.streaming);

        // Flag-only update keeps content
        let updated = conv.update(id, None, false).unwrap();
        assert_eq!(updated.content, "partial");
        assert!(!updated.streaming);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_update_after_clear_is_noop() {
        let mut conv = Conversation::default();
        let placeholder = ChatMessage::placeholder();
        let id = placeholder.id;
        conv.push(placeholder);
        conv.clear();

        assert!(conv.update(id, Some("late".into()), false).is_none());
        assert!(conv.is_empty());
    }

    #[test]
    fn test_placeholder_is_streaming_assistant() {
        let msg = ChatMessage::placeholder();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert!(msg.streaming);
        assert!(!ChatMessage::user("x").streaming);
    }
}
