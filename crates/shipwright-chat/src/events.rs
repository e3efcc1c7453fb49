//! Reconciler event types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{conversation::ChatMessage, handle::CycleOutcome};

/// Events emitted while the reconciler drives a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was appended to the conversation
    MessageAdded { message: ChatMessage },

    /// A message's content or streaming flag changed
    MessageUpdated { message: ChatMessage },

    /// The backend started a workflow for the message
    WorkflowStarted {
        message_id: Uuid,
        workflow_id: String,
    },

    /// A send/poll cycle reached a final state
    CycleEnded {
        message_id: Uuid,
        outcome: CycleOutcome,
    },

    /// The conversation was emptied
    Cleared,

    /// A user-visible error occurred
    Error { message: String },
}

impl ChatEvent {
    /// Check if this event ends a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::CycleEnded { .. })
    }
}
