//! Per-send handle for cancelling or awaiting one send/poll cycle.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// How a send/poll cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The backend answered directly without starting a workflow
    Answered,
    /// The workflow finished with status `completed`
    Completed { workflow_id: String },
    /// The workflow finished with status `failed`
    Failed { workflow_id: String },
    /// Polling gave up after too many consecutive transport errors
    RetriesExhausted {
        workflow_id: String,
        last_error: String,
    },
    /// The initial send request failed
    SendFailed { error: String },
    /// The cycle was cancelled; the message keeps its last streamed state
    Cancelled,
}

impl CycleOutcome {
    /// Whether the outcome should be surfaced as an error
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CycleOutcome::RetriesExhausted { .. } | CycleOutcome::SendFailed { .. }
        )
    }

    /// Text for the error observer, if the outcome is an error
    pub fn error_message(&self) -> Option<String> {
        match self {
            CycleOutcome::RetriesExhausted {
                workflow_id,
                last_error,
            } => Some(format!(
                "Gave up polling workflow {}: {}",
                workflow_id, last_error
            )),
            CycleOutcome::SendFailed { error } => Some(format!("Failed to send message: {}", error)),
            _ => None,
        }
    }
}

/// Handle to one in-flight send/poll cycle.
///
/// Dropping the handle detaches from the cycle; it keeps running until it
/// reaches a final state or is cancelled through the reconciler.
#[derive(Debug)]
pub struct CycleHandle {
    message_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<CycleOutcome>,
}

impl CycleHandle {
    pub(crate) fn new(message_id: Uuid, cancel: CancellationToken, task: JoinHandle<CycleOutcome>) -> Self {
        Self {
            message_id,
            cancel,
            task,
        }
    }

    /// Id of the assistant message this cycle streams into
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Cancel this cycle. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the cycle to reach a final state.
    ///
    /// The outcome is the one the reconciler settled on, so it always agrees
    /// with the `CycleEnded` event for this cycle.
    pub async fn join(self) -> Result<CycleOutcome> {
        self.task.await.map_err(|e| Error::Cycle(e.to_string()))
    }
}
