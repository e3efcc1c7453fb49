//! shipwright-chat: Streaming reconciler for workflow-backed chat
//!
//! This crate turns the polled message log of a backend workflow into a
//! single streaming assistant message, with throttled updates, bounded
//! retries and per-send cancellation.

pub mod conversation;
pub mod cursor;
pub mod error;
pub mod events;
pub mod handle;
pub mod reconciler;

pub use conversation::{ChatMessage, Conversation, Role};
pub use cursor::PollCursor;
pub use error::Error;
pub use events::ChatEvent;
pub use handle::{CycleHandle, CycleOutcome};
pub use reconciler::{Reconciler, ReconcilerConfig, ReleaseForm, SubmitRequest};
