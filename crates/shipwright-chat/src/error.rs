//! Error types for shipwright-chat

use thiserror::Error;

/// Result type alias using shipwright-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the workflow API layer
    #[error(transparent)]
    Api(#[from] shipwright_api::Error),

    /// The reconciler task has shut down
    #[error("Reconciler is no longer running")]
    Closed,

    /// A send/poll cycle task ended abnormally
    #[error("Cycle task failed: {0}")]
    Cycle(String),
}
