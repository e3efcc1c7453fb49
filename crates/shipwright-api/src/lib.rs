//! shipwright-api: Typed client for the release workflow backend
//!
//! This crate provides the wire types of the chat/workflow endpoints, the
//! [`WorkflowApi`] trait the reconciler polls through, and a reqwest-backed
//! [`HttpClient`] that also talks to the repository directory and approval
//! services.

pub mod approvals;
pub mod client;
pub mod error;
pub mod repositories;
pub mod types;

pub use client::{Endpoints, HttpClient, WorkflowApi};
pub use error::{Error, Result};
pub use types::*;
