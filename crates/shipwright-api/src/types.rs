//! Wire types for the workflow, repository and approval endpoints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of release the workflow should cut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Release,
    Hotfix,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Release => "release",
            ReleaseType::Hotfix => "hotfix",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "release" => Ok(ReleaseType::Release),
            "hotfix" => Ok(ReleaseType::Hotfix),
            other => Err(format!("unknown release type '{}' (expected release or hotfix)", other)),
        }
    }
}

/// Body of the request that starts a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub message: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_type: Option<ReleaseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_version: Option<String>,
}

/// Response to a send request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub data: Option<SendData>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SendResponse {
    /// The workflow started by this request, if any
    pub fn workflow_id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.workflow_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendData {
    #[serde(default)]
    pub workflow_id: Option<String>,
}

/// Lifecycle state reported by the workflow engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Running,
    Completed,
    Failed,
    /// Anything the engine reports that the client does not act on
    #[default]
    #[serde(other)]
    Other,
}

/// Origin of an event in the workflow's message log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "AIMessage")]
    Ai,
    #[serde(rename = "ToolMessage")]
    Tool,
    #[default]
    #[serde(other)]
    Other,
}

/// One entry of the workflow's message log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMessage {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
}

impl WorkflowMessage {
    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Ai,
            content: Some(content.into()),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Tool,
            content: Some(content.into()),
        }
    }

    /// Content, if present and non-empty
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

/// Status snapshot of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    #[serde(default)]
    pub messages: Vec<WorkflowMessage>,
    #[serde(default)]
    pub status: WorkflowState,
    #[serde(default)]
    pub is_running: bool,
}

impl WorkflowStatus {
    /// Terminal only when the engine reports a final state *and* has stopped
    /// running; a `completed` workflow that is still running may resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, WorkflowState::Completed | WorkflowState::Failed) && !self.is_running
    }
}

/// Entry in the repository directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Approval state of a workflow waiting on a human
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// A human decision on a pending approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
