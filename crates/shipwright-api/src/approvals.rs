//! Human approval endpoints

use crate::{
    client::HttpClient,
    error::Result,
    types::{ApprovalDecision, ApprovalStatus},
};

impl HttpClient {
    /// Fetch the approval state of a workflow
    pub async fn approval_status(&self, workflow_id: &str) -> Result<ApprovalStatus> {
        let url = self
            .endpoints()
            .url_with_segment(&self.endpoints().approvals_path, Some(workflow_id))?;
        let status: Option<ApprovalStatus> = self.get_json(url).await?;
        Ok(status.unwrap_or_else(|| ApprovalStatus {
            workflow_id: workflow_id.to_string(),
            ..Default::default()
        }))
    }

    /// Approve or reject the pending step of a workflow
    pub async fn submit_decision(&self, workflow_id: &str, decision: &ApprovalDecision) -> Result<()> {
        let url = self
            .endpoints()
            .url_with_segment(&self.endpoints().approvals_path, Some(workflow_id))?;
        tracing::info!(
            "Submitting {} for workflow {}",
            if decision.approved { "approval" } else { "rejection" },
            workflow_id
        );
        // The response body carries nothing we need; only the status counts.
        self.post(url, decision).await
    }
}
