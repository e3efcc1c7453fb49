//! Incremental consumption of a workflow's message log.
//!
//! A [`PollCursor`] remembers how many workflow messages it has already
//! seen, accumulates the text of the ones worth showing, and decides when the
//! accumulated text may be flushed to the visible message.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use shipwright_api::{MessageKind, WorkflowMessage, WorkflowStatus};
use tokio::time::Instant;

/// Content shown when a workflow ends without producing any text
pub const NO_RESPONSE: &str = "No response received";

/// Content shown for tool output that reports a missing resource
pub const RESOURCE_NOT_FOUND: &str = "Resource not found";

/// Separator appended after every folded message
const SEPARATOR: &str = "\n\n";

/// Plain-text tool outputs that mean "not found". Anchored so that long
/// outputs merely mentioning the phrase are passed through untouched.
static NOT_FOUND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "404", "404 Not Found", "404: no such repo"
        r"(?i)^\s*404\b",
        // "Not found", "not_found", "Error: Not Found."
        r"(?i)^\s*(error:\s*)?not[\s_-]?found\.?\s*$",
        // "Repository not found", "Branch release/1.2 not found."
        r"(?i)^\s*[\w./-][\w\s./-]{0,60}\bnot found\.?\s*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Position and buffered text of one workflow being polled
#[derive(Debug)]
pub struct PollCursor {
    workflow_id: String,
    processed_count: usize,
    accumulated: String,
    last_flush: Option<Instant>,
    /// Length of `accumulated` at the last flush
    flushed_len: usize,
    consecutive_errors: u32,
    flush_interval: Duration,
}

impl PollCursor {
    pub fn new(workflow_id: impl Into<String>, flush_interval: Duration) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            processed_count: 0,
            accumulated: String::new(),
            last_flush: None,
            flushed_len: 0,
            consecutive_errors: 0,
            flush_interval,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Number of workflow messages already consumed
    pub fn processed_count(&self) -> usize {
        self.processed_count
    }

    /// Everything folded so far, separators included
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Count a failed status request; returns the new streak length.
    pub fn record_error(&mut self) -> u32 {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.consecutive_errors
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Fold every not-yet-seen message of `status` into the accumulator.
    ///
    /// Returns how many messages contributed text. The cursor advances past
    /// all messages in the response, including the ones that were skipped.
    pub fn fold(&mut self, status: &WorkflowStatus) -> usize {
        let mut folded = 0;
        for message in status.messages.iter().skip(self.processed_count) {
            if let Some(text) = fold_text(message) {
                self.accumulated.push_str(&text);
                self.accumulated.push_str(SEPARATOR);
                folded += 1;
            }
        }
        self.processed_count = self.processed_count.max(status.messages.len());
        folded
    }

    /// Content to show now, if the throttle window allows it.
    ///
    /// Nothing is returned while nothing was folded since the previous flush
    /// or less than the flush interval has passed since it.
    pub fn take_flush(&mut self, now: Instant) -> Option<String> {
        if self.accumulated.len() == self.flushed_len {
            return None;
        }
        if let Some(last) = self.last_flush {
            if now.saturating_duration_since(last) < self.flush_interval {
                return None;
            }
        }
        self.last_flush = Some(now);
        self.flushed_len = self.accumulated.len();
        Some(self.accumulated.trim().to_string())
    }

    /// Trimmed accumulated text, if there is any
    pub fn partial_content(&self) -> Option<String> {
        let trimmed = self.accumulated.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Content for a workflow that reached a terminal state
    pub fn final_content(&self) -> String {
        self.partial_content()
            .unwrap_or_else(|| NO_RESPONSE.to_string())
    }
}

fn fold_text(message: &WorkflowMessage) -> Option<String> {
    match message.kind {
        MessageKind::Ai => message.text().map(str::to_string),
        MessageKind::Tool => message.text().map(render_tool_content),
        MessageKind::Other => None,
    }
}

/// Render a tool message for display.
///
/// JSON with an `error` field becomes `Error: <error>`; not-found results
/// collapse to [`RESOURCE_NOT_FOUND`]; everything else passes through.
pub fn render_tool_content(content: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let error = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return format!("Error: {}", error);
        }
        if is_not_found_value(&value) {
            return RESOURCE_NOT_FOUND.to_string();
        }
        return content.to_string();
    }

    if NOT_FOUND_PATTERNS.iter().any(|re| re.is_match(content)) {
        return RESOURCE_NOT_FOUND.to_string();
    }
    content.to_string()
}

fn is_not_found_value(value: &Value) -> bool {
    ["status", "status_code", "code"].iter().any(|key| {
        value
            .get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            == Some(404)
    })
}
