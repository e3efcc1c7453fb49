//! The streaming reconciler.
//!
//! A single actor task owns the conversation. `submit`, `cancel` and `clear`
//! are commands on its queue, and every send/poll cycle runs in its own task
//! that reports content changes back through the same queue. Updates from a
//! cycle that is no longer active are dropped, so a cancel that races a flush
//! never rewrites the message.

use std::sync::Arc;
use std::time::Duration;

use shipwright_api::{ReleaseType, SendRequest, WorkflowApi, WorkflowState};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    conversation::{ChatMessage, Conversation},
    cursor::{NO_RESPONSE, PollCursor},
    error::{Error, Result},
    events::ChatEvent,
    handle::{CycleHandle, CycleOutcome},
};

/// Content shown when polling gives up before any text arrived
pub const POLL_FAILED: &str = "Failed to get a response from the workflow";

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Session id sent with every message
    pub session_id: String,
    /// Delay after a successful status request
    pub poll_interval: Duration,
    /// Delay after a failed status request
    pub error_backoff: Duration,
    /// Minimum time between two visible content updates
    pub flush_interval: Duration,
    /// Consecutive status failures before the cycle gives up
    pub max_consecutive_errors: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(3),
            flush_interval: Duration::from_millis(500),
            max_consecutive_errors: 5,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Optional release parameters sent along with a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseForm {
    /// Repository ids
    pub repositories: Vec<String>,
    pub release_type: Option<ReleaseType>,
    pub sprint_name: Option<String>,
    pub fix_version: Option<String>,
}

impl ReleaseForm {
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
            && self.release_type.is_none()
            && self.sprint_name.is_none()
            && self.fix_version.is_none()
    }
}

/// A chat message to send, with its release form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitRequest {
    pub text: String,
    pub form: ReleaseForm,
}

impl SubmitRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            form: ReleaseForm::default(),
        }
    }

    pub fn with_form(mut self, form: ReleaseForm) -> Self {
        self.form = form;
        self
    }
}

impl From<&str> for SubmitRequest {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SubmitRequest {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

enum Command {
    Submit {
        request: SubmitRequest,
        reply: oneshot::Sender<Option<CycleHandle>>,
    },
    Cancel,
    Clear,
    Snapshot {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    IsBusy {
        reply: oneshot::Sender<bool>,
    },
    Update {
        cycle: u64,
        message_id: Uuid,
        content: Option<String>,
        streaming: bool,
    },
    WorkflowStarted {
        cycle: u64,
        message_id: Uuid,
        workflow_id: String,
    },
    Finished {
        cycle: u64,
        message_id: Uuid,
        outcome: CycleOutcome,
        reply: oneshot::Sender<CycleOutcome>,
    },
}

/// Cloneable handle to a running reconciler.
///
/// The reconciler task stops once every handle is dropped and no cycle is
/// still running.
#[derive(Clone)]
pub struct Reconciler {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ChatEvent>,
    session_id: Arc<str>,
}

impl Reconciler {
    /// Start a reconciler on the current tokio runtime
    pub fn spawn(api: Arc<dyn WorkflowApi>, config: ReconcilerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let session_id: Arc<str> = Arc::from(config.session_id.as_str());

        let state = ReconcilerState {
            api,
            config: Arc::new(config),
            conversation: Conversation::default(),
            active: None,
            next_cycle: 0,
            commands: commands.downgrade(),
            events: events.clone(),
        };
        tokio::spawn(state.run(rx));

        Self {
            commands,
            events,
            session_id,
        }
    }

    /// Subscribe to reconciler events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a message and start reconciling its workflow.
    ///
    /// Returns `None` when the text is blank or another send is still in
    /// progress; the request is ignored in both cases.
    pub async fn submit(&self, request: impl Into<SubmitRequest>) -> Result<Option<CycleHandle>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            request: request.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Cancel the active cycle, if any. Idempotent.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Remove every message from the conversation.
    ///
    /// An active cycle keeps running; its later updates find no message to
    /// write to and are dropped.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    /// Snapshot of the conversation
    pub async fn messages(&self) -> Result<Vec<ChatMessage>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Whether a send/poll cycle is in progress
    pub async fn is_busy(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsBusy { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }
}

struct ActiveCycle {
    id: u64,
    message_id: Uuid,
    cancel: CancellationToken,
}

/// State owned by the reconciler task
struct ReconcilerState {
    api: Arc<dyn WorkflowApi>,
    config: Arc<ReconcilerConfig>,
    conversation: Conversation,
    active: Option<ActiveCycle>,
    next_cycle: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: broadcast::Sender<ChatEvent>,
}

impl ReconcilerState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Submit { request, reply } => {
                    let handle = self.submit(request);
                    let _ = reply.send(handle);
                }
                Command::Cancel => self.cancel(),
                Command::Clear => {
                    self.conversation.clear();
                    let _ = self.events.send(ChatEvent::Cleared);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.conversation.messages().to_vec());
                }
                Command::IsBusy { reply } => {
                    let _ = reply.send(self.is_busy());
                }
                Command::Update {
                    cycle,
                    message_id,
                    content,
                    streaming,
                } => self.update(cycle, message_id, content, streaming),
                Command::WorkflowStarted {
                    cycle,
                    message_id,
                    workflow_id,
                } => {
                    if self.accepts(cycle) {
                        let _ = self.events.send(ChatEvent::WorkflowStarted {
                            message_id,
                            workflow_id,
                        });
                    }
                }
                Command::Finished {
                    cycle,
                    message_id,
                    outcome,
                    reply,
                } => {
                    let outcome = self.finish(cycle, message_id, outcome);
                    let _ = reply.send(outcome);
                }
            }
        }
        tracing::debug!("Reconciler stopped");
    }

    fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|c| !c.cancel.is_cancelled())
    }

    /// Whether updates from `cycle` may still touch the conversation
    fn accepts(&self, cycle: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|c| c.id == cycle && !c.cancel.is_cancelled())
    }

    fn submit(&mut self, request: SubmitRequest) -> Option<CycleHandle> {
        if request.text.trim().is_empty() {
            tracing::debug!("Ignoring blank message");
            return None;
        }
        if self.is_busy() {
            tracing::debug!("Ignoring message: a send is already in progress");
            return None;
        }
        let commands = self.commands.upgrade()?;

        // A cycle cancelled through its own handle may still be winding down.
        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
        }

        let user = ChatMessage::user(request.text.clone());
        let placeholder = ChatMessage::placeholder();
        let message_id = placeholder.id;
        for message in [user, placeholder] {
            self.conversation.push(message.clone());
            let _ = self.events.send(ChatEvent::MessageAdded { message });
        }

        let SubmitRequest { text, form } = request;
        let send_request = SendRequest {
            message: text,
            session_id: self.config.session_id.clone(),
            repositories: form.repositories,
            release_type: form.release_type,
            sprint_name: form.sprint_name,
            fix_version: form.fix_version,
        };

        let id = self.next_cycle;
        self.next_cycle += 1;
        let cancel = CancellationToken::new();
        let cycle = Cycle {
            id,
            message_id,
            api: Arc::clone(&self.api),
            config: Arc::clone(&self.config),
            cancel: cancel.clone(),
            commands,
        };
        let task = tokio::spawn(cycle.run(send_request));

        tracing::info!("Started cycle {} for message {}", id, message_id);
        self.active = Some(ActiveCycle {
            id,
            message_id,
            cancel: cancel.clone(),
        });
        Some(CycleHandle::new(message_id, cancel, task))
    }

    fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(
                "Cancelling cycle {} for message {}",
                active.id,
                active.message_id
            );
            active.cancel.cancel();
        }
    }

    fn update(&mut self, cycle: u64, message_id: Uuid, content: Option<String>, streaming: bool) {
        if !self.accepts(cycle) {
            tracing::debug!("Dropping update from inactive cycle {}", cycle);
            return;
        }
        match self.conversation.update(message_id, content, streaming) {
            Some(message) => {
                let _ = self.events.send(ChatEvent::MessageUpdated {
                    message: message.clone(),
                });
            }
            None => tracing::debug!("Message {} no longer exists, dropping update", message_id),
        }
    }

    /// Settle the outcome of a cycle. A cycle cancelled before its result
    /// reached the actor ends as `Cancelled`, whatever it observed.
    fn finish(&mut self, cycle: u64, message_id: Uuid, outcome: CycleOutcome) -> CycleOutcome {
        let outcome = if self.accepts(cycle) {
            outcome
        } else {
            CycleOutcome::Cancelled
        };
        if self.active.as_ref().is_some_and(|c| c.id == cycle) {
            self.active = None;
        }

        tracing::info!("Cycle {} ended: {:?}", cycle, outcome);
        if let Some(message) = outcome.error_message() {
            let _ = self.events.send(ChatEvent::Error { message });
        }
        let _ = self.events.send(ChatEvent::CycleEnded {
            message_id,
            outcome: outcome.clone(),
        });
        outcome
    }
}

/// One send/poll cycle, running in its own task
struct Cycle {
    id: u64,
    message_id: Uuid,
    api: Arc<dyn WorkflowApi>,
    config: Arc<ReconcilerConfig>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

impl Cycle {
    /// Drive the cycle and return the outcome the actor settled on
    async fn run(self, request: SendRequest) -> CycleOutcome {
        let outcome = self.drive(request).await;
        let (reply, settled) = oneshot::channel();
        let sent = self.commands.send(Command::Finished {
            cycle: self.id,
            message_id: self.message_id,
            outcome: outcome.clone(),
            reply,
        });
        if sent.is_err() {
            return outcome;
        }
        settled.await.unwrap_or(outcome)
    }

    fn update(&self, content: String, streaming: bool) {
        let _ = self.commands.send(Command::Update {
            cycle: self.id,
            message_id: self.message_id,
            content: Some(content),
            streaming,
        });
    }

    async fn drive(&self, request: SendRequest) -> CycleOutcome {
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return CycleOutcome::Cancelled,
            response = self.api.start_workflow(&request) => response,
        };
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        match response {
            Err(e) => {
                tracing::warn!("Send failed: {}", e);
                self.update(format!("Error: {}", e), false);
                CycleOutcome::SendFailed {
                    error: e.to_string(),
                }
            }
            Ok(response) => match response.workflow_id() {
                Some(workflow_id) => {
                    let workflow_id = workflow_id.to_string();
                    tracing::info!("Workflow {} started", workflow_id);
                    let _ = self.commands.send(Command::WorkflowStarted {
                        cycle: self.id,
                        message_id: self.message_id,
                        workflow_id: workflow_id.clone(),
                    });
                    self.poll(workflow_id).await
                }
                None => {
                    let content = response
                        .message
                        .unwrap_or_else(|| NO_RESPONSE.to_string());
                    self.update(content, false);
                    CycleOutcome::Answered
                }
            },
        }
    }

    async fn poll(&self, workflow_id: String) -> CycleOutcome {
        let mut cursor = PollCursor::new(workflow_id.clone(), self.config.flush_interval);
        let max_errors = self.config.max_consecutive_errors.max(1);

        loop {
            if self.cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return CycleOutcome::Cancelled,
                result = self.api.workflow_status(&workflow_id) => result,
            };
            if self.cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }

            let delay = match result {
                Ok(status) => {
                    cursor.record_success();
                    let folded = cursor.fold(&status);
                    tracing::debug!(
                        "Workflow {}: {:?} running={} messages={} folded={}",
                        workflow_id,
                        status.status,
                        status.is_running,
                        status.messages.len(),
                        folded
                    );

                    if status.is_terminal() {
                        self.update(cursor.final_content(), false);
                        return if status.status == WorkflowState::Failed {
                            CycleOutcome::Failed { workflow_id }
                        } else {
                            CycleOutcome::Completed { workflow_id }
                        };
                    }

                    if let Some(content) = cursor.take_flush(Instant::now()) {
                        self.update(content, true);
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    let streak = cursor.record_error();
                    tracing::warn!(
                        "Polling workflow {} failed ({}/{}): {}",
                        workflow_id,
                        streak,
                        max_errors,
                        e
                    );
                    if streak >= max_errors {
                        let content = cursor
                            .partial_content()
                            .unwrap_or_else(|| POLL_FAILED.to_string());
                        self.update(content, false);
                        return CycleOutcome::RetriesExhausted {
                            workflow_id,
                            last_error: e.to_string(),
                        };
                    }
                    self.config.error_backoff
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return CycleOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shipwright_api::{
        Error as ApiError, SendData, SendResponse, WorkflowMessage, WorkflowStatus,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::conversation::Role;

    /// One scripted answer to a status request
    enum Step {
        Status(WorkflowStatus),
        /// Cancel through the reconciler, then answer with the status
        CancelThen(Reconciler, WorkflowStatus),
        Fail(u16),
        Hang,
    }

    /// A scripted workflow backend. Status requests past the end of the
    /// script never resolve.
    struct MockApi {
        sends: Mutex<VecDeque<std::result::Result<SendResponse, u16>>>,
        steps: Mutex<VecDeque<Step>>,
        requests: Mutex<Vec<SendRequest>>,
        status_calls: AtomicUsize,
    }

    impl MockApi {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                sends: Mutex::new(VecDeque::new()),
                steps: Mutex::new(steps.into()),
                requests: Mutex::new(Vec::new()),
                status_calls: AtomicUsize::new(0),
            })
        }

        fn with_sends(
            sends: Vec<std::result::Result<SendResponse, u16>>,
            steps: Vec<Step>,
        ) -> Arc<Self> {
            let api = Self::new(steps);
            *api.sends.lock() = sends.into();
            api
        }

        fn push_steps(&self, steps: Vec<Step>) {
            self.steps.lock().extend(steps);
        }

        fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkflowApi for MockApi {
        async fn start_workflow(&self, request: &SendRequest) -> shipwright_api::Result<SendResponse> {
            self.requests.lock().push(request.clone());
            let next = self.sends.lock().pop_front();
            match next {
                Some(Ok(response)) => Ok(response),
                Some(Err(code)) => Err(ApiError::status(code, "send failed")),
                None => Ok(started("wf-1")),
            }
        }

        async fn workflow_status(&self, _workflow_id: &str) -> shipwright_api::Result<WorkflowStatus> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().pop_front();
            match step {
                Some(Step::Status(status)) => Ok(status),
                Some(Step::CancelThen(reconciler, status)) => {
                    reconciler.cancel();
                    Ok(status)
                }
                Some(Step::Fail(code)) => Err(ApiError::status(code, "unavailable")),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
    }

    fn started(workflow_id: &str) -> SendResponse {
        SendResponse {
            data: Some(SendData {
                workflow_id: Some(workflow_id.to_string()),
            }),
            message: None,
        }
    }

    fn running(messages: Vec<WorkflowMessage>) -> Step {
        Step::Status(WorkflowStatus {
            messages,
            status: WorkflowState::Running,
            is_running: true,
        })
    }

    fn finished(state: WorkflowState, is_running: bool, messages: Vec<WorkflowMessage>) -> Step {
        Step::Status(WorkflowStatus {
            messages,
            status: state,
            is_running,
        })
    }

    fn spawn(api: Arc<MockApi>) -> Reconciler {
        Reconciler::spawn(api, ReconcilerConfig::default().with_session_id("session-test"))
    }

    async fn assistant(reconciler: &Reconciler, id: Uuid) -> ChatMessage {
        reconciler
            .messages()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == id)
            .expect("assistant message present")
    }

    async fn next_update(rx: &mut broadcast::Receiver<ChatEvent>) -> ChatMessage {
        loop {
            if let ChatEvent::MessageUpdated { message } = rx.recv().await.unwrap() {
                return message;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_appends_user_and_placeholder() {
        let api = MockApi::new(vec![running(vec![]), Step::Hang]);
        let reconciler = spawn(api.clone());

        let handle = reconciler.submit("cut release 1.4").await.unwrap().unwrap();
        let messages = reconciler.messages().await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "cut release 1.4");
        assert!(!messages[0].streaming);
        assert_eq!(messages[1].id, handle.message_id());
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.is_empty());
        assert!(messages[1].streaming);

        handle.cancel();
        assert_eq!(handle.join().await.unwrap(), CycleOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_carries_form_and_session() {
        let api = MockApi::new(vec![finished(WorkflowState::Completed, false, vec![])]);
        let reconciler = spawn(api.clone());

        let form = ReleaseForm {
            repositories: vec!["repo-1".into()],
            release_type: Some(ReleaseType::Hotfix),
            sprint_name: Some("Sprint 9".into()),
            fix_version: Some("3.1.4".into()),
        };
        let handle = reconciler
            .submit(SubmitRequest::new("ship it").with_form(form))
            .await
            .unwrap()
            .unwrap();
        handle.join().await.unwrap();

        let requests = api.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "ship it");
        assert_eq!(requests[0].session_id, "session-test");
        assert_eq!(requests[0].repositories, vec!["repo-1".to_string()]);
        assert_eq!(requests[0].release_type, Some(ReleaseType::Hotfix));
        assert_eq!(requests[0].sprint_name.as_deref(), Some("Sprint 9"));
        assert_eq!(requests[0].fix_version.as_deref(), Some("3.1.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_and_concurrent_submits_are_ignored() {
        let api = MockApi::new(vec![Step::Hang]);
        let reconciler = spawn(api);

        assert!(reconciler.submit("   ").await.unwrap().is_none());
        assert!(reconciler.messages().await.unwrap().is_empty());

        let first = reconciler.submit("first").await.unwrap().unwrap();
        assert!(reconciler.is_busy().await.unwrap());
        assert!(reconciler.submit("second").await.unwrap().is_none());
        assert_eq!(reconciler.messages().await.unwrap().len(), 2);

        reconciler.cancel();
        assert_eq!(first.join().await.unwrap(), CycleOutcome::Cancelled);
        assert!(!reconciler.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_without_workflow() {
        let api = MockApi::with_sends(
            vec![Ok(SendResponse {
                data: None,
                message: Some("Release calendar is empty.".into()),
            })],
            vec![],
        );
        let reconciler = spawn(api.clone());

        let handle = reconciler.submit("what's next?").await.unwrap().unwrap();
        let id = handle.message_id();
        assert_eq!(handle.join().await.unwrap(), CycleOutcome::Answered);

        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, "Release calendar is empty.");
        assert!(!message.streaming);
        assert_eq!(api.status_calls(), 0);
        assert!(!reconciler.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_reported() {
        let api = MockApi::with_sends(vec![Err(500)], vec![]);
        let reconciler = spawn(api);
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hello").await.unwrap().unwrap();
        let id = handle.message_id();
        let outcome = handle.join().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::SendFailed { .. }));

        let message = assistant(&reconciler, id).await;
        assert!(message.content.starts_with("Error: "));
        assert!(!message.streaming);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::Error { message } = event {
                assert!(message.starts_with("Failed to send message"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_response_flushes_and_keeps_polling() {
        let api = MockApi::new(vec![
            running(vec![WorkflowMessage::ai("Hello")]),
            Step::Hang,
        ]);
        let reconciler = spawn(api.clone());
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let update = next_update(&mut events).await;
        assert_eq!(update.id, handle.message_id());
        assert_eq!(update.content, "Hello");
        assert!(update.streaming);

        // Poll interval passes, the loop asks again
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(api.status_calls(), 2);
        assert!(reconciler.is_busy().await.unwrap());

        handle.cancel();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_workflow_folds_and_finishes() {
        let api = MockApi::new(vec![
            running(vec![WorkflowMessage::ai("Checking repositories")]),
            finished(
                WorkflowState::Completed,
                false,
                vec![
                    WorkflowMessage::ai("Checking repositories"),
                    WorkflowMessage::tool(r#"{"error":"not found"}"#),
                    WorkflowMessage::ai("Done."),
                ],
            ),
        ]);
        let reconciler = spawn(api);
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("release billing").await.unwrap().unwrap();
        let id = handle.message_id();
        assert_eq!(
            handle.join().await.unwrap(),
            CycleOutcome::Completed {
                workflow_id: "wf-1".into()
            }
        );

        let message = assistant(&reconciler, id).await;
        assert_eq!(
            message.content,
            "Checking repositories\n\nError: not found\n\nDone."
        );
        assert!(!message.streaming);

        let mut saw_started = false;
        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ChatEvent::WorkflowStarted { workflow_id, .. } => {
                    assert_eq!(workflow_id, "wf-1");
                    saw_started = true;
                }
                ChatEvent::CycleEnded { message_id, .. } => {
                    assert_eq!(message_id, id);
                    saw_end = true;
                }
                ChatEvent::Error { .. } => panic!("unexpected error event"),
                _ => {}
            }
        }
        assert!(saw_started && saw_end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_workflow_without_content() {
        let api = MockApi::new(vec![finished(WorkflowState::Failed, false, vec![])]);
        let reconciler = spawn(api);

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let id = handle.message_id();
        assert_eq!(
            handle.join().await.unwrap(),
            CycleOutcome::Failed {
                workflow_id: "wf-1".into()
            }
        );

        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, "No response received");
        assert!(!message.streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_while_running_does_not_terminate() {
        let api = MockApi::new(vec![
            finished(WorkflowState::Completed, true, vec![WorkflowMessage::ai("step 1")]),
            finished(WorkflowState::Completed, true, vec![WorkflowMessage::ai("step 1")]),
            finished(
                WorkflowState::Completed,
                false,
                vec![WorkflowMessage::ai("step 1"), WorkflowMessage::ai("step 2")],
            ),
        ]);
        let reconciler = spawn(api.clone());

        let handle = reconciler.submit("go").await.unwrap().unwrap();
        let id = handle.message_id();
        let started = Instant::now();
        let outcome = handle.join().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert_eq!(api.status_calls(), 3);
        // Two poll intervals between three requests
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_millis(4100));

        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, "step 1\n\nstep 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_response_does_not_duplicate() {
        let same = || running(vec![WorkflowMessage::ai("Hello")]);
        let api = MockApi::new(vec![
            same(),
            same(),
            same(),
            finished(WorkflowState::Completed, false, vec![WorkflowMessage::ai("Hello")]),
        ]);
        let reconciler = spawn(api);

        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let id = handle.message_id();
        handle.join().await.unwrap();

        assert_eq!(assistant(&reconciler, id).await.content, "Hello");

        // Polls that bring nothing new do not touch the message
        let mut streaming_updates = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ChatEvent::MessageUpdated { ref message } if message.streaming) {
                streaming_updates += 1;
            }
        }
        assert_eq!(streaming_updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_racing_final_status_settles_as_cancelled() {
        let api = MockApi::new(vec![]);
        let reconciler = spawn(api.clone());
        api.push_steps(vec![Step::CancelThen(
            reconciler.clone(),
            WorkflowStatus {
                messages: vec![WorkflowMessage::ai("done")],
                status: WorkflowState::Completed,
                is_running: false,
            },
        )]);
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("ship it").await.unwrap().unwrap();
        let id = handle.message_id();
        assert_eq!(handle.join().await.unwrap(), CycleOutcome::Cancelled);

        let message = assistant(&reconciler, id).await;
        assert!(message.content.is_empty());
        assert!(message.streaming);

        let mut ended = None;
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::CycleEnded { outcome, .. } = event {
                ended = Some(outcome);
            }
        }
        assert_eq!(ended, Some(CycleOutcome::Cancelled));
        assert!(!reconciler.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_updates_are_throttled() {
        // A new message on every poll, polled faster than the flush window
        let mut steps = Vec::new();
        let mut log = Vec::new();
        for i in 0..12 {
            log.push(WorkflowMessage::ai(format!("line {}", i)));
            steps.push(running(log.clone()));
        }
        steps.push(finished(WorkflowState::Completed, false, log.clone()));

        let api = MockApi::new(steps);
        let config = ReconcilerConfig {
            poll_interval: Duration::from_millis(100),
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::spawn(api, config);
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("stream").await.unwrap().unwrap();
        let id = handle.message_id();

        let mut flush_times = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ChatEvent::MessageUpdated { message } if message.streaming => {
                    flush_times.push(Instant::now());
                }
                ChatEvent::CycleEnded { .. } => break,
                _ => {}
            }
        }

        assert!(flush_times.len() >= 2, "expected several flushes");
        assert!(flush_times.len() < 12, "updates were not throttled");
        for pair in flush_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }

        // Nothing was lost by throttling
        let expected: Vec<String> = (0..12).map(|i| format!("line {}", i)).collect();
        assert_eq!(assistant(&reconciler, id).await.content, expected.join("\n\n"));
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_errors_exhaust_retries() {
        let api = MockApi::new(vec![
            running(vec![WorkflowMessage::ai("partial answer")]),
            Step::Fail(502),
            Step::Fail(502),
            Step::Fail(503),
            Step::Fail(500),
            Step::Fail(504),
        ]);
        let reconciler = spawn(api.clone());
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let id = handle.message_id();
        let started = Instant::now();
        let outcome = handle.join().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::RetriesExhausted { .. }));
        assert_eq!(api.status_calls(), 6);
        // One poll interval, then four error backoffs
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_millis(14100));

        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, "partial answer");
        assert!(!message.streaming);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ChatEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_content_uses_placeholder() {
        let api = MockApi::new((0..5).map(|_| Step::Fail(500)).collect());
        let reconciler = spawn(api);

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let id = handle.message_id();
        handle.join().await.unwrap();

        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, POLL_FAILED);
        assert!(!message.streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_error_streak() {
        let mut steps: Vec<Step> = (0..4).map(|_| Step::Fail(500)).collect();
        steps.push(running(vec![]));
        steps.extend((0..4).map(|_| Step::Fail(500)));
        steps.push(finished(WorkflowState::Completed, false, vec![WorkflowMessage::ai("ok")]));
        let api = MockApi::new(steps);
        let reconciler = spawn(api.clone());

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let outcome = handle.join().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert_eq!(api.status_calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_message_streaming() {
        let api = MockApi::new(vec![
            running(vec![WorkflowMessage::ai("Hello")]),
            Step::Hang,
        ]);
        let reconciler = spawn(api.clone());
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        let id = handle.message_id();
        next_update(&mut events).await;

        // Later responses must never reach the message
        api.push_steps(vec![finished(
            WorkflowState::Completed,
            false,
            vec![WorkflowMessage::ai("Hello"), WorkflowMessage::ai("late")],
        )]);
        reconciler.cancel();
        reconciler.cancel();

        assert_eq!(handle.join().await.unwrap(), CycleOutcome::Cancelled);
        let message = assistant(&reconciler, id).await;
        assert_eq!(message.content, "Hello");
        assert!(message.streaming);
        assert!(!reconciler.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_is_noop() {
        let api = MockApi::new(vec![]);
        let reconciler = spawn(api);
        reconciler.cancel();
        assert!(!reconciler.is_busy().await.unwrap());
        assert!(reconciler.messages().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_submit_after_handle_cancel() {
        let api = MockApi::new(vec![]);
        let reconciler = spawn(api.clone());

        let first = reconciler.submit("first").await.unwrap().unwrap();
        first.cancel();
        assert!(!reconciler.is_busy().await.unwrap());

        api.push_steps(vec![finished(
            WorkflowState::Completed,
            false,
            vec![WorkflowMessage::ai("second answer")],
        )]);
        let second = reconciler.submit("second").await.unwrap().unwrap();
        assert_eq!(first.join().await.unwrap(), CycleOutcome::Cancelled);
        let id = second.message_id();
        second.join().await.unwrap();

        assert_eq!(reconciler.messages().await.unwrap().len(), 4);
        assert_eq!(assistant(&reconciler, id).await.content, "second answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_poll_does_not_resurrect() {
        let api = MockApi::new(vec![
            running(vec![WorkflowMessage::ai("Hello")]),
            finished(
                WorkflowState::Completed,
                false,
                vec![WorkflowMessage::ai("Hello"), WorkflowMessage::ai("World")],
            ),
        ]);
        let reconciler = spawn(api);
        let mut events = reconciler.subscribe();

        let handle = reconciler.submit("hi").await.unwrap().unwrap();
        next_update(&mut events).await;
        reconciler.clear();

        assert!(matches!(
            handle.join().await.unwrap(),
            CycleOutcome::Completed { .. }
        ));
        assert!(reconciler.messages().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciler_usable_after_failure() {
        let api = MockApi::new((0..5).map(|_| Step::Fail(500)).collect());
        let reconciler = spawn(api.clone());

        let first = reconciler.submit("one").await.unwrap().unwrap();
        first.join().await.unwrap();

        api.push_steps(vec![finished(WorkflowState::Completed, false, vec![WorkflowMessage::ai("two")])]);
        let second = reconciler.submit("two").await.unwrap().unwrap();
        assert!(matches!(
            second.join().await.unwrap(),
            CycleOutcome::Completed { .. }
        ));
    }
}
