//! Session Lifecycle Controller
//!
//! Owns the handlers of one session and feeds them events. Every event runs
//! in its own task so a handler waiting on provider I/O never stalls delivery
//! of the next event. Terminal events (dial-in error, call state `left`,
//! participant left, `terminate_call`) all funnel into
//! [`SessionState::teardown`], which acts once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

use super::bootstrap::CallConfig;
use super::dialin::DialInHandler;
use super::dialout::{DialOutAttemptState, DialOutHandler, DialoutRouter, DEFAULT_MAX_ATTEMPTS};
use super::pipeline::{PipelineHandle, SessionState, TeardownReason, Turn};
use super::policy::{self, ConversationContext, ConversationPolicy, VoicemailProfile};
use super::transport::{CallLegId, CallState, CallTransport, SessionEvent};
use super::{Result, SessionError};

/// How long in-flight handlers and dial-out work may finish after teardown
/// before they are abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Knobs that come from process configuration rather than the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_dialout_attempts: u32,
    pub record_calls: bool,
    pub voicemail: VoicemailProfile,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_dialout_attempts: DEFAULT_MAX_ATTEMPTS,
            record_calls: true,
            voicemail: VoicemailProfile::default(),
        }
    }
}

/// Final view of a session, for logs and the replay command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub policy: ConversationPolicy,
    pub teardown: Option<TeardownReason>,
    pub dialouts: Vec<DialOutAttemptState>,
}

struct Inner {
    config: CallConfig,
    policy: ConversationPolicy,
    context: ConversationContext,
    state: Arc<SessionState>,
    dialin: Option<DialInHandler>,
    dialouts: Vec<Arc<DialOutHandler>>,
    router: DialoutRouter,
    /// Dial-out dispatches running outside any single event.
    background: TaskTracker,
    fatal: Mutex<Option<SessionError>>,
}

/// One unit of work for a dial-out target.
enum Step {
    /// First dispatch; already announced to the router.
    Start,
    /// The provider reported `leg` failed.
    Retry { leg: CallLegId, data: Value },
    Deliver(SessionEvent),
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        config: CallConfig,
        options: SessionOptions,
        transport: Arc<dyn CallTransport>,
        pipeline: Arc<dyn PipelineHandle>,
    ) -> Self {
        let policy = ConversationPolicy::select(&config);
        let context = policy.context(&options.voicemail);
        tracing::info!(
            ?policy,
            dialin = config.is_dialin(),
            dialout_targets = config.dialout_targets.len(),
            "session configured"
        );

        let state = Arc::new(SessionState::new(pipeline, transport));
        let dialin = config
            .dialin_settings
            .as_ref()
            .map(|_| DialInHandler::new(state.clone(), context.clone(), options.record_calls));
        // One handler per destination so retries are tracked per number.
        let dialouts = config
            .dialout_targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                Arc::new(DialOutHandler::new(
                    index,
                    state.clone(),
                    target.clone(),
                    options.max_dialout_attempts,
                ))
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                context,
                state,
                dialin,
                dialouts,
                router: DialoutRouter::new(),
                background: TaskTracker::new(),
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Normalize a raw session body and build its controller.
    pub fn from_body(
        body: &Value,
        options: SessionOptions,
        transport: Arc<dyn CallTransport>,
        pipeline: Arc<dyn PipelineHandle>,
    ) -> Self {
        Self::new(super::bootstrap::normalize(body), options, transport, pipeline)
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> ConversationPolicy {
        self.inner.policy
    }

    pub fn context(&self) -> &ConversationContext {
        &self.inner.context
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.inner.state
    }

    pub async fn dialout_states(&self) -> Vec<DialOutAttemptState> {
        let mut states = Vec::with_capacity(self.inner.dialouts.len());
        for handler in &self.inner.dialouts {
            states.push(handler.snapshot().await);
        }
        states
    }

    pub async fn report(&self) -> SessionReport {
        SessionReport {
            policy: self.inner.policy,
            teardown: self.inner.state.teardown_reason(),
            dialouts: self.dialout_states().await,
        }
    }

    /// Handle one event to completion.
    pub async fn handle(&self, event: SessionEvent) -> Result<()> {
        self.inner.handle(event).await
    }

    /// Consume events until the session is torn down or the stream ends.
    ///
    /// A handler failure tears the session down and is returned here so the
    /// host can record it.
    pub async fn run(&self, mut events: mpsc::Receiver<SessionEvent>) -> Result<SessionReport> {
        let done = self.inner.state.done();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.inner.settle(joined).await;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        tracing::debug!(event = event.kind(), "session event");
                        let inner = self.inner.clone();
                        tasks.spawn(async move { inner.handle(event).await });
                    }
                    None => {
                        tracing::info!("event stream closed");
                        self.inner.state.teardown(TeardownReason::EventStreamClosed).await;
                        break;
                    }
                },
            }
        }

        // Let handlers that raced teardown report their outcome.
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = tasks.join_next().await {
                self.inner.settle(joined).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(pending = tasks.len(), "aborting handlers still running after teardown");
            tasks.shutdown().await;
        }

        // Dispatches check for teardown before dialing, so only requests
        // already sent to the provider can still be running here.
        let background = &self.inner.background;
        background.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, background.wait()).await.is_err() {
            tracing::warn!(pending = background.len(), "dial-out work still running after teardown");
        }

        let report = self.report().await;
        tracing::info!(teardown = ?report.teardown, "session finished");
        match self.inner.fatal.lock().take() {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }
}

impl Inner {
    async fn handle(self: &Arc<Self>, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::DialinReady { data } => self.with_dialin(|h| h.on_ready(&data)),
            SessionEvent::DialinConnected { data } => self.with_dialin(|h| h.on_connected(&data)),
            SessionEvent::DialinStopped { data } => self.with_dialin(|h| h.on_stopped(&data)),
            SessionEvent::DialinWarning { data } => self.with_dialin(|h| h.on_warning(&data)),
            SessionEvent::DialinError { data } => match &self.dialin {
                Some(dialin) => dialin.on_error(&data).await?,
                None => tracing::warn!(%data, "dial-in error on a session without dial-in"),
            },
            SessionEvent::FirstParticipantJoined { participant } => match &self.dialin {
                Some(dialin) => dialin.on_first_participant_joined(&participant).await?,
                None => tracing::info!(participant = %participant.id, "first participant joined"),
            },
            event @ (SessionEvent::DialoutConnected { .. }
            | SessionEvent::DialoutAnswered { .. }
            | SessionEvent::DialoutStopped { .. }
            | SessionEvent::DialoutWarning { .. }
            | SessionEvent::DialoutError { .. }) => self.on_dialout_event(event).await,
            SessionEvent::CallStateUpdated { state } => {
                tracing::info!(?state, "call state updated");
                match state {
                    CallState::Joined => self.start_dialouts(),
                    CallState::Left => {
                        self.state.teardown(TeardownReason::CallLeft).await;
                    }
                    _ => {}
                }
            }
            SessionEvent::Joined { data } => {
                let session_id = data.pointer("/meetingSession/id").and_then(Value::as_str);
                let bot_id = data.pointer("/participants/local/id").and_then(Value::as_str);
                tracing::info!(?session_id, ?bot_id, "bot joined room");
            }
            SessionEvent::ParticipantLeft { participant, reason } => {
                tracing::debug!(participant = %participant.id, ?reason, "participant left");
                self.state.teardown(TeardownReason::ParticipantLeft).await;
            }
            SessionEvent::FunctionCall { name, tool_call_id } => {
                self.on_function_call(&name, tool_call_id).await?;
            }
        }
        Ok(())
    }

    fn with_dialin(&self, f: impl FnOnce(&DialInHandler)) {
        match &self.dialin {
            Some(dialin) => f(dialin),
            None => tracing::debug!("dial-in event on a session without dial-in"),
        }
    }

    async fn on_dialout_event(&self, event: SessionEvent) {
        let Some(leg) = event.dialout_leg().map(str::to_string) else {
            return;
        };
        if let Some((handler, event)) = self.router.route_or_park(&leg, event) {
            self.drive(handler, Step::Deliver(event)).await;
        }
    }

    /// Fire off every dial-out target independently; joining the room does
    /// not wait on any of them.
    fn start_dialouts(self: &Arc<Self>) {
        if self.dialouts.is_empty() {
            return;
        }
        tracing::info!(targets = self.dialouts.len(), "starting dial-outs");
        for handler in &self.dialouts {
            // Announce before spawning so events racing the dispatch are kept.
            self.router.begin_dispatch();
            let inner = self.clone();
            let handler = handler.clone();
            self.background.spawn(async move { inner.drive(handler, Step::Start).await });
        }
    }

    /// Run `first` for `handler`, then everything it leads to: events that
    /// arrived for a leg before its dispatch returned, and the retries those
    /// events trigger.
    async fn drive(&self, handler: Arc<DialOutHandler>, first: Step) {
        let mut steps = VecDeque::from([first]);
        while let Some(step) = steps.pop_front() {
            match step {
                Step::Start => {
                    let leg = handler.start().await;
                    let early = self.router.finish_dispatch(leg, &handler);
                    steps.extend(early.into_iter().map(Step::Deliver));
                }
                Step::Retry { leg, data } => {
                    self.router.release(&leg);
                    self.router.begin_dispatch();
                    let retry_leg = handler.on_error(&data).await;
                    let early = self.router.finish_dispatch(retry_leg, &handler);
                    steps.extend(early.into_iter().map(Step::Deliver));
                }
                Step::Deliver(event) => {
                    if let Some(retry) = deliver(&handler, event).await {
                        steps.push_back(retry);
                    }
                }
            }
        }
    }

    /// The model asked to hang up: answer the tool call so the farewell is
    /// spoken, then end the task once it has played.
    async fn on_function_call(&self, name: &str, tool_call_id: Option<String>) -> Result<()> {
        if name != policy::TERMINATE_CALL {
            tracing::warn!(function = name, "unknown function call ignored");
            return Ok(());
        }
        tracing::info!(?tool_call_id, "terminate_call requested");
        if self.state.is_cancelled() {
            return Ok(());
        }
        self.state
            .pipeline()
            .queue_turn(Turn::ToolResult {
                tool_call_id,
                content: policy::terminate_call_result(),
            })
            .await?;
        self.state.teardown(TeardownReason::Completed).await;
        Ok(())
    }

    /// Record the outcome of a finished handler task.
    async fn settle(&self, joined: std::result::Result<Result<()>, tokio::task::JoinError>) {
        let error = match joined {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(join_error) if join_error.is_cancelled() => return,
            Err(join_error) => SessionError::Handler(join_error.to_string()),
        };
        tracing::error!(error = %error, "session handler failed");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.state.teardown(TeardownReason::Fatal).await;
    }
}

/// Hand a dial-out event to its handler. Errors come back as a retry step.
async fn deliver(handler: &DialOutHandler, event: SessionEvent) -> Option<Step> {
    match event {
        SessionEvent::DialoutConnected { data, .. } => handler.on_connected(&data).await,
        SessionEvent::DialoutAnswered { session_id, data } => {
            handler.on_answered(&session_id, &data).await
        }
        SessionEvent::DialoutStopped { data, .. } => handler.on_stopped(&data).await,
        SessionEvent::DialoutWarning { data, .. } => handler.on_warning(&data),
        SessionEvent::DialoutError { session_id, data } => {
            return Some(Step::Retry {
                leg: session_id,
                data,
            })
        }
        other => tracing::debug!(event = other.kind(), "not a dial-out event"),
    }
    None
}
