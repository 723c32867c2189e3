//! Pipeline handle and shared session state
//!
//! The media/LLM/TTS pipeline is external. The orchestrator only queues turns
//! into it and stops it. [`SessionState`] is the one value shared by every
//! handler in a session; it owns the teardown transition, which happens at
//! most once no matter how many events race to trigger it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::policy::ConversationContext;
use super::transport::CallTransport;

/// Errors reported by the pipeline task.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline already stopped")]
    Stopped,

    #[error("failed to queue turn: {0}")]
    Queue(String),

    #[error("pipeline error: {0}")]
    Other(String),
}

/// A unit of work pushed into the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// Run the LLM over the full context; used to make the bot speak first.
    Context(ConversationContext),
    /// Answer a tool call made by the model; the model speaks from it.
    ToolResult {
        tool_call_id: Option<String>,
        content: String,
    },
}

/// Handle to the session's running pipeline task.
#[async_trait]
pub trait PipelineHandle: Send + Sync {
    async fn queue_turn(&self, turn: Turn) -> Result<(), PipelineError>;

    /// Finish after already-queued output has played.
    async fn end_task(&self) -> Result<(), PipelineError>;

    /// Stop immediately, dropping queued output.
    async fn cancel(&self) -> Result<(), PipelineError>;
}

/// Why the session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    DialinError,
    CallLeft,
    ParticipantLeft,
    /// The conversational policy called `terminate_call`.
    Completed,
    /// The provider stopped delivering events.
    EventStreamClosed,
    /// An unexpected error escaped a handler.
    Fatal,
}

impl TeardownReason {
    /// Completed sessions drain their farewell line; everything else stops now.
    fn drains(self) -> bool {
        matches!(self, TeardownReason::Completed)
    }
}

/// Per-session state shared by the dial-in handler, every dial-out handler
/// and the lifecycle controller.
pub struct SessionState {
    pipeline: Arc<dyn PipelineHandle>,
    transport: Arc<dyn CallTransport>,
    cancelled: AtomicBool,
    recording: AtomicBool,
    reason: Mutex<Option<TeardownReason>>,
    done: CancellationToken,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("cancelled", &self.is_cancelled())
            .field("recording", &self.recording.load(Ordering::Acquire))
            .field("reason", &*self.reason.lock())
            .finish()
    }
}

impl SessionState {
    pub fn new(pipeline: Arc<dyn PipelineHandle>, transport: Arc<dyn CallTransport>) -> Self {
        Self {
            pipeline,
            transport,
            cancelled: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            reason: Mutex::new(None),
            done: CancellationToken::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<dyn PipelineHandle> {
        &self.pipeline
    }

    pub fn transport(&self) -> &Arc<dyn CallTransport> {
        &self.transport
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reason recorded by the teardown that won, if any.
    pub fn teardown_reason(&self) -> Option<TeardownReason> {
        *self.reason.lock()
    }

    /// Token fired once teardown has completed.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Mark call recording as running so teardown knows to stop it.
    pub fn mark_recording(&self) {
        self.recording.store(true, Ordering::Release);
    }

    /// Tear the session down. Only the first caller does any work; later and
    /// concurrent callers return `false` immediately.
    pub async fn teardown(&self, reason: TeardownReason) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?reason, "session already torn down");
            return false;
        }
        *self.reason.lock() = Some(reason);
        tracing::info!(?reason, "tearing down session");

        if self.recording.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.transport.stop_recording().await {
                tracing::warn!(error = %e, "failed to stop recording");
            }
        }

        let stopped = if reason.drains() {
            self.pipeline.end_task().await
        } else {
            self.pipeline.cancel().await
        };
        if let Err(e) = stopped {
            tracing::error!(error = %e, ?reason, "failed to stop pipeline");
        }

        self.done.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{FakePipeline, FakeTransport, PipelineCall};

    fn state() -> (Arc<SessionState>, Arc<FakeTransport>, Arc<FakePipeline>) {
        let transport = Arc::new(FakeTransport::new());
        let pipeline = Arc::new(FakePipeline::new());
        let state = Arc::new(SessionState::new(pipeline.clone(), transport.clone()));
        (state, transport, pipeline)
    }

    #[tokio::test]
    async fn test_teardown_cancels_once() {
        let (state, transport, pipeline) = state();
        state.mark_recording();

        assert!(state.teardown(TeardownReason::CallLeft).await);
        assert!(!state.teardown(TeardownReason::ParticipantLeft).await);

        assert!(state.is_cancelled());
        assert!(state.done().is_cancelled());
        assert_eq!(state.teardown_reason(), Some(TeardownReason::CallLeft));
        assert_eq!(pipeline.calls(), vec![PipelineCall::Cancel]);
        assert_eq!(transport.stop_recording_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_teardown_is_exactly_once() {
        let (state, transport, pipeline) = state();
        state.mark_recording();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state.teardown(TeardownReason::DialinError).await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(pipeline.cancel_calls(), 1);
        assert_eq!(transport.stop_recording_calls(), 1);
    }

    #[tokio::test]
    async fn test_completed_teardown_drains() {
        let (state, transport, pipeline) = state();

        assert!(state.teardown(TeardownReason::Completed).await);

        assert_eq!(pipeline.calls(), vec![PipelineCall::EndTask]);
        // Recording was never started, so nothing to stop.
        assert_eq!(transport.stop_recording_calls(), 0);
    }

    #[tokio::test]
    async fn test_teardown_swallows_recording_failure() {
        let (state, transport, pipeline) = state();
        transport.fail_stop_recording();
        state.mark_recording();

        assert!(state.teardown(TeardownReason::ParticipantLeft).await);
        assert_eq!(pipeline.cancel_calls(), 1);
    }
}
