//! Dial-In Handler
//!
//! Reacts to the inbound leg: the bot greets first once the caller is in and
//! can be heard, and a dial-in error ends the session.

use std::sync::Arc;

use serde_json::Value;

use super::pipeline::{SessionState, TeardownReason, Turn};
use super::policy::ConversationContext;
use super::transport::Participant;
use super::SessionError;

pub struct DialInHandler {
    state: Arc<SessionState>,
    context: ConversationContext,
    record_calls: bool,
}

impl DialInHandler {
    pub fn new(state: Arc<SessionState>, context: ConversationContext, record_calls: bool) -> Self {
        Self {
            state,
            context,
            record_calls,
        }
    }

    /// SIP addresses are registered with the provider.
    pub fn on_ready(&self, data: &Value) {
        tracing::debug!(%data, "dial-in ready");
    }

    pub fn on_connected(&self, data: &Value) {
        tracing::debug!(%data, "dial-in connected");
    }

    pub fn on_stopped(&self, data: &Value) {
        tracing::debug!(%data, "dial-in stopped");
    }

    pub fn on_warning(&self, data: &Value) {
        tracing::warn!(%data, "dial-in warning");
    }

    /// The inbound leg failed: the bot leaves and the failure is reported
    /// to the host.
    pub async fn on_error(&self, data: &Value) -> Result<(), SessionError> {
        tracing::error!(%data, "dial-in error");
        self.state.teardown(TeardownReason::DialinError).await;
        Err(SessionError::Dialin(data.to_string()))
    }

    /// Start recording (best effort), start hearing the caller, then greet.
    pub async fn on_first_participant_joined(
        &self,
        participant: &Participant,
    ) -> Result<(), SessionError> {
        tracing::info!(participant = %participant.id, "first participant joined");
        if self.state.is_cancelled() {
            tracing::debug!("session already ended, ignoring participant");
            return Ok(());
        }

        if self.record_calls {
            match self.state.transport().start_recording().await {
                Ok(()) => self.state.mark_recording(),
                Err(e) => tracing::warn!(error = %e, "failed to start recording, continuing without it"),
            }
        }

        self.state
            .transport()
            .capture_participant_transcription(&participant.id)
            .await?;

        if self.state.is_cancelled() {
            tracing::debug!("session ended before greeting");
            return Ok(());
        }
        self.state
            .pipeline()
            .queue_turn(Turn::Context(self.context.clone()))
            .await?;
        Ok(())
    }
}
