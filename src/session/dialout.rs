//! Dial-Out Handler
//!
//! One handler per outbound destination. Each owns a bounded-retry state
//! machine: a provider `error` event re-drives the attempt, and the attempt
//! bound is checked before every dispatch, so a target is dialed at most
//! `max_attempts` times however many errors arrive. Exhaustion leaves the
//! target `Failed`; it never ends the session.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::bootstrap::DialoutTarget;
use super::pipeline::SessionState;
use super::transport::{CallLegId, SessionEvent};

/// Attempts per target unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialOutStatus {
    Pending,
    /// Ringing at the far end.
    Connected,
    /// Off hook.
    Answered,
    Stopped,
    Failed,
}

/// Observable retry bookkeeping for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialOutAttemptState {
    pub target: DialoutTarget,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub status: DialOutStatus,
    /// Dispatch calls actually made to the transport.
    pub dispatches: u32,
    /// Leg of the most recent successful dispatch.
    pub leg: Option<CallLegId>,
}

impl DialOutAttemptState {
    fn new(target: DialoutTarget, max_attempts: u32) -> Self {
        Self {
            target,
            attempt_count: 0,
            max_attempts,
            status: DialOutStatus::Pending,
            dispatches: 0,
            leg: None,
        }
    }

    /// No further automatic attempts will be made.
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count > self.max_attempts
    }
}

pub struct DialOutHandler {
    index: usize,
    session: Arc<SessionState>,
    state: Mutex<DialOutAttemptState>,
}

impl DialOutHandler {
    pub fn new(
        index: usize,
        session: Arc<SessionState>,
        target: DialoutTarget,
        max_attempts: u32,
    ) -> Self {
        tracing::info!(dialout = index, destination = target.destination(), max_attempts, "dial-out handler ready");
        Self {
            index,
            session,
            state: Mutex::new(DialOutAttemptState::new(target, max_attempts)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub async fn snapshot(&self) -> DialOutAttemptState {
        self.state.lock().await.clone()
    }

    /// Begin (or re-begin) an attempt. Returns the new leg id when the
    /// transport accepted the dispatch.
    pub async fn start(&self) -> Option<CallLegId> {
        let mut state = self.state.lock().await;
        self.attempt(&mut state).await
    }

    async fn attempt(&self, state: &mut DialOutAttemptState) -> Option<CallLegId> {
        if self.session.is_cancelled() {
            tracing::debug!(dialout = self.index, "session ended, not dialing");
            return None;
        }
        state.attempt_count += 1;
        if state.is_exhausted() {
            tracing::error!(
                dialout = self.index,
                destination = state.target.destination(),
                max_attempts = state.max_attempts,
                "max dial-out attempts reached"
            );
            state.status = DialOutStatus::Failed;
            return None;
        }

        tracing::info!(
            dialout = self.index,
            destination = state.target.destination(),
            attempt = state.attempt_count,
            max_attempts = state.max_attempts,
            "dialing"
        );
        state.dispatches += 1;
        match self
            .session
            .transport()
            .start_dialout(&state.target.address)
            .await
        {
            Ok(leg) => {
                state.status = DialOutStatus::Pending;
                state.leg = Some(leg.clone());
                Some(leg)
            }
            Err(e) => {
                // Only the provider's asynchronous error event retries.
                tracing::error!(dialout = self.index, error = %e, "error starting dial-out");
                state.status = DialOutStatus::Failed;
                None
            }
        }
    }

    pub async fn on_connected(&self, data: &Value) {
        self.state.lock().await.status = DialOutStatus::Connected;
        tracing::debug!(dialout = self.index, %data, "dial-out connected");
    }

    /// Listen to the far end but do not greet: the callee speaks first, which
    /// is how a live pickup is told apart from a voicemail greeting.
    pub async fn on_answered(&self, leg: &str, data: &Value) {
        self.state.lock().await.status = DialOutStatus::Answered;
        tracing::debug!(dialout = self.index, %data, "dial-out answered");
        if let Err(e) = self
            .session
            .transport()
            .capture_participant_transcription(leg)
            .await
        {
            tracing::error!(dialout = self.index, leg, error = %e, "failed to capture dial-out transcription");
        }
    }

    pub async fn on_stopped(&self, data: &Value) {
        self.state.lock().await.status = DialOutStatus::Stopped;
        tracing::debug!(dialout = self.index, %data, "dial-out stopped");
    }

    pub fn on_warning(&self, data: &Value) {
        tracing::warn!(dialout = self.index, %data, "dial-out warning");
    }

    /// Mark the attempt failed and immediately retry this target. Returns the
    /// leg of the retry, if one was dispatched.
    pub async fn on_error(&self, data: &Value) -> Option<CallLegId> {
        let mut state = self.state.lock().await;
        state.status = DialOutStatus::Failed;
        state.leg = None;
        tracing::error!(dialout = self.index, %data, "dial-out error, retrying");
        if self.session.is_cancelled() {
            tracing::debug!(dialout = self.index, "session ended, not retrying");
            return None;
        }
        self.attempt(&mut state).await
    }
}

/// Routes dial-out events to the handler that owns the leg they name.
///
/// A leg id is only known once its dispatch returns, but the provider may
/// report on the leg before that. While any dispatch is in flight, events for
/// unknown legs are parked and handed back when their leg is bound. Once no
/// dispatch is pending, whatever is still parked can never be claimed and is
/// dropped.
#[derive(Default)]
pub struct DialoutRouter {
    inner: parking_lot::Mutex<Legs>,
}

#[derive(Default)]
struct Legs {
    bound: HashMap<CallLegId, Arc<DialOutHandler>>,
    in_flight: usize,
    parked: HashMap<CallLegId, Vec<SessionEvent>>,
}

impl DialoutRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self, leg: &str) -> Option<Arc<DialOutHandler>> {
        self.inner.lock().bound.remove(leg)
    }

    pub fn route(&self, leg: &str) -> Option<Arc<DialOutHandler>> {
        self.inner.lock().bound.get(leg).cloned()
    }

    /// Find the handler for `event`'s leg. Events for a leg that may still
    /// be bound are parked; events nobody can claim are dropped.
    pub fn route_or_park(
        &self,
        leg: &str,
        event: SessionEvent,
    ) -> Option<(Arc<DialOutHandler>, SessionEvent)> {
        let mut legs = self.inner.lock();
        if let Some(handler) = legs.bound.get(leg) {
            return Some((handler.clone(), event));
        }
        if legs.in_flight > 0 {
            tracing::debug!(leg, event = event.kind(), "parking event until its leg is bound");
            legs.parked.entry(leg.to_string()).or_default().push(event);
        } else {
            tracing::warn!(leg, event = event.kind(), "dial-out event for unknown leg dropped");
        }
        None
    }

    /// Announce a dispatch that may produce a new leg.
    pub fn begin_dispatch(&self) {
        self.inner.lock().in_flight += 1;
    }

    /// Close a dispatch opened with [`begin_dispatch`](Self::begin_dispatch),
    /// binding its leg if one was created. Returns the events that arrived for
    /// that leg in the meantime, oldest first.
    pub fn finish_dispatch(
        &self,
        leg: Option<CallLegId>,
        handler: &Arc<DialOutHandler>,
    ) -> Vec<SessionEvent> {
        let mut legs = self.inner.lock();
        legs.in_flight = legs.in_flight.saturating_sub(1);

        let mut early = Vec::new();
        if let Some(leg) = leg {
            tracing::debug!(leg = %leg, dialout = handler.index(), "bound dial-out leg");
            early = legs.parked.remove(&leg).unwrap_or_default();
            legs.bound.insert(leg, handler.clone());
        }

        if legs.in_flight == 0 && !legs.parked.is_empty() {
            for (leg, events) in legs.parked.drain() {
                tracing::warn!(leg = %leg, events = events.len(), "dropping events for unknown leg");
            }
        }
        early
    }

    pub fn len(&self) -> usize {
        self.inner.lock().bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events waiting for a leg to be bound.
    pub fn parked(&self) -> usize {
        self.inner.lock().parked.values().map(Vec::len).sum()
    }
}
