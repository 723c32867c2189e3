//! Call Transport Adapter interface
//!
//! The calling provider itself lives outside this crate. The orchestrator
//! sees it through two seams: the [`CallTransport`] actions it may invoke, and
//! the [`SessionEvent`] stream the provider (and the conversational engine)
//! deliver back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bootstrap::DialoutAddress;

/// Identifier of one participant's connection (dial-out `sessionId`,
/// participant id for dial-in).
pub type CallLegId = String;

/// Errors surfaced by the calling provider.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dial-out rejected: {0}")]
    Dialout(String),

    #[error("transcription capture failed for {participant}: {reason}")]
    Transcription { participant: String, reason: String },

    #[error("recording error: {0}")]
    Recording(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}

/// Actions the orchestrator may take on the calling provider.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Start an outbound call. The address serializes to the provider's
    /// `{phoneNumber, callerId?}` / `{sipUri}` shape. Returns the leg id that
    /// later dial-out events carry as `sessionId`.
    async fn start_dialout(&self, address: &DialoutAddress) -> Result<CallLegId, TransportError>;

    /// Begin transcribing one participant's audio.
    async fn capture_participant_transcription(
        &self,
        participant_id: &str,
    ) -> Result<(), TransportError>;

    async fn start_recording(&self) -> Result<(), TransportError>;

    async fn stop_recording(&self) -> Result<(), TransportError>;
}

/// Room call state reported by `call_state_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initialized,
    Joining,
    Joined,
    Leaving,
    Left,
    #[serde(other)]
    Other,
}

/// A participant as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(flatten)]
    pub info: serde_json::Map<String, Value>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: serde_json::Map::new(),
        }
    }
}

/// Everything the session reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    DialinReady {
        #[serde(default)]
        data: Value,
    },
    DialinConnected {
        #[serde(default)]
        data: Value,
    },
    DialinStopped {
        #[serde(default)]
        data: Value,
    },
    DialinError {
        #[serde(default)]
        data: Value,
    },
    DialinWarning {
        #[serde(default)]
        data: Value,
    },
    FirstParticipantJoined {
        participant: Participant,
    },
    DialoutConnected {
        session_id: CallLegId,
        #[serde(default)]
        data: Value,
    },
    DialoutAnswered {
        session_id: CallLegId,
        #[serde(default)]
        data: Value,
    },
    DialoutStopped {
        session_id: CallLegId,
        #[serde(default)]
        data: Value,
    },
    DialoutError {
        session_id: CallLegId,
        #[serde(default)]
        data: Value,
    },
    DialoutWarning {
        session_id: CallLegId,
        #[serde(default)]
        data: Value,
    },
    CallStateUpdated {
        state: CallState,
    },
    Joined {
        #[serde(default)]
        data: Value,
    },
    ParticipantLeft {
        participant: Participant,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Raised by the conversational engine when the model invokes a tool.
    FunctionCall {
        name: String,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
}

impl SessionEvent {
    /// Short event name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::DialinReady { .. } => "dialin_ready",
            SessionEvent::DialinConnected { .. } => "dialin_connected",
            SessionEvent::DialinStopped { .. } => "dialin_stopped",
            SessionEvent::DialinError { .. } => "dialin_error",
            SessionEvent::DialinWarning { .. } => "dialin_warning",
            SessionEvent::FirstParticipantJoined { .. } => "first_participant_joined",
            SessionEvent::DialoutConnected { .. } => "dialout_connected",
            SessionEvent::DialoutAnswered { .. } => "dialout_answered",
            SessionEvent::DialoutStopped { .. } => "dialout_stopped",
            SessionEvent::DialoutError { .. } => "dialout_error",
            SessionEvent::DialoutWarning { .. } => "dialout_warning",
            SessionEvent::CallStateUpdated { .. } => "call_state_updated",
            SessionEvent::Joined { .. } => "joined",
            SessionEvent::ParticipantLeft { .. } => "participant_left",
            SessionEvent::FunctionCall { .. } => "function_call",
        }
    }

    /// Call leg a dial-out event reports on.
    pub fn dialout_leg(&self) -> Option<&str> {
        match self {
            SessionEvent::DialoutConnected { session_id, .. }
            | SessionEvent::DialoutAnswered { session_id, .. }
            | SessionEvent::DialoutStopped { session_id, .. }
            | SessionEvent::DialoutError { session_id, .. }
            | SessionEvent::DialoutWarning { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dialout_leg() {
        let event = SessionEvent::DialoutAnswered {
            session_id: "leg-4".to_string(),
            data: json!({}),
        };
        assert_eq!(event.dialout_leg(), Some("leg-4"));
        assert_eq!(SessionEvent::Joined { data: json!({}) }.dialout_leg(), None);
    }

    #[test]
    fn test_dialout_address_wire_shape() {
        use crate::session::bootstrap::DialoutTarget;

        let phone = DialoutTarget::phone("+15551234567", None);
        assert_eq!(
            serde_json::to_value(&phone.address).unwrap(),
            json!({"phoneNumber": "+15551234567"})
        );

        let with_caller = DialoutTarget::phone("+15551234567", Some("cid".to_string()));
        assert_eq!(
            serde_json::to_value(&with_caller.address).unwrap(),
            json!({"phoneNumber": "+15551234567", "callerId": "cid"})
        );

        let sip = DialoutTarget::sip("sip:a@b.c");
        assert_eq!(
            serde_json::to_value(&sip.address).unwrap(),
            json!({"sipUri": "sip:a@b.c"})
        );
    }

    #[test]
    fn test_session_event_from_json() {
        let event: SessionEvent = serde_json::from_value(json!({
            "event": "dialout_error",
            "session_id": "leg-1",
            "data": {"errorMsg": "busy"}
        }))
        .unwrap();
        assert_eq!(event.kind(), "dialout_error");
        assert!(matches!(event, SessionEvent::DialoutError { ref session_id, .. } if session_id == "leg-1"));

        let event: SessionEvent =
            serde_json::from_value(json!({"event": "call_state_updated", "state": "joined"})).unwrap();
        assert_eq!(
            event,
            SessionEvent::CallStateUpdated {
                state: CallState::Joined
            }
        );
    }

    #[test]
    fn test_unknown_call_state() {
        let event: SessionEvent =
            serde_json::from_value(json!({"event": "call_state_updated", "state": "reconnecting"}))
                .unwrap();
        assert_eq!(
            event,
            SessionEvent::CallStateUpdated {
                state: CallState::Other
            }
        );
    }

    #[test]
    fn test_participant_keeps_extra_fields() {
        let participant: Participant =
            serde_json::from_value(json!({"id": "p1", "info": {"userName": "caller"}})).unwrap();
        assert_eq!(participant.id, "p1");
        assert!(participant.info.contains_key("info"));
    }
}
