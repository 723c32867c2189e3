//! Call Session Orchestrator
//!
//! Drives one voice-call session: dial-in acceptance, retried dial-outs,
//! voicemail-aware conversation policy and exactly-once teardown. The calling
//! provider and the media pipeline are reached only through the
//! [`CallTransport`] and [`PipelineHandle`] traits.

pub mod bootstrap;
pub mod controller;
pub mod dialin;
pub mod dialout;
pub mod pipeline;
pub mod policy;
pub mod replay;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{normalize, CallConfig, DialinSettings, DialoutAddress, DialoutTarget};
pub use controller::{SessionController, SessionOptions, SessionReport};
pub use dialout::{DialOutAttemptState, DialOutStatus, DEFAULT_MAX_ATTEMPTS};
pub use pipeline::{PipelineError, PipelineHandle, SessionState, TeardownReason, Turn};
pub use policy::{ConversationContext, ConversationPolicy, VoicemailProfile};
pub use transport::{CallLegId, CallState, CallTransport, Participant, SessionEvent, TransportError};

/// Errors that end a session and are reported to the host.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("dial-in error: {0}")]
    Dialin(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("event handler failed: {0}")]
    Handler(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
