//! dialpilot
//!
//! Orchestrates AI voice-call sessions: accepts inbound SIP calls, places
//! outbound calls with bounded retry, picks a voicemail or conversational
//! policy, and tears each session down exactly once. Also ships the webhook
//! server that provisions a session for every inbound call.

pub mod cli;
pub mod config;
pub mod logging;
pub mod provision;
pub mod server;
pub mod session;
