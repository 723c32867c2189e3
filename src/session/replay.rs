//! Offline session replay
//!
//! Runs a session against a scripted event stream with a recording transport
//! and pipeline, so the orchestration can be exercised without a calling
//! provider. Scripts are JSON Lines: one [`SessionEvent`] per line, blank
//! lines and `#` comments ignored.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::bootstrap::DialoutAddress;
use super::controller::{SessionController, SessionOptions, SessionReport};
use super::pipeline::{PipelineError, PipelineHandle, Turn};
use super::transport::{CallLegId, CallTransport, SessionEvent, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Something the session asked the provider or pipeline to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayAction {
    StartDialout {
        leg: CallLegId,
        address: DialoutAddress,
    },
    CaptureTranscription {
        participant: String,
    },
    StartRecording,
    StopRecording,
    QueueContext {
        messages: usize,
        tools: Vec<String>,
    },
    QueueToolResult {
        tool_call_id: Option<String>,
        content: String,
    },
    EndTask,
    Cancel,
}

/// Transport and pipeline in one: accepts everything and writes it down.
///
/// Leg ids are `leg-1`, `leg-2`, ... in dispatch order so scripts can refer
/// to them.
#[derive(Debug, Default)]
pub struct Recorder {
    actions: Mutex<Vec<ReplayAction>>,
    legs: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<ReplayAction> {
        self.actions.lock().clone()
    }

    fn push(&self, action: ReplayAction) {
        tracing::debug!(?action, "replay action");
        self.actions.lock().push(action);
    }
}

#[async_trait]
impl CallTransport for Recorder {
    async fn start_dialout(&self, address: &DialoutAddress) -> Result<CallLegId, TransportError> {
        let leg = format!("leg-{}", self.legs.fetch_add(1, Ordering::SeqCst) + 1);
        self.push(ReplayAction::StartDialout {
            leg: leg.clone(),
            address: address.clone(),
        });
        Ok(leg)
    }

    async fn capture_participant_transcription(
        &self,
        participant_id: &str,
    ) -> Result<(), TransportError> {
        self.push(ReplayAction::CaptureTranscription {
            participant: participant_id.to_string(),
        });
        Ok(())
    }

    async fn start_recording(&self) -> Result<(), TransportError> {
        self.push(ReplayAction::StartRecording);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), TransportError> {
        self.push(ReplayAction::StopRecording);
        Ok(())
    }
}

#[async_trait]
impl PipelineHandle for Recorder {
    async fn queue_turn(&self, turn: Turn) -> Result<(), PipelineError> {
        let action = match turn {
            Turn::Context(context) => ReplayAction::QueueContext {
                messages: context.messages.len(),
                tools: context.tools.into_iter().map(|t| t.name).collect(),
            },
            Turn::ToolResult {
                tool_call_id,
                content,
            } => ReplayAction::QueueToolResult {
                tool_call_id,
                content,
            },
        };
        self.push(action);
        Ok(())
    }

    async fn end_task(&self) -> Result<(), PipelineError> {
        self.push(ReplayAction::EndTask);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), PipelineError> {
        self.push(ReplayAction::Cancel);
        Ok(())
    }
}

/// Result of a replayed session.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub report: SessionReport,
    pub actions: Vec<ReplayAction>,
    /// Error the session ended with, if any.
    pub error: Option<String>,
}

pub fn parse_events(script: &str) -> Result<Vec<SessionEvent>, ReplayError> {
    let mut events = Vec::new();
    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

pub async fn load_events(path: &Path) -> Result<Vec<SessionEvent>, ReplayError> {
    let script = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_events(&script)
}

/// Run `body` through a full session fed by `events`, pausing `step`
/// between events so spawned handlers settle in script order.
pub async fn replay(
    body: &Value,
    events: Vec<SessionEvent>,
    options: SessionOptions,
    step: Duration,
) -> ReplayOutcome {
    let recorder = Arc::new(Recorder::new());
    let controller = SessionController::from_body(body, options, recorder.clone(), recorder.clone());

    let (tx, rx) = mpsc::channel(events.len().max(1));
    let feeder = tokio::spawn(async move {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
            tokio::time::sleep(step).await;
        }
    });

    let result = controller.run(rx).await;
    feeder.abort();

    let report = controller.report().await;
    ReplayOutcome {
        report,
        actions: recorder.actions(),
        error: result.err().map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::pipeline::TeardownReason;
    use serde_json::json;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let script = r#"
# caller dials in
{"event": "dialin_ready", "data": {}}

{"event": "participant_left", "participant": {"id": "p1"}, "reason": "hangup"}
"#;
        let events = parse_events(script).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), "participant_left");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let script = "{\"event\": \"dialin_ready\"}\n{\"event\": \"no_such_event\"}\n";
        let err = parse_events(script).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_load_events_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_events(&dir.path().join("missing.jsonl")).await.unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
    }

    #[tokio::test]
    async fn test_replay_dialin_conversation() {
        let body = json!({"dialin_settings": {"callId": "c1", "callDomain": "d1"}});
        let events = parse_events(
            r#"{"event": "first_participant_joined", "participant": {"id": "caller"}}
{"event": "function_call", "name": "terminate_call", "tool_call_id": "t1"}"#,
        )
        .unwrap();

        let outcome = replay(&body, events, SessionOptions::default(), Duration::from_millis(10)).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.report.teardown, Some(TeardownReason::Completed));
        assert_eq!(outcome.actions[0], ReplayAction::StartRecording);
        assert_eq!(
            outcome.actions[1],
            ReplayAction::CaptureTranscription {
                participant: "caller".to_string()
            }
        );
        assert!(matches!(outcome.actions[2], ReplayAction::QueueContext { .. }));
        assert!(outcome.actions.contains(&ReplayAction::StopRecording));
        assert_eq!(outcome.actions.last(), Some(&ReplayAction::EndTask));
    }
}
