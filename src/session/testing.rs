//! In-memory transport and pipeline doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::bootstrap::DialoutAddress;
use super::pipeline::{PipelineError, PipelineHandle, Turn};
use super::transport::{CallLegId, CallTransport, TransportError};

/// Ordered record of actions across both doubles.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Queue(Turn),
    EndTask,
    Cancel,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    journal: Journal,
    dialouts: Mutex<Vec<DialoutAddress>>,
    transcriptions: Mutex<Vec<String>>,
    next_leg: AtomicUsize,
    start_recording_calls: AtomicUsize,
    stop_recording_calls: AtomicUsize,
    fail_dialout: AtomicBool,
    fail_transcription: AtomicBool,
    fail_start_recording: AtomicBool,
    fail_stop_recording: AtomicBool,
    dialout_latency: Mutex<Option<Duration>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn fail_dialout(&self) {
        self.fail_dialout.store(true, Ordering::SeqCst);
    }

    pub fn fail_transcription(&self) {
        self.fail_transcription.store(true, Ordering::SeqCst);
    }

    pub fn fail_start_recording(&self) {
        self.fail_start_recording.store(true, Ordering::SeqCst);
    }

    pub fn fail_stop_recording(&self) {
        self.fail_stop_recording.store(true, Ordering::SeqCst);
    }

    /// Make every `start_dialout` take `latency` before it returns a leg.
    pub fn delay_dialout(&self, latency: Duration) {
        *self.dialout_latency.lock() = Some(latency);
    }

    pub fn dialouts(&self) -> Vec<DialoutAddress> {
        self.dialouts.lock().clone()
    }

    pub fn transcriptions(&self) -> Vec<String> {
        self.transcriptions.lock().clone()
    }

    pub fn start_recording_calls(&self) -> usize {
        self.start_recording_calls.load(Ordering::SeqCst)
    }

    pub fn stop_recording_calls(&self) -> usize {
        self.stop_recording_calls.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

#[async_trait]
impl CallTransport for FakeTransport {
    async fn start_dialout(&self, address: &DialoutAddress) -> Result<CallLegId, TransportError> {
        let latency = *self.dialout_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.dialouts.lock().push(address.clone());
        if self.fail_dialout.load(Ordering::SeqCst) {
            return Err(TransportError::Dialout("rejected by fake".to_string()));
        }
        let leg = format!("leg-{}", self.next_leg.fetch_add(1, Ordering::SeqCst) + 1);
        self.journal.lock().push(format!("dialout:{}", leg));
        Ok(leg)
    }

    async fn capture_participant_transcription(
        &self,
        participant_id: &str,
    ) -> Result<(), TransportError> {
        // Yield so ordering bugs between handlers would surface.
        tokio::task::yield_now().await;
        if self.fail_transcription.load(Ordering::SeqCst) {
            return Err(TransportError::Transcription {
                participant: participant_id.to_string(),
                reason: "fake failure".to_string(),
            });
        }
        self.transcriptions.lock().push(participant_id.to_string());
        self.journal
            .lock()
            .push(format!("transcription:{}", participant_id));
        Ok(())
    }

    async fn start_recording(&self) -> Result<(), TransportError> {
        self.start_recording_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start_recording.load(Ordering::SeqCst) {
            return Err(TransportError::Recording("fake start failure".to_string()));
        }
        self.journal.lock().push("start_recording".to_string());
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), TransportError> {
        self.stop_recording_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop_recording.load(Ordering::SeqCst) {
            return Err(TransportError::Recording("fake stop failure".to_string()));
        }
        self.journal.lock().push("stop_recording".to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePipeline {
    journal: Journal,
    calls: Mutex<Vec<PipelineCall>>,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PipelineCall> {
        self.calls.lock().clone()
    }

    pub fn queued(&self) -> Vec<Turn> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PipelineCall::Queue(turn) => Some(turn.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cancel_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, PipelineCall::Cancel))
            .count()
    }
}

#[async_trait]
impl PipelineHandle for FakePipeline {
    async fn queue_turn(&self, turn: Turn) -> Result<(), PipelineError> {
        let label = match &turn {
            Turn::Context(_) => "queue:context".to_string(),
            Turn::ToolResult { content, .. } => format!("queue:tool_result:{}", content),
        };
        self.journal.lock().push(label);
        self.calls.lock().push(PipelineCall::Queue(turn));
        Ok(())
    }

    async fn end_task(&self) -> Result<(), PipelineError> {
        self.journal.lock().push("end_task".to_string());
        self.calls.lock().push(PipelineCall::EndTask);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), PipelineError> {
        self.journal.lock().push("cancel".to_string());
        self.calls.lock().push(PipelineCall::Cancel);
        Ok(())
    }
}

/// Transport and pipeline doubles writing to one shared journal.
pub fn journaled() -> (Arc<FakeTransport>, Arc<FakePipeline>) {
    let journal = Journal::default();
    (
        Arc::new(FakeTransport::with_journal(journal.clone())),
        Arc::new(FakePipeline::with_journal(journal)),
    )
}
