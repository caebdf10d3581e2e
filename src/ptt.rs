// ABOUTME: Push-to-talk orchestrator translating press/release gestures into session actions.
// ABOUTME: Handles on-demand reconnects, turn interruption, capture start/stop, and buffered commit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxlink_protocol::ClientEvent;

use crate::capture::{ActiveRecording, AudioCapture, LocalRecording};
use crate::lifecycle::ConnectionLifecycleService;
use crate::router::EventRouter;
use crate::session::{SharedSession, StatusSink, UsageDecision, UsageGate, now_ms};

/// Result of a press gesture. `reason` names why a press was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressOutcome {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PressOutcome {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// The most recent locally captured segment awaiting enrichment. The
/// resolving stop task and the resolved record are mutually exclusive
/// occupants; clearing resets both together.
enum PendingUserAudio {
    Idle,
    Resolving,
    Ready(LocalRecording),
}

struct PendingSlot {
    epoch: u64,
    state: PendingUserAudio,
}

pub struct PttOrchestrator {
    session: SharedSession,
    lifecycle: Arc<ConnectionLifecycleService>,
    router: Arc<EventRouter>,
    capture: Arc<dyn AudioCapture>,
    usage_gate: Arc<dyn UsageGate>,
    status: Arc<dyn StatusSink>,
    channel_open_timeout: Duration,
    recording: Mutex<Option<Box<dyn ActiveRecording>>>,
    pending: Arc<Mutex<PendingSlot>>,
}

impl PttOrchestrator {
    pub fn new(
        session: SharedSession,
        lifecycle: Arc<ConnectionLifecycleService>,
        router: Arc<EventRouter>,
        capture: Arc<dyn AudioCapture>,
        usage_gate: Arc<dyn UsageGate>,
        status: Arc<dyn StatusSink>,
        channel_open_timeout: Duration,
    ) -> Self {
        Self {
            session,
            lifecycle,
            router,
            capture,
            usage_gate,
            status,
            channel_open_timeout,
            recording: Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingSlot {
                epoch: 0,
                state: PendingUserAudio::Idle,
            })),
        }
    }

    pub async fn handle_press(&self) -> PressOutcome {
        // A connect attempt is already in flight: never start a second one
        if self.session.connection().is_connecting() {
            return PressOutcome::deny("connecting");
        }

        // Clear stale pending recording state from an earlier gesture. The
        // epoch bump makes any still-unsettled stop task write into the void.
        {
            let mut pending = self.pending.lock().unwrap();
            pending.epoch += 1;
            pending.state = PendingUserAudio::Idle;
        }
        if let Some(stale) = self.recording.lock().unwrap().take() {
            drop(stale);
            tracing::debug!("Dropped stale recording handle");
        }

        // Usage limit precondition, checked before any side effects
        if let UsageDecision::Denied(reason) = self.usage_gate.check() {
            return PressOutcome::deny(&reason);
        }

        // On-demand (re)connect
        if !self.session.connection().is_connected() {
            if let Err(e) = self.lifecycle.connect().await {
                tracing::warn!("Connect during PTT press failed: {e}");
            }
            let snapshot = self.session.connection().snapshot();
            if !snapshot.is_connected {
                // A reconnect race can leave the machine mid-flight again
                return if snapshot.is_connecting {
                    PressOutcome::deny("connecting")
                } else {
                    PressOutcome::deny("not_connected")
                };
            }
        }

        // Bounded wait for the channel; on timeout there are no sends and
        // no recording starts
        if !self
            .lifecycle
            .wait_for_data_channel_open(self.channel_open_timeout)
            .await
        {
            return PressOutcome::deny("data_channel_not_open");
        }
        let Some(channel) = self.lifecycle.channel() else {
            return PressOutcome::deny("not_connected");
        };

        // Cancel first so the clear cannot race a still-forming response
        if let Err(e) = channel.send(&ClientEvent::response_cancel()) {
            tracing::error!("Failed to send response.cancel: {e}");
        }
        if let Err(e) = channel.send(&ClientEvent::clear()) {
            tracing::error!("Failed to send input_audio_buffer.clear: {e}");
        }

        // Finalize any in-flight assistant turn under a distinct id so the
        // UI closes a separate bubble instead of merging with the next turn
        let interrupted_id = format!("utt_interrupted_{}", now_ms());
        self.router.abort_ai_turn_capture(&interrupted_id);

        let Some(track) = self.lifecycle.local_track() else {
            return PressOutcome::deny("not_connected");
        };
        track.set_enabled(true);
        match self.capture.start(track) {
            Ok(handle) => {
                *self.recording.lock().unwrap() = Some(handle);
            }
            Err(e) => {
                tracing::error!("Failed to start local capture: {e}");
                self.status.present_error(&format!("Failed to start recording: {e}"));
                return PressOutcome::deny("capture_failed");
            }
        }
        self.session.set_mic_active(true);
        self.status.speech_started();
        PressOutcome::allow()
    }

    /// Release the control. The local capture stops asynchronously into
    /// the pending slot while a scheduled tail absorbs trailing speech
    /// before the buffer is committed.
    pub fn handle_release(&self, buffer_time: Duration) {
        if let Some(handle) = self.recording.lock().unwrap().take() {
            let pending = self.pending.clone();
            let epoch = {
                let mut slot = pending.lock().unwrap();
                slot.state = PendingUserAudio::Resolving;
                slot.epoch
            };
            tokio::spawn(async move {
                let resolved = match handle.stop().await {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::error!("Failed to stop local recording: {e}");
                        None
                    }
                };
                let mut slot = pending.lock().unwrap();
                if slot.epoch != epoch {
                    tracing::debug!("Discarding stale local recording");
                    return;
                }
                slot.state = match resolved {
                    Some(record) => PendingUserAudio::Ready(record),
                    None => PendingUserAudio::Idle,
                };
            });
        }

        let session = self.session.clone();
        let status = self.status.clone();
        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(buffer_time).await;
            if let Some(track) = lifecycle.local_track() {
                track.set_enabled(false);
            }
            session.set_mic_active(false);
            status.speech_stopped();
            match lifecycle.channel() {
                Some(channel) if channel.is_open() => {
                    if let Err(e) = channel.send(&ClientEvent::commit()) {
                        tracing::error!("Failed to send input_audio_buffer.commit: {e}");
                    }
                    if let Err(e) = channel.send(&ClientEvent::response_create()) {
                        tracing::error!("Failed to send response.create: {e}");
                    }
                }
                _ => tracing::warn!("Data channel not open at release, skipping commit"),
            }
        });
    }

    /// Hand the most recent resolved recording to the enrichment consumer.
    pub fn take_pending_recording(&self) -> Option<LocalRecording> {
        let mut slot = self.pending.lock().unwrap();
        match std::mem::replace(&mut slot.state, PendingUserAudio::Idle) {
            PendingUserAudio::Ready(record) => Some(record),
            other => {
                slot.state = other;
                None
            }
        }
    }
}
