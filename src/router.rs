// ABOUTME: Routes inbound data-channel events, capturing assistant turns into utterance records.
// ABOUTME: An interruption barrier suppresses stale events for a turn the user cut off.

use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use voxlink_protocol::{ResponseSummary, ServerEvent, UsageReport};

use crate::capture::AssistantAudioRecorder;
use crate::session::{SessionEvent, UtteranceRecord, now_ms};

/// Reconciles the remote transcription of the user's own speech with the
/// locally captured recording. Out of scope here beyond the contract.
pub trait TranscriptionReconciler: Send + Sync {
    fn transcription_completed(&self, item_id: &str, transcript: &str);
}

pub struct LogReconciler;

impl TranscriptionReconciler for LogReconciler {
    fn transcription_completed(&self, item_id: &str, transcript: &str) {
        tracing::info!("User transcription for {item_id}: {transcript}");
    }
}

/// Receives completed tool-call argument payloads.
pub trait FunctionCallHandler: Send + Sync {
    fn call_completed(&self, name: &str, call_id: &str, arguments: &str);
}

pub struct LogFunctionCalls;

impl FunctionCallHandler for LogFunctionCalls {
    fn call_completed(&self, name: &str, call_id: &str, arguments: &str) {
        tracing::info!("Function call {name} ({call_id}): {arguments}");
    }
}

/// Receives token usage reports and pass-through telemetry estimates.
pub trait UsageSink: Send + Sync {
    fn usage_reported(&self, usage: &UsageReport);
    fn estimate_suppressed_text(&self, text: &str);
}

pub struct LogUsage;

impl UsageSink for LogUsage {
    fn usage_reported(&self, usage: &UsageReport) {
        tracing::debug!("Usage: {} total tokens", usage.total_tokens);
    }

    fn estimate_suppressed_text(&self, _text: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Idle,
    Capturing,
    Draining,
}

struct TurnCapture {
    phase: TurnPhase,
    transcript: String,
    started_at: Option<Instant>,
}

struct Barrier {
    generation: u64,
}

struct RouterInner {
    turn: TurnCapture,
    barrier: Option<Barrier>,
    barrier_generation: u64,
}

/// Consumes the ordered inbound event stream and owns the pending AI turn
/// capture. Handler bodies log failures instead of propagating them, so one
/// bad message can never halt the router.
pub struct EventRouter {
    inner: Arc<Mutex<RouterInner>>,
    drain_timeout: Duration,
    /// Whether suppressed transcript deltas still feed the usage estimator.
    forward_telemetry: bool,
    events: mpsc::Sender<SessionEvent>,
    assistant_audio: Arc<dyn AssistantAudioRecorder>,
    reconciler: Arc<dyn TranscriptionReconciler>,
    functions: Arc<dyn FunctionCallHandler>,
    usage: Arc<dyn UsageSink>,
}

impl EventRouter {
    pub fn new(
        drain_timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
        assistant_audio: Arc<dyn AssistantAudioRecorder>,
        reconciler: Arc<dyn TranscriptionReconciler>,
        functions: Arc<dyn FunctionCallHandler>,
        usage: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RouterInner {
                turn: TurnCapture {
                    phase: TurnPhase::Idle,
                    transcript: String::new(),
                    started_at: None,
                },
                barrier: None,
                barrier_generation: 0,
            })),
            drain_timeout,
            forward_telemetry: false,
            events,
            assistant_audio,
            reconciler,
            functions,
            usage,
        }
    }

    /// Allow suppressed deltas to feed the usage estimator while a barrier
    /// is armed.
    pub fn with_pass_through_telemetry(mut self) -> Self {
        self.forward_telemetry = true;
        self
    }

    /// Pump the channel's inbound stream until it closes. Spawned once per
    /// (re)connect by the lifecycle service.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<String>) {
        while let Some(text) = inbound.recv().await {
            self.handle_raw(&text);
        }
        tracing::debug!("Inbound event stream ended");
    }

    /// Parse and dispatch one raw message. Parse failures are logged and
    /// swallowed.
    pub fn handle_raw(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => self.handle_event(event),
            Err(e) => tracing::debug!("Ignoring unparseable event: {e}"),
        }
    }

    pub fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::AudioTranscriptDelta { delta, .. }
            | ServerEvent::TextDelta { delta, .. } => self.on_transcript_delta(&delta),
            ServerEvent::OutputAudioStarted { .. } => self.on_audio_started(),
            ServerEvent::OutputAudioStopped { .. } => self.on_audio_stopped(),
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.on_transcript_done(&transcript)
            }
            ServerEvent::TextDone { text, .. } => self.on_transcript_done(&text),
            ServerEvent::ResponseDone { response } => self.on_response_done(response),
            ServerEvent::InputAudioTranscriptionCompleted { item_id, transcript } => {
                self.reconciler.transcription_completed(&item_id, &transcript);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                self.functions.call_completed(&name, &call_id, &arguments);
            }
            ServerEvent::SessionUpdated { session } => self.on_session_updated(&session),
            ServerEvent::Unknown => {
                tracing::debug!("Ignoring unknown event kind");
            }
        }
    }

    fn on_transcript_delta(&self, delta: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.barrier.is_some() {
            if self.forward_telemetry {
                self.usage.estimate_suppressed_text(delta);
            }
            tracing::debug!("Suppressed transcript delta for interrupted turn");
            return;
        }
        if inner.turn.phase != TurnPhase::Capturing {
            self.begin_capture(&mut inner);
        }
        inner.turn.transcript.push_str(delta);
    }

    // The remote can start speaking before any transcript delta arrives;
    // the started marker guarantees the turn is captured anyway.
    fn on_audio_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.barrier.is_some() {
            tracing::debug!("Suppressed turn start while barrier armed");
            return;
        }
        if inner.turn.phase != TurnPhase::Capturing {
            self.begin_capture(&mut inner);
        }
    }

    fn on_audio_stopped(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.turn.phase == TurnPhase::Capturing {
            self.finalize_turn(&mut inner, false, None);
        }
        self.disarm_barrier(&mut inner, "turn stop");
    }

    fn on_transcript_done(&self, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.barrier.is_some() {
            tracing::debug!("Suppressed final transcript for interrupted turn");
            return;
        }
        if looks_like_tool_payload(text) {
            tracing::debug!("Suppressed tool payload posing as transcript");
            return;
        }
        if inner.turn.phase != TurnPhase::Capturing {
            self.begin_capture(&mut inner);
        }
        // The done event carries the authoritative transcript
        inner.turn.transcript = text.to_string();
    }

    fn on_response_done(&self, response: Option<ResponseSummary>) {
        if let Some(usage) = response.as_ref().and_then(|r| r.usage) {
            self.usage.usage_reported(&usage);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.turn.phase == TurnPhase::Capturing {
            self.finalize_turn(&mut inner, false, None);
        }
        self.disarm_barrier(&mut inner, "response done");
    }

    fn on_session_updated(&self, session: &serde_json::Value) {
        let Some(usage_value) = session.get("usage") else {
            return;
        };
        match serde_json::from_value::<UsageReport>(usage_value.clone()) {
            Ok(usage) => self.usage.usage_reported(&usage),
            Err(e) => tracing::debug!("Ignoring malformed usage payload: {e}"),
        }
    }

    /// Interrupt the in-flight assistant turn. Finalizes whatever was
    /// captured under the supplied id, then arms the suppression barrier
    /// with a bounded drain timer. Safe under rapid repeated calls: a
    /// second call while armed only re-arms the timer.
    pub fn abort_ai_turn_capture(&self, interrupted_utterance_id: &str) {
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            let was_capturing = inner.turn.phase == TurnPhase::Capturing;
            if was_capturing {
                self.finalize_turn(&mut inner, true, Some(interrupted_utterance_id.to_string()));
                inner.turn.phase = TurnPhase::Draining;
            }
            if !was_capturing && inner.barrier.is_none() {
                // No turn in flight and nothing armed: no stale events to fear
                return;
            }
            inner.barrier_generation += 1;
            let generation = inner.barrier_generation;
            inner.barrier = Some(Barrier { generation });
            generation
        };

        let inner = self.inner.clone();
        let timeout = self.drain_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = inner.lock().unwrap();
            if inner.barrier.as_ref().map(|b| b.generation) == Some(generation) {
                inner.barrier = None;
                if inner.turn.phase == TurnPhase::Draining {
                    inner.turn.phase = TurnPhase::Idle;
                }
                tracing::debug!("Interruption barrier cleared by drain timeout");
            }
        });
    }

    fn disarm_barrier(&self, inner: &mut RouterInner, cause: &str) {
        if inner.barrier.take().is_some() {
            tracing::debug!("Interruption barrier cleared by drain signal ({cause})");
        }
        if inner.turn.phase == TurnPhase::Draining {
            inner.turn.phase = TurnPhase::Idle;
        }
    }

    fn begin_capture(&self, inner: &mut RouterInner) {
        inner.turn.phase = TurnPhase::Capturing;
        inner.turn.started_at = Some(Instant::now());
        self.assistant_audio.begin();
    }

    fn finalize_turn(&self, inner: &mut RouterInner, interrupted: bool, id: Option<String>) {
        let transcript = std::mem::take(&mut inner.turn.transcript);
        let duration_ms = inner
            .turn
            .started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let audio = self.assistant_audio.finish();
        let id = id.unwrap_or_else(|| format!("utt_{}", now_ms()));

        let record = UtteranceRecord::new(id, transcript, interrupted, audio, duration_ms);
        if let Err(e) = self.events.try_send(SessionEvent::UtteranceAdded(record)) {
            tracing::error!("Failed to emit utterance record: {e}");
        }
        inner.turn.phase = TurnPhase::Idle;
    }
}

/// A structured tool payload leaking through the transcript channel:
/// a JSON object body bearing tool-call markers.
fn looks_like_tool_payload(text: &str) -> bool {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return false;
    };
    let Some(object) = value.as_object() else {
        return false;
    };
    object.contains_key("tool_calls")
        || object.contains_key("function_call")
        || (object.contains_key("name") && object.contains_key("arguments"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::MockAssistantAudio;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingReconciler {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl TranscriptionReconciler for RecordingReconciler {
        fn transcription_completed(&self, item_id: &str, transcript: &str) {
            self.calls
                .lock()
                .unwrap()
                .push((item_id.to_string(), transcript.to_string()));
        }
    }

    struct RecordingFunctions {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FunctionCallHandler for RecordingFunctions {
        fn call_completed(&self, name: &str, call_id: &str, arguments: &str) {
            self.calls.lock().unwrap().push((
                name.to_string(),
                call_id.to_string(),
                arguments.to_string(),
            ));
        }
    }

    struct RecordingUsage {
        reports: Mutex<Vec<UsageReport>>,
        estimates: AtomicUsize,
    }

    impl UsageSink for RecordingUsage {
        fn usage_reported(&self, usage: &UsageReport) {
            self.reports.lock().unwrap().push(*usage);
        }

        fn estimate_suppressed_text(&self, _text: &str) {
            self.estimates.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Rig {
        router: Arc<EventRouter>,
        events: mpsc::Receiver<SessionEvent>,
        audio: Arc<MockAssistantAudio>,
        reconciler: Arc<RecordingReconciler>,
        functions: Arc<RecordingFunctions>,
        usage: Arc<RecordingUsage>,
    }

    fn rig() -> Rig {
        rig_with(false)
    }

    fn rig_with(forward_telemetry: bool) -> Rig {
        let (events_tx, events_rx) = mpsc::channel(16);
        let audio = MockAssistantAudio::new();
        let reconciler = Arc::new(RecordingReconciler {
            calls: Mutex::new(Vec::new()),
        });
        let functions = Arc::new(RecordingFunctions {
            calls: Mutex::new(Vec::new()),
        });
        let usage = Arc::new(RecordingUsage {
            reports: Mutex::new(Vec::new()),
            estimates: AtomicUsize::new(0),
        });
        let mut router = EventRouter::new(
            Duration::from_millis(2000),
            events_tx,
            audio.clone(),
            reconciler.clone(),
            functions.clone(),
            usage.clone(),
        );
        if forward_telemetry {
            router = router.with_pass_through_telemetry();
        }
        Rig {
            router: Arc::new(router),
            events: events_rx,
            audio,
            reconciler,
            functions,
            usage,
        }
    }

    fn delta(text: &str) -> ServerEvent {
        ServerEvent::AudioTranscriptDelta {
            response_id: None,
            delta: text.to_string(),
        }
    }

    fn take_utterance(events: &mut mpsc::Receiver<SessionEvent>) -> UtteranceRecord {
        match events.try_recv().expect("expected an utterance event") {
            SessionEvent::UtteranceAdded(record) => record,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_start_capture_once_and_accumulate() {
        let mut rig = rig();
        rig.router.handle_event(delta("the moss "));
        rig.router.handle_event(delta("is glowing"));
        assert_eq!(rig.audio.begun.load(Ordering::SeqCst), 1);

        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        let record = take_utterance(&mut rig.events);
        assert_eq!(record.transcript, "the moss is glowing");
        assert_eq!(record.words, vec!["the", "moss", "is", "glowing"]);
        assert!(!record.interrupted);
        assert!(record.audio.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn audio_started_marker_begins_capture_without_transcript() {
        let mut rig = rig();
        rig.router
            .handle_event(ServerEvent::OutputAudioStarted { response_id: None });
        assert_eq!(rig.audio.begun.load(Ordering::SeqCst), 1);

        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        let record = take_utterance(&mut rig.events);
        assert_eq!(record.transcript, "");
        assert!(!record.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_stop_markers_do_not_emit_duplicates() {
        let mut rig = rig();
        rig.router.handle_event(delta("hi"));
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        take_utterance(&mut rig.events);

        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_emits_one_interrupted_record_and_suppresses_stale_deltas() {
        let mut rig = rig();
        rig.router.handle_event(delta("I was saying"));

        rig.router.abort_ai_turn_capture("utt_interrupted_42");
        let record = take_utterance(&mut rig.events);
        assert!(record.interrupted);
        assert_eq!(record.id, "utt_interrupted_42");
        assert_eq!(record.transcript, "I was saying");

        // Stale deltas for the old turn are consumed but not forwarded
        rig.router.handle_event(delta(" something else"));
        rig.router.handle_event(delta(" entirely"));
        assert!(rig.events.try_recv().is_err());
        assert_eq!(rig.audio.begun.load(Ordering::SeqCst), 1);

        // Drain signal clears the barrier; a fresh turn captures again
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        rig.router.handle_event(delta("new turn"));
        assert_eq!(rig.audio.begun.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn double_abort_does_not_emit_from_empty_state() {
        let mut rig = rig();
        rig.router.handle_event(delta("partial"));
        rig.router.abort_ai_turn_capture("utt_interrupted_1");
        take_utterance(&mut rig.events);

        // Second press before any drain: re-arms, no duplicate record
        rig.router.abort_ai_turn_capture("utt_interrupted_2");
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_self_clears_after_drain_timeout() {
        let mut rig = rig();
        rig.router.handle_event(delta("cut off"));
        rig.router.abort_ai_turn_capture("utt_interrupted_9");
        take_utterance(&mut rig.events);

        rig.router.handle_event(delta("stale"));
        assert!(rig.events.try_recv().is_err());

        // No drain signal arrives; the timer clears the barrier
        tokio::time::sleep(Duration::from_millis(2100)).await;
        rig.router.handle_event(delta("fresh"));
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        let record = take_utterance(&mut rig.events);
        assert_eq!(record.transcript, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn reabort_rearms_the_drain_timer() {
        let mut rig = rig();
        rig.router.handle_event(delta("one"));
        rig.router.abort_ai_turn_capture("utt_interrupted_1");
        take_utterance(&mut rig.events);

        // Halfway through, a second abort resets the window
        tokio::time::sleep(Duration::from_millis(1500)).await;
        rig.router.abort_ai_turn_capture("utt_interrupted_2");

        // The first timer's expiry must not clear the re-armed barrier
        tokio::time::sleep(Duration::from_millis(600)).await;
        rig.router.handle_event(delta("still stale"));
        assert!(rig.events.try_recv().is_err());

        // The second window does expire
        tokio::time::sleep(Duration::from_millis(1500)).await;
        rig.router.handle_event(delta("fresh again"));
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert_eq!(take_utterance(&mut rig.events).transcript, "fresh again");
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_done_replaces_buffer_as_authoritative() {
        let mut rig = rig();
        rig.router.handle_event(delta("helo wrld"));
        rig.router.handle_event(ServerEvent::AudioTranscriptDone {
            response_id: None,
            transcript: "hello world".to_string(),
        });
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert_eq!(take_utterance(&mut rig.events).transcript, "hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_done_suppressed_while_barrier_armed() {
        let mut rig = rig();
        rig.router.handle_event(delta("old turn"));
        rig.router.abort_ai_turn_capture("utt_interrupted_5");
        take_utterance(&mut rig.events);

        rig.router.handle_event(ServerEvent::AudioTranscriptDone {
            response_id: None,
            transcript: "old turn complete".to_string(),
        });
        // The done was eaten: nothing emitted, and after the drain the
        // buffer does not resurrect the old text
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tool_payload_done_is_suppressed() {
        let mut rig = rig();
        rig.router.handle_event(delta("spoken text"));
        rig.router.handle_event(ServerEvent::AudioTranscriptDone {
            response_id: None,
            transcript: r#"{"name":"lookup","arguments":"{\"q\":1}"}"#.to_string(),
        });
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        // The buffered deltas survive; the tool payload never replaced them
        assert_eq!(take_utterance(&mut rig.events).transcript, "spoken text");
    }

    #[tokio::test(start_paused = true)]
    async fn response_done_drains_naturally_and_forwards_usage() {
        let mut rig = rig();
        rig.router.handle_event(delta("done deal"));
        rig.router.handle_event(ServerEvent::ResponseDone {
            response: Some(ResponseSummary {
                id: None,
                status: Some("completed".to_string()),
                usage: Some(UsageReport {
                    total_tokens: 17,
                    input_tokens: 10,
                    output_tokens: 7,
                }),
            }),
        });
        let record = take_utterance(&mut rig.events);
        assert_eq!(record.transcript, "done deal");
        assert_eq!(rig.usage.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn response_done_clears_an_armed_barrier() {
        let mut rig = rig();
        rig.router.handle_event(delta("cut"));
        rig.router.abort_ai_turn_capture("utt_interrupted_3");
        take_utterance(&mut rig.events);

        rig.router.handle_event(ServerEvent::ResponseDone { response: None });
        rig.router.handle_event(delta("fresh"));
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert_eq!(take_utterance(&mut rig.events).transcript, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn user_transcription_delegated_once() {
        let rig = rig();
        rig.router
            .handle_event(ServerEvent::InputAudioTranscriptionCompleted {
                item_id: "item_8".to_string(),
                transcript: "what is moss".to_string(),
            });
        let calls = rig.reconciler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("item_8".to_string(), "what is moss".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn function_call_arguments_delegated() {
        let rig = rig();
        rig.router.handle_event(ServerEvent::FunctionCallArgumentsDone {
            call_id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: r#"{"q":"lichen"}"#.to_string(),
        });
        let calls = rig.functions.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search");
    }

    #[tokio::test(start_paused = true)]
    async fn session_updated_usage_is_forwarded() {
        let rig = rig();
        rig.router.handle_event(ServerEvent::SessionUpdated {
            session: serde_json::json!({"usage": {"total_tokens": 5}}),
        });
        assert_eq!(rig.usage.reports.lock().unwrap()[0].total_tokens, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_deltas_feed_telemetry_when_enabled() {
        let mut rig = rig_with(true);
        rig.router.handle_event(delta("turn"));
        rig.router.abort_ai_turn_capture("utt_interrupted_7");
        take_utterance(&mut rig.events);

        rig.router.handle_event(delta("stale one"));
        rig.router.handle_event(delta("stale two"));
        assert_eq!(rig.usage.estimates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_message_does_not_halt_the_router() {
        let mut rig = rig();
        rig.router.handle_raw("not json at all");
        rig.router.handle_raw(r#"{"type":"response.audio_transcript.delta","delta":"ok"}"#);
        rig.router
            .handle_event(ServerEvent::OutputAudioStopped { response_id: None });
        assert_eq!(take_utterance(&mut rig.events).transcript, "ok");
    }

    #[test]
    fn tool_payload_detection() {
        assert!(looks_like_tool_payload(r#"{"name":"f","arguments":"{}"}"#));
        assert!(looks_like_tool_payload(r#" {"tool_calls":[]} "#));
        assert!(looks_like_tool_payload(r#"{"function_call":{"name":"f"}}"#));
        assert!(!looks_like_tool_payload("plain spoken sentence"));
        assert!(!looks_like_tool_payload(r#"{"just":"an object"}"#));
        assert!(!looks_like_tool_payload("{not valid json"));
    }
}
