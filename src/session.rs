// ABOUTME: Owned session state shared by the lifecycle, PTT, and router components.
// ABOUTME: Defines the status sink, usage gate, and the utterance event surface.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::capture::AudioClip;
use crate::connection::ConnectionTracker;

/// User-facing connection status presented through the status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Connecting,
    Ready,
    Reconnecting,
    ConnectionFailed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Connecting => write!(f, "connecting"),
            Status::Ready => write!(f, "ready"),
            Status::Reconnecting => write!(f, "reconnecting"),
            Status::ConnectionFailed => write!(f, "connection failed"),
        }
    }
}

/// Presentation collaborator: connection status, speech markers, and errors
/// surfaced to whatever UI hosts the session.
pub trait StatusSink: Send + Sync {
    fn status_changed(&self, status: Status);
    fn speech_started(&self);
    fn speech_stopped(&self);
    fn present_error(&self, message: &str);
}

/// Default sink that reports through tracing only.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn status_changed(&self, status: Status) {
        tracing::info!("Session status: {status}");
    }

    fn speech_started(&self) {
        tracing::debug!("Speech started");
    }

    fn speech_stopped(&self) {
        tracing::debug!("Speech stopped");
    }

    fn present_error(&self, message: &str) {
        tracing::error!("Session error: {message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageDecision {
    Allowed,
    Denied(String),
}

/// Token/usage-limit precondition checked before a PTT press proceeds.
pub trait UsageGate: Send + Sync {
    fn check(&self) -> UsageDecision;
}

pub struct NoUsageLimit;

impl UsageGate for NoUsageLimit {
    fn check(&self) -> UsageDecision {
        UsageDecision::Allowed
    }
}

/// A finalized span of assistant speech.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRecord {
    pub id: String,
    pub transcript: String,
    pub words: Vec<String>,
    pub interrupted: bool,
    pub audio: Option<AudioClip>,
    pub duration_ms: u64,
}

impl UtteranceRecord {
    pub fn new(
        id: String,
        transcript: String,
        interrupted: bool,
        audio: Option<AudioClip>,
        duration_ms: u64,
    ) -> Self {
        let words = split_words(&transcript);
        Self {
            id,
            transcript,
            words,
            interrupted,
            audio,
            duration_ms,
        }
    }
}

/// Split a transcript into ingestion-ready words: whitespace-separated,
/// edge punctuation trimmed, empties dropped.
pub fn split_words(transcript: &str) -> Vec<String> {
    transcript
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Events emitted toward the dialogue/scene layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UtteranceAdded(UtteranceRecord),
}

/// Wall-clock milliseconds, used to derive synthetic utterance ids.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct SessionInner {
    mic_active: bool,
    last_error: String,
}

/// Session state shared across components. Replaces the module-level
/// connection/mic globals of the legacy design with an owned object so
/// multiple sessions can coexist and tests stay deterministic.
#[derive(Clone)]
pub struct SharedSession {
    connection: Arc<ConnectionTracker>,
    inner: Arc<Mutex<SessionInner>>,
}

impl Default for SharedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSession {
    pub fn new() -> Self {
        Self {
            connection: Arc::new(ConnectionTracker::new()),
            inner: Arc::new(Mutex::new(SessionInner {
                mic_active: false,
                last_error: String::new(),
            })),
        }
    }

    pub fn connection(&self) -> &ConnectionTracker {
        &self.connection
    }

    pub fn mic_active(&self) -> bool {
        self.inner.lock().unwrap().mic_active
    }

    pub fn set_mic_active(&self, active: bool) {
        self.inner.lock().unwrap().mic_active = active;
    }

    pub fn last_error(&self) -> String {
        self.inner.lock().unwrap().last_error.clone()
    }

    pub fn set_last_error(&self, message: String) {
        self.inner.lock().unwrap().last_error = message;
    }

    /// Session cleanup: connection back to idle, flags cleared.
    pub fn reset(&self) {
        self.connection.reset();
        let mut inner = self.inner.lock().unwrap();
        inner.mic_active = false;
        inner.last_error.clear();
    }
}
