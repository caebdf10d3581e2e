// ABOUTME: Shared wire-protocol types for the realtime data channel.
// ABOUTME: Defines outbound client events, inbound server events, and event id generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh unique event id for an outbound message.
/// Combines wall-clock millis with a process-wide counter so ids stay
/// unique even when two events are created within the same millisecond.
pub fn next_event_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("evt_{millis}_{seq}")
}

/// Messages sent to the remote peer over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear { event_id: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit { event_id: String },
    #[serde(rename = "response.create")]
    ResponseCreate { event_id: String },
    #[serde(rename = "response.cancel")]
    ResponseCancel { event_id: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        event_id: String,
        item: ConversationItem,
    },
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: SessionConfig,
    },
}

impl ClientEvent {
    pub fn clear() -> Self {
        Self::InputAudioBufferClear {
            event_id: next_event_id(),
        }
    }

    pub fn commit() -> Self {
        Self::InputAudioBufferCommit {
            event_id: next_event_id(),
        }
    }

    pub fn response_create() -> Self {
        Self::ResponseCreate {
            event_id: next_event_id(),
        }
    }

    pub fn response_cancel() -> Self {
        Self::ResponseCancel {
            event_id: next_event_id(),
        }
    }

    pub fn system_prompt(text: &str) -> Self {
        Self::ConversationItemCreate {
            event_id: next_event_id(),
            item: ConversationItem::Message {
                role: "system".to_string(),
                content: vec![ContentPart::InputText {
                    text: text.to_string(),
                }],
            },
        }
    }

    pub fn function_output(call_id: &str, output: &str) -> Self {
        Self::ConversationItemCreate {
            event_id: next_event_id(),
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.to_string(),
            },
        }
    }

    pub fn session_update(session: SessionConfig) -> Self {
        Self::SessionUpdate {
            event_id: next_event_id(),
            session,
        }
    }

    /// The event id carried by this message.
    pub fn event_id(&self) -> &str {
        match self {
            Self::InputAudioBufferClear { event_id }
            | Self::InputAudioBufferCommit { event_id }
            | Self::ResponseCreate { event_id }
            | Self::ResponseCancel { event_id }
            | Self::ConversationItemCreate { event_id, .. }
            | Self::SessionUpdate { event_id, .. } => event_id,
        }
    }
}

/// A conversation item created by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// Session configuration pushed after the data channel opens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

/// Token usage as reported by the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Summary attached to a `response.done` event.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResponseSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageReport>,
}

/// Messages received from the remote peer over the data channel.
/// Unrecognized message types parse as `Unknown` so one new server-side
/// event kind cannot break the router.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        response_id: Option<String>,
        text: String,
    },
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted {
        #[serde(default)]
        response_id: Option<String>,
    },
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped {
        #[serde(default)]
        response_id: Option<String>,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        transcript: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        arguments: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseSummary>,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}
