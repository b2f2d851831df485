//! # Agent Wire Protocol
//!
//! Message types exchanged over the `/ws/agent/v1` WebSocket connection and
//! the action-plan model they carry.
//!
//! ## Envelope Format:
//! Text frames are JSON envelopes of the form
//! `{ "type": "...", "payload": { ... } }`. Binary frames carry raw audio
//! chunks and have no envelope.
//!
//! ## Direction:
//! - **Client to Server**: `CONTEXT_UPDATE`, `EXECUTION_RESULT`, `AUDIO_END`,
//!   `TEXT_COMMAND`, `AUDIO_CHUNK_BASE64`, plus binary audio chunks
//! - **Server to Client**: `AGENT_SPEAK`, `ACTION_DISPATCH`

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages received from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Snapshot of the UI state the client is currently showing.
    #[serde(rename = "CONTEXT_UPDATE")]
    ContextUpdate(UserContext),

    /// Outcome of a previously dispatched action plan.
    #[serde(rename = "EXECUTION_RESULT")]
    ExecutionResult(ExecutionResult),

    /// End of the current utterance; the accumulated audio should be processed.
    #[serde(rename = "AUDIO_END")]
    AudioEnd,

    /// A typed command, bypassing the audio path entirely.
    #[serde(rename = "TEXT_COMMAND")]
    TextCommand { text: String },

    /// Audio chunk delivered as base64 text instead of a binary frame.
    #[serde(rename = "AUDIO_CHUNK_BASE64")]
    AudioChunkBase64 { data: String },
}

/// Messages sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Spoken (or client-spoken) response to the user.
    #[serde(rename = "AGENT_SPEAK")]
    AgentSpeak(AgentSpeak),

    /// An action plan for the client to execute.
    #[serde(rename = "ACTION_DISPATCH")]
    ActionDispatch(ActionPlan),
}

/// Last-known UI state reported by the client. Overwritten wholesale on each
/// `CONTEXT_UPDATE`; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    /// Current URL (client-side route).
    pub url: String,

    /// Accessibility ids of the interactive elements currently visible.
    #[serde(default)]
    pub aria_ids: Vec<String>,

    /// BCP-47-ish locale tag.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Optional screen metadata (viewport, scroll position, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<serde_json::Value>,

    /// Client timestamp (milliseconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

fn default_locale() -> String {
    "en".to_string()
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            url: String::new(),
            aria_ids: Vec::new(),
            locale: default_locale(),
            screen: None,
            ts: None,
        }
    }
}

/// Execution outcome reported by the client for a dispatched plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Payload of an `AGENT_SPEAK` frame.
///
/// When synthesis is unavailable, `audio_base64` is `None` and
/// `use_browser_tts` tells the client to speak the text itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpeak {
    pub audio_base64: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub use_browser_tts: bool,
}

impl AgentSpeak {
    /// Reply carrying synthesized audio.
    pub fn with_audio(text: impl Into<String>, audio_base64: String, mime_type: &str) -> Self {
        Self {
            audio_base64: Some(audio_base64),
            text: text.into(),
            mime_type: Some(mime_type.to_string()),
            use_browser_tts: false,
        }
    }

    /// Text-only reply flagged for client-side fallback speech.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            audio_base64: None,
            text: text.into(),
            mime_type: None,
            use_browser_tts: true,
        }
    }
}

/// Element reference used by `fill` and `click` steps. At least one of the
/// two locators is expected to be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StepTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

/// One unit of UI automation. The kind set is closed: an unknown `kind` (or a
/// kind missing its required fields) is rejected at deserialization instead
/// of being silently carried along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    /// Go to a client-side route.
    Navigate { url: String },
    /// Fill a form field.
    Fill { target: StepTarget, value: String },
    /// Click an element.
    Click { target: StepTarget },
    /// Say something to the user.
    Speak { text: String },
}

/// Plan metadata attached by the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanMeta {
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An ordered sequence of steps produced for one user command. Immutable once
/// returned by the generator; referenced later by `plan_id` in
/// `EXECUTION_RESULT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionPlan {
    /// Unique per command. Filled in locally when the upstream response
    /// omits it.
    #[serde(default)]
    pub plan_id: String,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub meta: PlanMeta,
}

impl ActionPlan {
    /// Generate a fresh plan id.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Text of the first `speak` step, used as the spoken acknowledgement.
    pub fn first_speak_text(&self) -> Option<&str> {
        self.steps.iter().find_map(|step| match step {
            Step::Speak { text } => Some(text.as_str()),
            _ => None,
        })
    }
}
