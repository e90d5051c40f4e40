//! # Telemetry Events
//!
//! The closed set of lifecycle events recorded by the sink. Each event is a
//! variant tag (`type`) with its own payload plus a shared base: `seq`, `ts`
//! and optional session/agent context.
//!
//! Serialized field order is fixed by declaration order: `type`, the variant
//! fields, `sessionKey`, `agentId`, `seq`, `ts`. The integrity chain hashes
//! exactly these bytes, so the order must never change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Variant tag plus variant-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "tool.start", rename_all = "camelCase")]
    ToolStart {
        tool_name: String,
        #[serde(default)]
        params: Map<String, Value>,
    },

    #[serde(rename = "tool.end", rename_all = "camelCase")]
    ToolEnd {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "message.in", rename_all = "camelCase")]
    MessageIn {
        channel: String,
        from: String,
        content_length: u64,
    },

    #[serde(rename = "message.out", rename_all = "camelCase")]
    MessageOut {
        channel: String,
        to: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "llm.usage", rename_all = "camelCase")]
    LlmUsage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },

    #[serde(rename = "agent.start", rename_all = "camelCase")]
    AgentStart { prompt_length: u64 },

    #[serde(rename = "agent.end", rename_all = "camelCase")]
    AgentEnd {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EventKind {
    /// The wire tag, e.g. `tool.start`.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::ToolStart { .. } => "tool.start",
            EventKind::ToolEnd { .. } => "tool.end",
            EventKind::MessageIn { .. } => "message.in",
            EventKind::MessageOut { .. } => "message.out",
            EventKind::LlmUsage { .. } => "llm.usage",
            EventKind::AgentStart { .. } => "agent.start",
            EventKind::AgentEnd { .. } => "agent.end",
        }
    }

    /// Explicit success flag, for variants that carry one.
    pub fn success(&self) -> Option<bool> {
        match self {
            EventKind::ToolEnd { success, .. }
            | EventKind::MessageOut { success, .. }
            | EventKind::AgentEnd { success, .. } => Some(*success),
            _ => None,
        }
    }

    /// Error message, for variants that carry one.
    pub fn error(&self) -> Option<&str> {
        match self {
            EventKind::ToolEnd { error, .. }
            | EventKind::MessageOut { error, .. }
            | EventKind::AgentEnd { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// True when the event reports `success: false` or a non-empty error.
    pub fn is_failure(&self) -> bool {
        self.success() == Some(false) || self.error().is_some_and(|e| !e.is_empty())
    }
}

/// What the host submits: an event without `seq`/`ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    #[serde(flatten)]
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl EventInput {
    pub fn new(kind: EventKind) -> Self {
        EventInput {
            kind,
            session_key: None,
            agent_id: None,
        }
    }

    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

impl From<EventKind> for EventInput {
    fn from(kind: EventKind) -> Self {
        EventInput::new(kind)
    }
}

/// A stamped event as recorded by the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(flatten)]
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    pub seq: u64,

    pub ts: u64,
}

impl TelemetryEvent {
    /// Stamp a host submission with its sequence number and timestamp.
    pub fn stamp(input: EventInput, seq: u64, ts: u64) -> Self {
        TelemetryEvent {
            kind: input.kind,
            session_key: input.session_key,
            agent_id: input.agent_id,
            seq,
            ts,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Link fields added by the integrity chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    pub prev_hash: String,
    pub hash: String,
}

/// An event after the integrity stage. `link` is `None` when chaining is
/// disabled, in which case no hash fields appear on the wire at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedEvent {
    #[serde(flatten)]
    pub event: TelemetryEvent,

    #[serde(flatten)]
    pub link: Option<ChainLink>,
}

impl SignedEvent {
    pub fn unsigned(event: TelemetryEvent) -> Self {
        SignedEvent { event, link: None }
    }

    pub fn hash(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.hash.as_str())
    }

    pub fn prev_hash(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.prev_hash.as_str())
    }

    /// Parse one recorded JSONL line back into a signed event.
    ///
    /// The hash fields are split off before the remainder is decoded as a
    /// [`TelemetryEvent`], so re-serializing `event` yields the bytes that
    /// were originally hashed.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(line)?;
        let link = match value.as_object_mut() {
            Some(obj) => {
                let prev = obj.remove("prevHash");
                let hash = obj.remove("hash");
                match (prev, hash) {
                    (Some(Value::String(prev_hash)), Some(Value::String(hash))) => {
                        Some(ChainLink { prev_hash, hash })
                    }
                    _ => None,
                }
            }
            None => None,
        };
        let event = serde_json::from_value(value)?;
        Ok(SignedEvent { event, link })
    }
}
