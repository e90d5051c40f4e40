//! ArcSight Common Event Format rendering.
//!
//! ```text
//! CEF:0|OpenClaw|openclaw|1.0|<signatureId>|<name>|<severity>|<extensions>
//! ```

use crate::event::{EventKind, SignedEvent};
use std::fmt::Write as _;

pub const CEF_VENDOR: &str = "OpenClaw";
pub const CEF_PRODUCT: &str = "openclaw";
pub const CEF_VERSION: &str = "1.0";

/// Severity used for any failed operation.
pub const FAILURE_SEVERITY: u8 = 7;

/// Signature id, display name and baseline severity of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CefSignature {
    pub id: u16,
    pub name: &'static str,
    pub severity: u8,
}

pub fn signature(kind: &EventKind) -> CefSignature {
    let (id, name, severity) = match kind {
        EventKind::ToolStart { .. } => (1001, "Tool Invocation Started", 3),
        EventKind::ToolEnd { .. } => (1002, "Tool Invocation Completed", 3),
        EventKind::MessageIn { .. } => (2001, "Message Received", 3),
        EventKind::MessageOut { .. } => (2002, "Message Sent", 3),
        EventKind::LlmUsage { .. } => (3001, "LLM Usage", 2),
        EventKind::AgentStart { .. } => (4001, "Agent Started", 3),
        EventKind::AgentEnd { .. } => (4002, "Agent Completed", 3),
    };
    CefSignature { id, name, severity }
}

/// Effective CEF severity (0-10).
pub fn severity(kind: &EventKind) -> u8 {
    if kind.is_failure() {
        FAILURE_SEVERITY
    } else {
        signature(kind).severity
    }
}

/// Render one event as a CEF line without any syslog framing.
pub fn format_cef(signed: &SignedEvent) -> String {
    let event = &signed.event;
    let sig = signature(&event.kind);

    let mut ext = Extensions::default();
    ext.push("rt", event.ts);

    match &event.kind {
        EventKind::ToolStart { tool_name, .. } => {
            ext.push("act", tool_name);
        }
        EventKind::ToolEnd {
            tool_name,
            duration_ms,
            ..
        } => {
            ext.push("act", tool_name);
            ext.push_opt("cn1", *duration_ms);
            if duration_ms.is_some() {
                ext.push("cn1Label", "durationMs");
            }
        }
        EventKind::MessageIn {
            channel,
            from,
            content_length,
        } => {
            ext.push("act", channel);
            ext.push("suser", from);
            ext.push("cn2", content_length);
            ext.push("cn2Label", "contentLength");
        }
        EventKind::MessageOut { channel, to, .. } => {
            ext.push("act", channel);
            ext.push("duser", to);
        }
        EventKind::LlmUsage {
            provider,
            model,
            input_tokens,
            output_tokens,
            cache_tokens,
            duration_ms,
            cost_usd,
        } => {
            if let Some(provider) = provider {
                ext.push("cs3", provider);
                ext.push("cs3Label", "provider");
            }
            if let Some(model) = model {
                ext.push("cs4", model);
                ext.push("cs4Label", "model");
            }
            ext.push_opt("inputTokens", *input_tokens);
            ext.push_opt("outputTokens", *output_tokens);
            ext.push_opt("cacheTokens", *cache_tokens);
            if let Some(duration) = duration_ms {
                ext.push("cn1", duration);
                ext.push("cn1Label", "durationMs");
            }
            if let Some(cost) = cost_usd {
                ext.push("cfp1", cost);
                ext.push("cfp1Label", "costUsd");
            }
        }
        EventKind::AgentStart { prompt_length } => {
            ext.push("cn2", prompt_length);
            ext.push("cn2Label", "promptLength");
        }
        EventKind::AgentEnd { duration_ms, .. } => {
            if let Some(duration) = duration_ms {
                ext.push("cn1", duration);
                ext.push("cn1Label", "durationMs");
            }
        }
    }

    if let Some(success) = event.kind.success() {
        let outcome = if success && !event.kind.is_failure() {
            "success"
        } else {
            "failure"
        };
        ext.push("outcome", outcome);
    }
    if let Some(error) = event.kind.error().filter(|e| !e.is_empty()) {
        ext.push("msg", error);
    }

    if let Some(session) = &event.session_key {
        ext.push("cs1", session);
        ext.push("cs1Label", "sessionKey");
    }
    if let Some(agent) = &event.agent_id {
        ext.push("cs2", agent);
        ext.push("cs2Label", "agentId");
    }
    ext.push("cn3", event.seq);
    ext.push("cn3Label", "seq");

    if let Some(hash) = signed.hash() {
        ext.push("cs6", hash);
        ext.push("cs6Label", "hash");
    }

    format!(
        "CEF:0|{}|{}|{}|{}|{}|{}|{}",
        escape_header(CEF_VENDOR),
        escape_header(CEF_PRODUCT),
        escape_header(CEF_VERSION),
        sig.id,
        escape_header(sig.name),
        severity(&event.kind),
        ext.finish()
    )
}

#[derive(Default)]
struct Extensions {
    out: String,
}

impl Extensions {
    fn push(&mut self, key: &str, value: impl ToString) {
        if !self.out.is_empty() {
            self.out.push(' ');
        }
        let _ = write!(self.out, "{}={}", key, escape_extension(&value.to_string()));
    }

    fn push_opt<T: ToString>(&mut self, key: &str, value: Option<T>) {
        if let Some(value) = value {
            self.push(key, value);
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Escape a CEF header field (`\` and `|`).
pub fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a CEF extension value (`\`, `=`, CR and LF).
pub fn escape_extension(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
