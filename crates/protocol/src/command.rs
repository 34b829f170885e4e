//! Typed command decoding for the line-oriented request protocol.
//!
//! One JSON object per line, internally tagged by `method`:
//!
//! ```json
//! {"id": 7, "method": "click", "context_id": "ctx-3", "selector": "#submit"}
//! ```
//!
//! Decoding is a structured serde step per method rather than hand-rolled
//! field scanning; unknown methods surface as decode errors carrying the
//! request id when it could be recovered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::VerificationLevel;

/// When a navigation is considered complete enough to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Navigation committed; document may still be loading.
    Commit,
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// What a screenshot captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Viewport,
    FullPage,
}

/// A parsed protocol request: correlation id plus a typed method payload.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: i64,
    pub kind: CommandKind,
}

/// Method payloads, tagged by wire method name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CommandKind {
    CreateContext {
        #[serde(default)]
        profile: Option<Value>,
        #[serde(default)]
        proxy: Option<Value>,
        #[serde(default)]
        block_resources: bool,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    CloseContext {
        context_id: String,
    },
    ReleaseContext {
        context_id: String,
    },
    ListContexts,
    Ping,
    Shutdown,

    Navigate {
        context_id: String,
        url: String,
        #[serde(default)]
        wait: WaitPolicy,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Click {
        context_id: String,
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Type {
        context_id: String,
        selector: String,
        text: String,
        #[serde(default)]
        clear: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Press {
        context_id: String,
        key: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Select {
        context_id: String,
        selector: String,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Hover {
        context_id: String,
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Scroll {
        context_id: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        dx: i64,
        #[serde(default)]
        dy: i64,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },
    Upload {
        context_id: String,
        selector: String,
        files: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        verification: Option<VerificationLevel>,
    },

    Evaluate {
        context_id: String,
        script: String,
        #[serde(default = "default_true")]
        return_value: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    QueryState {
        context_id: String,
        selector: String,
    },
    GetText {
        context_id: String,
        selector: String,
    },
    Screenshot {
        context_id: String,
        #[serde(default)]
        mode: CaptureMode,
    },
}

fn default_true() -> bool {
    true
}

impl CommandKind {
    /// Wire method name, for logging and replies.
    pub fn method_name(&self) -> &'static str {
        match self {
            CommandKind::CreateContext { .. } => "create_context",
            CommandKind::CloseContext { .. } => "close_context",
            CommandKind::ReleaseContext { .. } => "release_context",
            CommandKind::ListContexts => "list_contexts",
            CommandKind::Ping => "ping",
            CommandKind::Shutdown => "shutdown",
            CommandKind::Navigate { .. } => "navigate",
            CommandKind::Click { .. } => "click",
            CommandKind::Type { .. } => "type",
            CommandKind::Press { .. } => "press",
            CommandKind::Select { .. } => "select",
            CommandKind::Hover { .. } => "hover",
            CommandKind::Scroll { .. } => "scroll",
            CommandKind::Upload { .. } => "upload",
            CommandKind::Evaluate { .. } => "evaluate",
            CommandKind::QueryState { .. } => "query_state",
            CommandKind::GetText { .. } => "get_text",
            CommandKind::Screenshot { .. } => "screenshot",
        }
    }

    /// Target session id, when the method addresses one.
    pub fn context_id(&self) -> Option<&str> {
        match self {
            CommandKind::CreateContext { .. }
            | CommandKind::ListContexts
            | CommandKind::Ping
            | CommandKind::Shutdown => None,
            CommandKind::CloseContext { context_id }
            | CommandKind::ReleaseContext { context_id }
            | CommandKind::Navigate { context_id, .. }
            | CommandKind::Click { context_id, .. }
            | CommandKind::Type { context_id, .. }
            | CommandKind::Press { context_id, .. }
            | CommandKind::Select { context_id, .. }
            | CommandKind::Hover { context_id, .. }
            | CommandKind::Scroll { context_id, .. }
            | CommandKind::Upload { context_id, .. }
            | CommandKind::Evaluate { context_id, .. }
            | CommandKind::QueryState { context_id, .. }
            | CommandKind::GetText { context_id, .. }
            | CommandKind::Screenshot { context_id, .. } => Some(context_id),
        }
    }
}

/// A request line that could not be decoded into a [`Command`].
///
/// `id` is populated when it could be recovered from the malformed line so
/// the reply can still be correlated.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DecodeError {
    pub id: Option<i64>,
    pub message: String,
}

impl Command {
    /// Decodes one protocol line.
    pub fn parse_line(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line).map_err(|e| DecodeError {
            id: None,
            message: format!("invalid JSON: {e}"),
        })?;

        let id = value.get("id").and_then(Value::as_i64).ok_or(DecodeError {
            id: None,
            message: "missing or non-integer id".to_string(),
        })?;

        let kind = CommandKind::deserialize(&value).map_err(|e| DecodeError {
            id: Some(id),
            message: e.to_string(),
        })?;

        Ok(Self { id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_click_with_defaults() {
        let cmd = Command::parse_line(
            r##"{"id": 3, "method": "click", "context_id": "ctx-1", "selector": "#go"}"##,
        )
        .unwrap();
        assert_eq!(cmd.id, 3);
        match cmd.kind {
            CommandKind::Click {
                context_id,
                selector,
                timeout_ms,
                verification,
            } => {
                assert_eq!(context_id, "ctx-1");
                assert_eq!(selector, "#go");
                assert_eq!(timeout_ms, None);
                assert_eq!(verification, None);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_verification_override() {
        let cmd = Command::parse_line(
            r##"{"id": 1, "method": "type", "context_id": "c", "selector": "#q", "text": "hi", "verification": "strict"}"##,
        )
        .unwrap();
        match cmd.kind {
            CommandKind::Type { verification, .. } => {
                assert_eq!(verification, Some(VerificationLevel::Strict));
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_keeps_recovered_id() {
        let err = Command::parse_line(r#"{"id": 9, "method": "teleport"}"#).unwrap_err();
        assert_eq!(err.id, Some(9));
        assert!(err.message.contains("teleport"), "message: {}", err.message);
    }

    #[test]
    fn missing_id_is_a_decode_error() {
        let err = Command::parse_line(r#"{"method": "ping"}"#).unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let err = Command::parse_line("{not json").unwrap_err();
        assert_eq!(err.id, None);
        assert!(err.message.starts_with("invalid JSON"));
    }

    #[test]
    fn missing_required_field_reports_field() {
        let err =
            Command::parse_line(r#"{"id": 2, "method": "click", "context_id": "c"}"#).unwrap_err();
        assert_eq!(err.id, Some(2));
        assert!(err.message.contains("selector"), "message: {}", err.message);
    }
}
