//! Outcome and state types reported by a Render Backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure surface of the backend primitives.
///
/// The executor maps these into the closed [`ActionStatus`] taxonomy;
/// backend implementations must not invent failure shapes outside this
/// enum.
///
/// [`ActionStatus`]: drover_protocol::ActionStatus
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("no element matches selector {selector}")]
    ElementNotFound { selector: String },
    #[error("selector {selector} matches {count} elements")]
    MultipleElements { selector: String, count: u32 },
    #[error("element {selector} is not visible")]
    NotVisible { selector: String },
    #[error("element {selector} is not interactable")]
    NotInteractable { selector: String },
    #[error("invalid selector {selector}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("element {selector} detached mid-action")]
    StaleElement { selector: String },
    #[error("pointer action on {selector} intercepted by {by}")]
    Intercepted { selector: String, by: String },
    #[error("typed {typed} of {requested} characters into {selector}")]
    PartialInput {
        selector: String,
        typed: u32,
        requested: u32,
    },
    #[error("navigation to {url} failed: {message}")]
    NavigationFailed { url: String, message: String },
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },
    #[error("network error {code} fetching {url}")]
    Network { url: String, code: i32 },
    #[error("script error: {0}")]
    Script(String),
    #[error("backend operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("target closed")]
    TargetClosed,
    /// Action-specific failure with no dedicated kind; the executor maps
    /// it by the action that was running.
    #[error("{0}")]
    ActionFailed(String),
    #[error("{0}")]
    Internal(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Observed state of the elements matching one selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementState {
    pub count: u32,
    pub visible: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    pub text: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

impl ElementState {
    /// State reported when nothing matches the selector.
    pub fn absent() -> Self {
        Self {
            count: 0,
            visible: false,
            enabled: false,
            checked: None,
            text: String::new(),
            value: String::new(),
            bounds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Point-in-time view of a page, used by post-condition checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    /// Bumped by the backend whenever the DOM mutates observably.
    pub dom_revision: u64,
    pub loading: bool,
    pub inflight_requests: u32,
}

impl PageSnapshot {
    /// No in-flight navigation or pending network activity.
    pub fn is_settled(&self) -> bool {
        !self.loading && self.inflight_requests == 0
    }
}

/// Result of a completed navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationOutcome {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}
