//! Action outcome taxonomy shared by every layer above the Render Backend.

use serde::{Deserialize, Serialize};

/// How thoroughly an action's effect is confirmed before returning.
///
/// Ordered: each level implies everything the previous one checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Fire the primitive and return immediately.
    None,
    /// Pre-condition check only (target exists, is visible).
    Basic,
    /// Pre-condition check plus a bounded post-condition poll.
    #[default]
    Standard,
    /// Standard plus a wait for document/network quiescence.
    Strict,
}

/// Closed status taxonomy for action outcomes.
///
/// Every action resolves to exactly one of these; nothing above the
/// executor invents new failure shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    /// The action fired but its effect could not be confirmed within the
    /// verification window. Reported as a soft success: the primitive very
    /// likely completed.
    VerificationTimeout,

    // Admission / addressing
    BrowserNotFound,
    ContextNotFound,
    ResourceExhausted,
    MemoryPressure,

    // Pre-condition
    ElementNotFound,
    ElementNotVisible,
    ElementNotInteractable,
    MultipleElements,
    StaleElement,
    InvalidSelector,

    // Execution
    ClickIntercepted,
    TypePartial,
    SelectFailed,
    UploadFailed,
    ScrollFailed,
    HoverFailed,
    FocusFailed,
    NavigationFailed,
    NavigationTimeout,
    HttpError,
    NetworkError,
    ScriptError,
    ScriptTimeout,
    CaptureFailed,

    // Caller / lifecycle
    InvalidArgument,
    Interrupted,
    Timeout,
    InternalError,
}

impl ActionStatus {
    /// Whether this status counts as a success on the wire.
    ///
    /// `VerificationTimeout` is deliberately a success: the primitive was
    /// fired and only the confirmation ran out of time.
    pub fn is_success(self) -> bool {
        matches!(self, ActionStatus::Ok | ActionStatus::VerificationTimeout)
    }
}

/// Immutable outcome of one action against one session.
///
/// Built only through the constructors below, which keep `success`
/// consistent with `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub status: ActionStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_count: Option<u32>,
}

impl ActionResult {
    /// A plain success.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Ok, message)
    }

    /// Soft success: the action fired but could not be confirmed in time.
    pub fn verification_timeout(message: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::VerificationTimeout, message)
    }

    /// An outcome with the given status; `success` is derived, never passed.
    pub fn with_status(status: ActionStatus, message: impl Into<String>) -> Self {
        Self {
            success: status.is_success(),
            status,
            message: message.into(),
            selector: None,
            url: None,
            http_status: None,
            error_code: None,
            element_count: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_element_count(mut self, count: u32) -> Self {
        self.element_count = Some(count);
        self
    }

    /// Success that still warrants a warning signal upstream.
    pub fn is_soft_success(&self) -> bool {
        self.status == ActionStatus::VerificationTimeout
    }
}
