//! Executes one primitive action with the requested verification level.
//!
//! The state machine per call is: resolve target (caller), pre-condition
//! check, fire the primitive, post-condition poll, optional stabilization
//! wait. A post-check still pending at its deadline resolves to the
//! `verification_timeout` soft success, never a hard failure: the
//! primitive was fired and very likely landed.

mod verify;

use std::time::Duration;

use drover_protocol::{ActionResult, ActionStatus, CaptureMode, VerificationLevel, WaitPolicy};
use drover_runtime::{BackendError, PageSnapshot};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::session::Session;

pub use verify::VerifyWindow;

/// One primitive to run against a session.
#[derive(Debug, Clone)]
pub enum Action {
    Navigate { url: String, wait: WaitPolicy },
    Click { selector: String },
    Type { selector: String, text: String, clear: bool },
    Press { key: String },
    Select { selector: String, value: String },
    Hover { selector: String },
    Scroll { selector: Option<String>, dx: i64, dy: i64 },
    Upload { selector: String, files: Vec<String> },
    Evaluate { script: String, return_value: bool },
    Query { selector: String },
    GetText { selector: String },
    Capture { mode: CaptureMode },
}

impl Action {
    fn kind_name(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Press { .. } => "press",
            Action::Select { .. } => "select",
            Action::Hover { .. } => "hover",
            Action::Scroll { .. } => "scroll",
            Action::Upload { .. } => "upload",
            Action::Evaluate { .. } => "evaluate",
            Action::Query { .. } => "query_state",
            Action::GetText { .. } => "get_text",
            Action::Capture { .. } => "screenshot",
        }
    }

    /// Selector the pre-condition check inspects, if any.
    fn precheck_selector(&self) -> Option<&str> {
        match self {
            Action::Click { selector }
            | Action::Type { selector, .. }
            | Action::Select { selector, .. }
            | Action::Hover { selector }
            | Action::Upload { selector, .. } => Some(selector),
            Action::Scroll { selector, .. } => selector.as_deref(),
            _ => None,
        }
    }

    /// Whether the pre-check also requires the target to be enabled.
    fn needs_interactable(&self) -> bool {
        matches!(
            self,
            Action::Click { .. }
                | Action::Type { .. }
                | Action::Select { .. }
                | Action::Upload { .. }
        )
    }

    /// Read-only primitives bypass the verification ladder entirely.
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            Action::Evaluate { .. }
                | Action::Query { .. }
                | Action::GetText { .. }
                | Action::Capture { .. }
        )
    }
}

/// Verification outcome plus any payload to merge into the reply.
#[derive(Debug)]
pub struct ActionOutput {
    pub result: ActionResult,
    pub data: Option<Map<String, Value>>,
}

impl ActionOutput {
    fn bare(result: ActionResult) -> Self {
        Self { result, data: None }
    }

    fn with_data(result: ActionResult, data: Map<String, Value>) -> Self {
        Self {
            result,
            data: Some(data),
        }
    }
}

/// Stateless executor; cheap to clone into parallel dispatch tasks.
#[derive(Debug, Clone, Copy)]
pub struct ActionExecutor {
    verify_timeout: Duration,
    verify_poll: Duration,
    stabilize_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            verify_timeout: config.verify_timeout(),
            verify_poll: config.verify_poll(),
            stabilize_timeout: config.stabilize_timeout(),
        }
    }

    /// Runs one action to a single [`ActionResult`]; never errors out of
    /// this function. Callers resolve the session first - a missing
    /// session is their fail-fast path.
    pub async fn execute(
        &self,
        session: &Session,
        action: Action,
        level: VerificationLevel,
        timeout: Duration,
    ) -> ActionOutput {
        debug!(
            target = "drover.exec",
            context_id = %session.id(),
            action = action.kind_name(),
            ?level,
            "executing action"
        );

        if action.is_read_only() {
            return self.execute_read(session, &action, timeout).await;
        }

        // Pre-condition: target exists, is unambiguous, visible, and
        // (for input actions) interactable.
        if level >= VerificationLevel::Basic {
            if let Some(selector) = action.precheck_selector() {
                if let Err(result) = self.precheck(session, selector, action.needs_interactable()).await {
                    return ActionOutput::bare(result);
                }
            }
        }

        let pre = if level >= VerificationLevel::Standard {
            match session.handle().snapshot().await {
                Ok(snapshot) => Some(snapshot),
                Err(err) => return ActionOutput::bare(map_backend_error(&action, err)),
            }
        } else {
            None
        };

        let fired = match self.fire(session, &action, timeout).await {
            Ok(output) => output,
            Err(result) => return ActionOutput::bare(result),
        };

        // A primitive that reported its own failure is final; verification
        // only ever confirms successes.
        if level < VerificationLevel::Standard || fired.result.status != ActionStatus::Ok {
            return fired;
        }

        let Some(pre) = pre else {
            return fired;
        };
        let window = VerifyWindow::new(self.verify_timeout, self.verify_poll);
        let confirmed = self.confirm(session, &action, &pre, &window).await;
        let result = match confirmed {
            Ok(true) => fired.result,
            Ok(false) => soft_timeout(&action),
            Err(result) => return ActionOutput::bare(result),
        };

        if level >= VerificationLevel::Strict && result.status == ActionStatus::Ok {
            let window = VerifyWindow::new(self.stabilize_timeout, self.verify_poll);
            match self.wait_settled(session, &window).await {
                Ok(true) => {}
                Ok(false) => {
                    return ActionOutput {
                        result: ActionResult::verification_timeout(format!(
                            "{} done but the page did not stabilize in time",
                            action.kind_name()
                        )),
                        data: fired.data,
                    };
                }
                Err(result) => return ActionOutput::bare(result),
            }
        }

        ActionOutput {
            result,
            data: fired.data,
        }
    }

    async fn precheck(
        &self,
        session: &Session,
        selector: &str,
        needs_interactable: bool,
    ) -> Result<(), ActionResult> {
        let state = session
            .handle()
            .query(selector)
            .await
            .map_err(|err| map_query_error(selector, err))?;

        if state.count == 0 {
            return Err(ActionResult::with_status(
                ActionStatus::ElementNotFound,
                format!("no element matches {selector}"),
            )
            .with_selector(selector));
        }
        if state.count > 1 {
            // Ambiguous selectors are always an error, never first-match.
            return Err(ActionResult::with_status(
                ActionStatus::MultipleElements,
                format!("{selector} matches {} elements", state.count),
            )
            .with_selector(selector)
            .with_element_count(state.count));
        }
        if !state.visible {
            return Err(ActionResult::with_status(
                ActionStatus::ElementNotVisible,
                format!("{selector} is not visible"),
            )
            .with_selector(selector));
        }
        if needs_interactable && !state.enabled {
            return Err(ActionResult::with_status(
                ActionStatus::ElementNotInteractable,
                format!("{selector} is not interactable"),
            )
            .with_selector(selector));
        }
        Ok(())
    }

    /// Fires the primitive, mapping failures into the status taxonomy.
    async fn fire(
        &self,
        session: &Session,
        action: &Action,
        timeout: Duration,
    ) -> Result<ActionOutput, ActionResult> {
        let handle = session.handle();
        // Outer guard so a stalled backend still resolves near the stated
        // timeout instead of hanging the slot.
        let guard = timeout + Duration::from_millis(250);

        let outcome = tokio::time::timeout(guard, async {
            match action {
                Action::Navigate { url, wait } => {
                    let outcome = handle.navigate(url, *wait, timeout).await?;
                    let status = outcome.http_status.unwrap_or(200);
                    if status >= 400 {
                        return Ok(ActionOutput::bare(
                            ActionResult::with_status(
                                ActionStatus::HttpError,
                                format!("HTTP {status} from {url}"),
                            )
                            .with_url(url.clone())
                            .with_http_status(status),
                        ));
                    }
                    let mut result =
                        ActionResult::ok(format!("navigated to {}", outcome.url)).with_url(outcome.url.clone());
                    result.http_status = outcome.http_status;
                    Ok(ActionOutput::bare(result))
                }
                Action::Click { selector } => {
                    handle.click(selector, timeout).await?;
                    Ok(ActionOutput::bare(
                        ActionResult::ok(format!("clicked {selector}")).with_selector(selector.clone()),
                    ))
                }
                Action::Type { selector, text, clear } => {
                    handle.type_text(selector, text, *clear, timeout).await?;
                    Ok(ActionOutput::bare(
                        ActionResult::ok(format!("typed {} characters into {selector}", text.chars().count()))
                            .with_selector(selector.clone()),
                    ))
                }
                Action::Press { key } => {
                    handle.press(key, timeout).await?;
                    Ok(ActionOutput::bare(ActionResult::ok(format!("pressed {key}"))))
                }
                Action::Select { selector, value } => {
                    handle.select(selector, value, timeout).await?;
                    Ok(ActionOutput::bare(
                        ActionResult::ok(format!("selected {value:?} in {selector}"))
                            .with_selector(selector.clone()),
                    ))
                }
                Action::Hover { selector } => {
                    handle.hover(selector, timeout).await?;
                    Ok(ActionOutput::bare(
                        ActionResult::ok(format!("hovering {selector}")).with_selector(selector.clone()),
                    ))
                }
                Action::Scroll { selector, dx, dy } => {
                    handle.scroll(selector.as_deref(), *dx, *dy, timeout).await?;
                    Ok(ActionOutput::bare(ActionResult::ok(format!("scrolled by ({dx}, {dy})"))))
                }
                Action::Upload { selector, files } => {
                    handle.upload(selector, files, timeout).await?;
                    Ok(ActionOutput::bare(
                        ActionResult::ok(format!("staged {} file(s) on {selector}", files.len()))
                            .with_selector(selector.clone()),
                    ))
                }
                _ => unreachable!("read-only actions take execute_read"),
            }
        })
        .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(map_backend_error(action, err)),
            Err(_elapsed) => Err(map_backend_error(action, BackendError::Timeout(timeout))),
        }
    }

    async fn execute_read(
        &self,
        session: &Session,
        action: &Action,
        timeout: Duration,
    ) -> ActionOutput {
        let handle = session.handle();
        let guard = timeout + Duration::from_millis(250);

        let outcome = tokio::time::timeout(guard, async {
            match action {
                Action::Evaluate { script, return_value } => {
                    let value = handle.evaluate(script, *return_value, timeout).await?;
                    let mut data = Map::new();
                    data.insert("value".to_string(), Value::String(value));
                    Ok(ActionOutput::with_data(ActionResult::ok("script evaluated"), data))
                }
                Action::Query { selector } => {
                    let state = handle.query(selector).await?;
                    let count = state.count;
                    let mut data = Map::new();
                    data.insert(
                        "state".to_string(),
                        serde_json::to_value(&state).unwrap_or(Value::Null),
                    );
                    Ok(ActionOutput::with_data(
                        ActionResult::ok(format!("{count} element(s) match {selector}"))
                            .with_selector(selector.clone())
                            .with_element_count(count),
                        data,
                    ))
                }
                Action::GetText { selector } => {
                    let state = handle.query(selector).await?;
                    if state.count == 0 {
                        return Ok(ActionOutput::bare(
                            ActionResult::with_status(
                                ActionStatus::ElementNotFound,
                                format!("no element matches {selector}"),
                            )
                            .with_selector(selector.clone()),
                        ));
                    }
                    if state.count > 1 {
                        return Ok(ActionOutput::bare(
                            ActionResult::with_status(
                                ActionStatus::MultipleElements,
                                format!("{selector} matches {} elements", state.count),
                            )
                            .with_selector(selector.clone())
                            .with_element_count(state.count),
                        ));
                    }
                    let mut data = Map::new();
                    data.insert("text".to_string(), Value::String(state.text));
                    Ok(ActionOutput::with_data(
                        ActionResult::ok(format!("text of {selector}")).with_selector(selector.clone()),
                        data,
                    ))
                }
                Action::Capture { mode } => {
                    let bytes = handle.capture(*mode).await?;
                    let mut data = Map::new();
                    data.insert(
                        "image_base64".to_string(),
                        Value::String(drover_protocol::encode_image(&bytes)),
                    );
                    data.insert("mode".to_string(), json!(mode));
                    Ok(ActionOutput::with_data(
                        ActionResult::ok(format!("captured {} bytes", bytes.len())),
                        data,
                    ))
                }
                _ => unreachable!("write actions take fire"),
            }
        })
        .await;

        match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => ActionOutput::bare(map_backend_error(action, err)),
            Err(_elapsed) => {
                ActionOutput::bare(map_backend_error(action, BackendError::Timeout(timeout)))
            }
        }
    }

    /// Bounded post-condition poll. `Ok(true)` means confirmed, `Ok(false)`
    /// means the window closed first (the soft-success branch).
    async fn confirm(
        &self,
        session: &Session,
        action: &Action,
        pre: &PageSnapshot,
        window: &VerifyWindow,
    ) -> Result<bool, ActionResult> {
        loop {
            let done = self.check_effect(session, action, pre).await?;
            if done {
                return Ok(true);
            }
            if !window.wait().await {
                // Pending exactly at the deadline counts as a timeout.
                return Ok(false);
            }
        }
    }

    async fn check_effect(
        &self,
        session: &Session,
        action: &Action,
        pre: &PageSnapshot,
    ) -> Result<bool, ActionResult> {
        let handle = session.handle();
        match action {
            Action::Navigate { url, .. } => {
                let snapshot = handle
                    .snapshot()
                    .await
                    .map_err(|err| map_backend_error(action, err))?;
                Ok(&snapshot.url == url)
            }
            Action::Click { .. } | Action::Press { .. } => {
                let snapshot = handle
                    .snapshot()
                    .await
                    .map_err(|err| map_backend_error(action, err))?;
                Ok(snapshot.dom_revision != pre.dom_revision || snapshot.url != pre.url)
            }
            Action::Type { selector, text, clear } => {
                let state = handle
                    .query(selector)
                    .await
                    .map_err(|err| map_query_error(selector, err))?;
                Ok(if *clear {
                    &state.value == text
                } else {
                    state.value.contains(text.as_str())
                })
            }
            Action::Select { selector, value } => {
                let state = handle
                    .query(selector)
                    .await
                    .map_err(|err| map_query_error(selector, err))?;
                Ok(&state.value == value)
            }
            Action::Upload { selector, .. } => {
                let state = handle
                    .query(selector)
                    .await
                    .map_err(|err| map_query_error(selector, err))?;
                Ok(!state.value.is_empty())
            }
            // No observable post-condition; confirmed by construction.
            Action::Hover { .. } | Action::Scroll { .. } => Ok(true),
            _ => Ok(true),
        }
    }

    async fn wait_settled(
        &self,
        session: &Session,
        window: &VerifyWindow,
    ) -> Result<bool, ActionResult> {
        loop {
            let snapshot = session
                .handle()
                .snapshot()
                .await
                .map_err(|err| ActionResult::with_status(ActionStatus::InternalError, err.to_string()))?;
            if snapshot.is_settled() {
                return Ok(true);
            }
            if !window.wait().await {
                return Ok(false);
            }
        }
    }
}

fn soft_timeout(action: &Action) -> ActionResult {
    let mut result = ActionResult::verification_timeout(format!(
        "{} fired but its effect was not confirmed in time",
        action.kind_name()
    ));
    if let Some(selector) = action.precheck_selector() {
        result = result.with_selector(selector);
    }
    result
}

fn map_query_error(selector: &str, err: BackendError) -> ActionResult {
    match err {
        BackendError::InvalidSelector { message, .. } => ActionResult::with_status(
            ActionStatus::InvalidSelector,
            format!("invalid selector {selector}: {message}"),
        )
        .with_selector(selector),
        BackendError::TargetClosed => ActionResult::with_status(
            ActionStatus::Interrupted,
            "context closed mid-action".to_string(),
        ),
        other => ActionResult::with_status(ActionStatus::InternalError, other.to_string()),
    }
}

/// Collapses a backend failure into the closed status taxonomy.
fn map_backend_error(action: &Action, err: BackendError) -> ActionResult {
    let message = err.to_string();
    match err {
        BackendError::ElementNotFound { selector } => {
            ActionResult::with_status(ActionStatus::ElementNotFound, message).with_selector(selector)
        }
        BackendError::MultipleElements { selector, count } => {
            ActionResult::with_status(ActionStatus::MultipleElements, message)
                .with_selector(selector)
                .with_element_count(count)
        }
        BackendError::NotVisible { selector } => {
            ActionResult::with_status(ActionStatus::ElementNotVisible, message).with_selector(selector)
        }
        BackendError::NotInteractable { selector } => {
            ActionResult::with_status(ActionStatus::ElementNotInteractable, message)
                .with_selector(selector)
        }
        BackendError::InvalidSelector { selector, .. } => {
            ActionResult::with_status(ActionStatus::InvalidSelector, message).with_selector(selector)
        }
        BackendError::StaleElement { selector } => {
            ActionResult::with_status(ActionStatus::StaleElement, message).with_selector(selector)
        }
        BackendError::Intercepted { selector, .. } => {
            ActionResult::with_status(ActionStatus::ClickIntercepted, message).with_selector(selector)
        }
        BackendError::PartialInput { selector, .. } => {
            ActionResult::with_status(ActionStatus::TypePartial, message).with_selector(selector)
        }
        BackendError::NavigationFailed { url, .. } => {
            ActionResult::with_status(ActionStatus::NavigationFailed, message).with_url(url)
        }
        BackendError::Http { url, status } => {
            ActionResult::with_status(ActionStatus::HttpError, message)
                .with_url(url)
                .with_http_status(status)
        }
        BackendError::Network { url, code } => {
            ActionResult::with_status(ActionStatus::NetworkError, message)
                .with_url(url)
                .with_error_code(code)
        }
        BackendError::Script(_) => ActionResult::with_status(ActionStatus::ScriptError, message),
        BackendError::Timeout(_) => {
            let status = match action {
                Action::Navigate { .. } => ActionStatus::NavigationTimeout,
                Action::Evaluate { .. } => ActionStatus::ScriptTimeout,
                _ => ActionStatus::Timeout,
            };
            ActionResult::with_status(status, message)
        }
        BackendError::TargetClosed => ActionResult::with_status(ActionStatus::Interrupted, message),
        BackendError::ActionFailed(_) => {
            let status = match action {
                Action::Select { .. } => ActionStatus::SelectFailed,
                Action::Upload { .. } => ActionStatus::UploadFailed,
                Action::Scroll { .. } => ActionStatus::ScrollFailed,
                Action::Hover { .. } => ActionStatus::HoverFailed,
                Action::Capture { .. } => ActionStatus::CaptureFailed,
                Action::Click { .. } => ActionStatus::ClickIntercepted,
                _ => ActionStatus::InternalError,
            };
            ActionResult::with_status(status, message)
        }
        BackendError::Internal(_) => ActionResult::with_status(ActionStatus::InternalError, message),
    }
}
