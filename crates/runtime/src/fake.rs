//! In-memory engine for testing the orchestration layers without a
//! browser.
//!
//! [`FakeBackend`] implements [`RenderBackend`] over a scripted page model:
//! tests seed elements, navigation plans, and settle behavior, then drive
//! the real executor/dispatcher/registry against it. The backend also
//! serves as its own controller - grab a context with
//! [`FakeBackend::last_context`] and mutate its page mid-test.
//!
//! Pages only settle when [`RenderBackend::pump_pending_work`] is invoked
//! (see [`Settle::AfterPumps`]), which is how tests exercise the
//! poll-driven progress model.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drover_protocol::{CaptureMode, WaitPolicy};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{ContextConfig, ContextHandle, RenderBackend};
use crate::outcome::{
    BackendError, BackendResult, Bounds, ElementState, NavigationOutcome, PageSnapshot,
};

const SETTLE_POLL: Duration = Duration::from_millis(5);

/// How a page reaches quiescence after a navigation or click-navigation.
#[derive(Debug, Clone, Copy, Default)]
pub enum Settle {
    /// Settles as soon as the navigation lands.
    #[default]
    Immediate,
    /// Settles after this many engine pumps.
    AfterPumps(u32),
    /// Never settles; loading stays in flight forever.
    Never,
}

/// Observable effect of a click on an element.
#[derive(Debug, Clone, Default)]
pub enum ClickEffect {
    /// DOM mutates; post-condition checks converge.
    #[default]
    BumpRevision,
    /// Nothing observable happens; Standard verification times out.
    None,
    /// Click triggers a navigation.
    Navigate(String),
}

/// Scripted element state.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub count: u32,
    pub visible: bool,
    pub enabled: bool,
    pub checked: Option<bool>,
    pub text: String,
    pub value: String,
    pub intercepted_by: Option<String>,
    /// Typed text is accepted but never lands in `value`.
    pub swallow_input: bool,
    /// Typing stops after this many characters with a partial-input error.
    pub partial_after: Option<u32>,
    pub click_effect: ClickEffect,
    /// Valid `select` options; empty accepts anything.
    pub options: Vec<String>,
}

impl FakeElement {
    pub fn new() -> Self {
        Self {
            count: 1,
            visible: true,
            enabled: true,
            checked: None,
            text: String::new(),
            value: String::new(),
            intercepted_by: None,
            swallow_input: false,
            partial_after: None,
            click_effect: ClickEffect::default(),
            options: Vec::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn intercepted_by(mut self, by: impl Into<String>) -> Self {
        self.intercepted_by = Some(by.into());
        self
    }

    pub fn swallowing_input(mut self) -> Self {
        self.swallow_input = true;
        self
    }

    pub fn partial_after(mut self, chars: u32) -> Self {
        self.partial_after = Some(chars);
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.click_effect = effect;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl Default for FakeElement {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted navigation outcome for a specific URL.
#[derive(Debug, Clone)]
pub struct NavPlan {
    pub http_status: u16,
    pub error: Option<String>,
    pub net_error: Option<i32>,
}

impl NavPlan {
    pub fn status(http_status: u16) -> Self {
        Self {
            http_status,
            error: None,
            net_error: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            http_status: 0,
            error: Some(message.into()),
            net_error: None,
        }
    }

    pub fn net_error(code: i32) -> Self {
        Self {
            http_status: 0,
            error: None,
            net_error: Some(code),
        }
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    dom_revision: u64,
    loading: bool,
    inflight_requests: u32,
    settle: Settle,
    pumps_until_settle: u32,
    navigate_delay: Duration,
    elements: HashMap<String, FakeElement>,
    eval_results: HashMap<String, String>,
    nav_plans: HashMap<String, NavPlan>,
    capture_bytes: Vec<u8>,
    capture_fails: bool,
}

impl PageState {
    fn new(elements: HashMap<String, FakeElement>) -> Self {
        Self {
            url: "about:blank".to_string(),
            dom_revision: 0,
            loading: false,
            inflight_requests: 0,
            settle: Settle::Immediate,
            pumps_until_settle: 0,
            navigate_delay: Duration::ZERO,
            elements,
            eval_results: HashMap::new(),
            nav_plans: HashMap::new(),
            capture_bytes: vec![0x89, b'P', b'N', b'G'],
            capture_fails: false,
        }
    }

    fn begin_load(&mut self) {
        match self.settle {
            Settle::Immediate => {
                self.loading = false;
                self.inflight_requests = 0;
            }
            Settle::AfterPumps(n) => {
                self.loading = true;
                self.inflight_requests = 1;
                self.pumps_until_settle = n;
            }
            Settle::Never => {
                self.loading = true;
                self.inflight_requests = 1;
            }
        }
    }

    fn pump(&mut self) {
        if !self.loading {
            return;
        }
        if let Settle::AfterPumps(_) = self.settle {
            if self.pumps_until_settle == 0 {
                self.loading = false;
                self.inflight_requests = 0;
            } else {
                self.pumps_until_settle -= 1;
            }
        }
    }
}

/// One scripted browsing context.
pub struct FakeContext {
    page: Mutex<PageState>,
    closed: AtomicBool,
    fail_close: AtomicBool,
    close_delay: Mutex<Duration>,
    close_calls: AtomicU32,
}

impl FakeContext {
    fn new(elements: HashMap<String, FakeElement>) -> Self {
        Self {
            page: Mutex::new(PageState::new(elements)),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            close_delay: Mutex::new(Duration::ZERO),
            close_calls: AtomicU32::new(0),
        }
    }

    // -- scripting surface ---------------------------------------------

    pub fn put_element(&self, selector: impl Into<String>, element: FakeElement) {
        self.page.lock().elements.insert(selector.into(), element);
    }

    pub fn remove_element(&self, selector: &str) {
        self.page.lock().elements.remove(selector);
    }

    pub fn set_settle(&self, settle: Settle) {
        self.page.lock().settle = settle;
    }

    pub fn set_navigate_delay(&self, delay: Duration) {
        self.page.lock().navigate_delay = delay;
    }

    pub fn stage_eval(&self, script: impl Into<String>, result: impl Into<String>) {
        self.page.lock().eval_results.insert(script.into(), result.into());
    }

    pub fn stage_navigation(&self, url: impl Into<String>, plan: NavPlan) {
        self.page.lock().nav_plans.insert(url.into(), plan);
    }

    pub fn set_capture(&self, bytes: Vec<u8>) {
        self.page.lock().capture_bytes = bytes;
    }

    pub fn set_capture_fails(&self, fails: bool) {
        self.page.lock().capture_fails = fails;
    }

    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    // -- inspection ----------------------------------------------------

    pub fn url(&self) -> String {
        self.page.lock().url.clone()
    }

    pub fn dom_revision(&self) -> u64 {
        self.page.lock().dom_revision
    }

    pub fn element_value(&self, selector: &str) -> Option<String> {
        self.page.lock().elements.get(selector).map(|e| e.value.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    // -- internals -----------------------------------------------------

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::TargetClosed);
        }
        Ok(())
    }

    /// Shared element resolution for interactive primitives.
    fn interactable(&self, selector: &str) -> BackendResult<FakeElement> {
        let page = self.page.lock();
        let Some(element) = page.elements.get(selector) else {
            return Err(BackendError::ElementNotFound {
                selector: selector.to_string(),
            });
        };
        if element.count > 1 {
            return Err(BackendError::MultipleElements {
                selector: selector.to_string(),
                count: element.count,
            });
        }
        if !element.visible {
            return Err(BackendError::NotVisible {
                selector: selector.to_string(),
            });
        }
        if !element.enabled {
            return Err(BackendError::NotInteractable {
                selector: selector.to_string(),
            });
        }
        Ok(element.clone())
    }

    async fn wait_for_settle(&self, wait: WaitPolicy, timeout: Duration) -> BackendResult<()> {
        if wait == WaitPolicy::Commit {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        loop {
            if !self.page.lock().loading {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Timeout(timeout));
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }
}

#[async_trait]
impl ContextHandle for FakeContext {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> BackendResult<NavigationOutcome> {
        self.ensure_open()?;

        let (delay, plan) = {
            let page = self.page.lock();
            (page.navigate_delay, page.nav_plans.get(url).cloned())
        };
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let http_status = match plan {
            Some(NavPlan {
                error: Some(message),
                ..
            }) => {
                return Err(BackendError::NavigationFailed {
                    url: url.to_string(),
                    message,
                });
            }
            Some(NavPlan {
                net_error: Some(code),
                ..
            }) => {
                return Err(BackendError::Network {
                    url: url.to_string(),
                    code,
                });
            }
            Some(plan) => plan.http_status,
            None => 200,
        };

        {
            let mut page = self.page.lock();
            page.url = url.to_string();
            page.dom_revision += 1;
            page.begin_load();
        }
        self.wait_for_settle(wait, timeout).await?;

        Ok(NavigationOutcome {
            url: url.to_string(),
            http_status: Some(http_status),
        })
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> BackendResult<()> {
        self.ensure_open()?;
        let element = self.interactable(selector)?;
        if let Some(by) = element.intercepted_by {
            return Err(BackendError::Intercepted {
                selector: selector.to_string(),
                by,
            });
        }
        match element.click_effect {
            ClickEffect::BumpRevision => {
                self.page.lock().dom_revision += 1;
            }
            ClickEffect::None => {}
            ClickEffect::Navigate(url) => {
                let mut page = self.page.lock();
                page.url = url;
                page.dom_revision += 1;
                page.begin_load();
            }
        }
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear: bool,
        _timeout: Duration,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        let element = self.interactable(selector)?;

        if let Some(limit) = element.partial_after {
            let typed: String = text.chars().take(limit as usize).collect();
            let mut page = self.page.lock();
            if let Some(el) = page.elements.get_mut(selector) {
                el.value = typed;
            }
            return Err(BackendError::PartialInput {
                selector: selector.to_string(),
                typed: limit.min(text.chars().count() as u32),
                requested: text.chars().count() as u32,
            });
        }

        if element.swallow_input {
            return Ok(());
        }

        let mut page = self.page.lock();
        if let Some(el) = page.elements.get_mut(selector) {
            if clear {
                el.value = text.to_string();
            } else {
                el.value.push_str(text);
            }
        }
        page.dom_revision += 1;
        Ok(())
    }

    async fn press(&self, _key: &str, _timeout: Duration) -> BackendResult<()> {
        self.ensure_open()?;
        self.page.lock().dom_revision += 1;
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str, _timeout: Duration) -> BackendResult<()> {
        self.ensure_open()?;
        let element = self.interactable(selector)?;
        if !element.options.is_empty() && !element.options.iter().any(|o| o == value) {
            return Err(BackendError::ActionFailed(format!(
                "option {value:?} not present in {selector}"
            )));
        }
        let mut page = self.page.lock();
        if let Some(el) = page.elements.get_mut(selector) {
            el.value = value.to_string();
        }
        page.dom_revision += 1;
        Ok(())
    }

    async fn hover(&self, selector: &str, _timeout: Duration) -> BackendResult<()> {
        self.ensure_open()?;
        let page = self.page.lock();
        let Some(element) = page.elements.get(selector) else {
            return Err(BackendError::ElementNotFound {
                selector: selector.to_string(),
            });
        };
        if element.count > 1 {
            return Err(BackendError::MultipleElements {
                selector: selector.to_string(),
                count: element.count,
            });
        }
        if !element.visible {
            return Err(BackendError::NotVisible {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    async fn scroll(
        &self,
        selector: Option<&str>,
        _dx: i64,
        _dy: i64,
        _timeout: Duration,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        if let Some(selector) = selector {
            let page = self.page.lock();
            if !page.elements.contains_key(selector) {
                return Err(BackendError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn upload(
        &self,
        selector: &str,
        files: &[String],
        _timeout: Duration,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        self.interactable(selector)?;
        let mut page = self.page.lock();
        if let Some(el) = page.elements.get_mut(selector) {
            el.value = files.join(",");
        }
        page.dom_revision += 1;
        Ok(())
    }

    async fn evaluate(
        &self,
        script: &str,
        return_value: bool,
        _timeout: Duration,
    ) -> BackendResult<String> {
        self.ensure_open()?;
        if script.contains("throw") {
            return Err(BackendError::Script(format!("script threw: {script}")));
        }
        let staged = self.page.lock().eval_results.get(script).cloned();
        match staged {
            Some(result) if return_value => Ok(result),
            Some(_) | None => Ok(if return_value { "null".to_string() } else { String::new() }),
        }
    }

    async fn query(&self, selector: &str) -> BackendResult<ElementState> {
        self.ensure_open()?;
        let page = self.page.lock();
        Ok(match page.elements.get(selector) {
            Some(el) => ElementState {
                count: el.count,
                visible: el.visible,
                enabled: el.enabled,
                checked: el.checked,
                text: el.text.clone(),
                value: el.value.clone(),
                bounds: el.visible.then_some(Bounds {
                    x: 10.0,
                    y: 10.0,
                    width: 100.0,
                    height: 20.0,
                }),
            },
            None => ElementState::absent(),
        })
    }

    async fn snapshot(&self) -> BackendResult<PageSnapshot> {
        self.ensure_open()?;
        let page = self.page.lock();
        Ok(PageSnapshot {
            url: page.url.clone(),
            dom_revision: page.dom_revision,
            loading: page.loading,
            inflight_requests: page.inflight_requests,
        })
    }

    async fn capture(&self, _mode: CaptureMode) -> BackendResult<Vec<u8>> {
        self.ensure_open()?;
        let page = self.page.lock();
        if page.capture_fails {
            return Err(BackendError::ActionFailed("capture failed".to_string()));
        }
        Ok(page.capture_bytes.clone())
    }

    async fn close(&self) -> BackendResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.close_delay.lock();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(BackendError::Internal("context close failed".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted engine implementing [`RenderBackend`].
pub struct FakeBackend {
    contexts: Mutex<Vec<Arc<FakeContext>>>,
    default_elements: Mutex<HashMap<String, FakeElement>>,
    fail_next_open: Mutex<Option<String>>,
    open_delay: Mutex<Duration>,
    measured_memory: Mutex<Option<u64>>,
    pump_count: AtomicU64,
    open_count: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(Vec::new()),
            default_elements: Mutex::new(HashMap::new()),
            fail_next_open: Mutex::new(None),
            open_delay: Mutex::new(Duration::ZERO),
            measured_memory: Mutex::new(None),
            pump_count: AtomicU64::new(0),
            open_count: AtomicU32::new(0),
        })
    }

    /// An engine whose contexts start with a small seeded page: a text
    /// input `#q`, a button `#btn`, a link `#link` that navigates, and a
    /// hidden `#hidden`. Used by `drover serve --engine stub` and the
    /// process-level tests.
    pub fn seeded() -> Arc<Self> {
        let backend = Self::new();
        backend.seed_element("#q", FakeElement::new());
        backend.seed_element("#btn", FakeElement::new().with_text("Go"));
        backend.seed_element(
            "#link",
            FakeElement::new()
                .with_text("next")
                .on_click(ClickEffect::Navigate("https://example.com/next".to_string())),
        );
        backend.seed_element("#hidden", FakeElement::new().hidden());
        backend
    }

    /// Element given to every context opened after this call.
    pub fn seed_element(&self, selector: impl Into<String>, element: FakeElement) {
        self.default_elements.lock().insert(selector.into(), element);
    }

    pub fn fail_next_open(&self, message: impl Into<String>) {
        *self.fail_next_open.lock() = Some(message.into());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn set_measured_memory(&self, bytes: Option<u64>) {
        *self.measured_memory.lock() = bytes;
    }

    pub fn contexts(&self) -> Vec<Arc<FakeContext>> {
        self.contexts.lock().clone()
    }

    pub fn last_context(&self) -> Option<Arc<FakeContext>> {
        self.contexts.lock().last().cloned()
    }

    pub fn pump_count(&self) -> u64 {
        self.pump_count.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for FakeBackend {
    async fn open_context(&self, _config: &ContextConfig) -> BackendResult<Arc<dyn ContextHandle>> {
        if let Some(message) = self.fail_next_open.lock().take() {
            return Err(BackendError::Internal(message));
        }
        let delay = *self.open_delay.lock();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let context = Arc::new(FakeContext::new(self.default_elements.lock().clone()));
        self.contexts.lock().push(Arc::clone(&context));
        debug!(target = "drover.fake", open = self.open_count(), "opened scripted context");
        Ok(context)
    }

    fn pump_pending_work(&self) {
        self.pump_count.fetch_add(1, Ordering::SeqCst);
        for context in self.contexts.lock().iter() {
            context.page.lock().pump();
        }
    }

    fn measured_memory_bytes(&self) -> Option<u64> {
        *self.measured_memory.lock()
    }
}
