//! Verification state-machine behavior against the scripted engine.

use std::sync::Arc;
use std::time::Duration;

use drover::executor::{Action, ActionExecutor};
use drover::{OrchestratorConfig, Session, SessionRegistry};
use drover_protocol::{ActionStatus, VerificationLevel, WaitPolicy};
use drover_runtime::ContextConfig;
use drover_runtime::fake::{ClickEffect, FakeBackend, FakeContext, FakeElement, NavPlan, Settle};

const TIMEOUT: Duration = Duration::from_millis(500);

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        verify_timeout_ms: 200,
        verify_poll_ms: 20,
        stabilize_timeout_ms: 200,
        ..OrchestratorConfig::default()
    }
}

async fn fixture() -> (Arc<FakeBackend>, Arc<Session>, Arc<FakeContext>, ActionExecutor) {
    let backend = FakeBackend::seeded();
    let config = test_config();
    let registry = SessionRegistry::new(Arc::clone(&backend) as _, &config);
    let session = registry.create(ContextConfig::default(), None).await.unwrap();
    let context = backend.last_context().unwrap();
    let executor = ActionExecutor::new(&config);
    (backend, session, context, executor)
}

fn type_action(selector: &str, text: &str) -> Action {
    Action::Type {
        selector: selector.to_string(),
        text: text.to_string(),
        clear: false,
    }
}

fn click(selector: &str) -> Action {
    Action::Click {
        selector: selector.to_string(),
    }
}

#[tokio::test]
async fn standard_type_into_present_field_succeeds() {
    let (_backend, session, context, executor) = fixture().await;

    let output = executor
        .execute(&session, type_action("#q", "hello"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert!(output.result.success);
    assert_eq!(output.result.status, ActionStatus::Ok);
    assert_eq!(context.element_value("#q").unwrap(), "hello");
}

#[tokio::test]
async fn standard_type_into_missing_field_fails_fast() {
    let (_backend, session, _context, executor) = fixture().await;

    let output = executor
        .execute(&session, type_action("#missing", "hello"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert!(!output.result.success);
    assert_eq!(output.result.status, ActionStatus::ElementNotFound);
    assert_eq!(output.result.selector.as_deref(), Some("#missing"));
}

#[tokio::test]
async fn swallowed_input_resolves_to_soft_success() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#mute", FakeElement::new().swallowing_input());

    let output = executor
        .execute(&session, type_action("#mute", "hello"), VerificationLevel::Standard, TIMEOUT)
        .await;

    // The primitive fired; only confirmation ran out of time.
    assert!(output.result.success);
    assert_eq!(output.result.status, ActionStatus::VerificationTimeout);
}

#[tokio::test]
async fn basic_level_skips_the_post_check() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#mute", FakeElement::new().swallowing_input());

    let output = executor
        .execute(&session, type_action("#mute", "hello"), VerificationLevel::Basic, TIMEOUT)
        .await;

    assert_eq!(output.result.status, ActionStatus::Ok);
}

#[tokio::test]
async fn ambiguous_selector_is_always_an_error() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element(".row", FakeElement::new().with_count(3));

    let output = executor
        .execute(&session, click(".row"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert_eq!(output.result.status, ActionStatus::MultipleElements);
    assert_eq!(output.result.element_count, Some(3));
}

#[tokio::test]
async fn hidden_and_disabled_elements_fail_the_precheck() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#ghost", FakeElement::new().hidden());
    context.put_element("#frozen", FakeElement::new().disabled());

    let output = executor
        .execute(&session, click("#ghost"), VerificationLevel::Standard, TIMEOUT)
        .await;
    assert_eq!(output.result.status, ActionStatus::ElementNotVisible);

    let output = executor
        .execute(&session, click("#frozen"), VerificationLevel::Standard, TIMEOUT)
        .await;
    assert_eq!(output.result.status, ActionStatus::ElementNotInteractable);
}

#[tokio::test]
async fn intercepted_click_maps_to_click_intercepted() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#covered", FakeElement::new().intercepted_by("#overlay"));

    let output = executor
        .execute(&session, click("#covered"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert_eq!(output.result.status, ActionStatus::ClickIntercepted);
    assert!(!output.result.success);
}

#[tokio::test]
async fn click_with_no_observable_effect_is_a_soft_success() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#inert", FakeElement::new().on_click(ClickEffect::None));

    let output = executor
        .execute(&session, click("#inert"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert!(output.result.success);
    assert_eq!(output.result.status, ActionStatus::VerificationTimeout);
}

#[tokio::test]
async fn strict_click_on_never_settling_page_is_a_soft_success() {
    let (_backend, session, context, executor) = fixture().await;
    context.set_settle(Settle::Never);

    let output = executor
        .execute(&session, click("#link"), VerificationLevel::Strict, TIMEOUT)
        .await;

    assert!(output.result.success);
    assert_eq!(output.result.status, ActionStatus::VerificationTimeout);
}

#[tokio::test]
async fn none_level_fires_blind_but_reports_primitive_errors() {
    let (_backend, session, _context, executor) = fixture().await;

    let output = executor
        .execute(&session, click("#missing"), VerificationLevel::None, TIMEOUT)
        .await;

    assert_eq!(output.result.status, ActionStatus::ElementNotFound);
}

#[tokio::test]
async fn partial_typing_maps_to_type_partial() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#short", FakeElement::new().partial_after(3));

    let output = executor
        .execute(&session, type_action("#short", "hello"), VerificationLevel::Standard, TIMEOUT)
        .await;

    assert_eq!(output.result.status, ActionStatus::TypePartial);
}

#[tokio::test]
async fn select_of_unknown_option_maps_to_select_failed() {
    let (_backend, session, context, executor) = fixture().await;
    context.put_element("#lang", FakeElement::new().with_options(&["en", "de"]));

    let output = executor
        .execute(
            &session,
            Action::Select {
                selector: "#lang".to_string(),
                value: "fr".to_string(),
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::SelectFailed);
}

#[tokio::test]
async fn navigate_reports_final_url_and_status() {
    let (_backend, session, _context, executor) = fixture().await;

    let output = executor
        .execute(
            &session,
            Action::Navigate {
                url: "https://example.com".to_string(),
                wait: WaitPolicy::Load,
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::Ok);
    assert_eq!(output.result.url.as_deref(), Some("https://example.com"));
    assert_eq!(output.result.http_status, Some(200));
}

#[tokio::test]
async fn navigate_to_error_page_maps_to_http_error() {
    let (_backend, session, context, executor) = fixture().await;
    context.stage_navigation("https://example.com/gone", NavPlan::status(404));

    let output = executor
        .execute(
            &session,
            Action::Navigate {
                url: "https://example.com/gone".to_string(),
                wait: WaitPolicy::Load,
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::HttpError);
    assert_eq!(output.result.http_status, Some(404));
    assert!(!output.result.success);
}

#[tokio::test]
async fn navigation_that_never_loads_times_out_hard() {
    let (_backend, session, context, executor) = fixture().await;
    context.set_settle(Settle::Never);

    let output = executor
        .execute(
            &session,
            Action::Navigate {
                url: "https://slow.example".to_string(),
                wait: WaitPolicy::Load,
            },
            VerificationLevel::Standard,
            Duration::from_millis(80),
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::NavigationTimeout);
    assert!(!output.result.success);
}

#[tokio::test]
async fn evaluate_returns_the_staged_value() {
    let (_backend, session, context, executor) = fixture().await;
    context.stage_eval("document.title", "\"Dashboard\"");

    let output = executor
        .execute(
            &session,
            Action::Evaluate {
                script: "document.title".to_string(),
                return_value: true,
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::Ok);
    let data = output.data.unwrap();
    assert_eq!(data["value"], "\"Dashboard\"");
}

#[tokio::test]
async fn screenshot_payload_is_base64() {
    let (_backend, session, context, executor) = fixture().await;
    context.set_capture(vec![1, 2, 3, 4]);

    let output = executor
        .execute(
            &session,
            Action::Capture {
                mode: drover_protocol::CaptureMode::Viewport,
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    let data = output.data.unwrap();
    let payload = data["image_base64"].as_str().unwrap();
    assert_eq!(drover_protocol::decode_image(payload).unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn query_state_reports_zero_matches_without_failing() {
    let (_backend, session, _context, executor) = fixture().await;

    let output = executor
        .execute(
            &session,
            Action::Query {
                selector: "#nothing".to_string(),
            },
            VerificationLevel::Standard,
            TIMEOUT,
        )
        .await;

    assert_eq!(output.result.status, ActionStatus::Ok);
    assert_eq!(output.result.element_count, Some(0));
}
