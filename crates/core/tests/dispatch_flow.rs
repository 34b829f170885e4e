//! Dispatcher behavior: routing, ordering, out-of-band replies, shutdown.

use std::sync::Arc;
use std::time::Duration;

use drover::dispatch::{PendingCommand, ReplySink};
use drover::{Orchestrator, OrchestratorConfig};
use drover_protocol::{Command, Reply};
use drover_runtime::fake::FakeBackend;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Harness {
    backend: Arc<FakeBackend>,
    handle: drover::CommandSender,
    out_rx: mpsc::UnboundedReceiver<String>,
    out_tx: mpsc::UnboundedSender<String>,
    loop_task: JoinHandle<drover::Result<()>>,
}

impl Harness {
    fn start(config: OrchestratorConfig) -> Self {
        let backend = FakeBackend::seeded();
        let orchestrator = Orchestrator::new(config, Arc::clone(&backend) as _);
        let dispatcher = orchestrator.dispatcher();
        let handle = dispatcher.handle();
        let loop_task = tokio::spawn(dispatcher.run());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            handle,
            out_rx,
            out_tx,
            loop_task,
        }
    }

    fn submit(&self, line: &str) {
        self.handle
            .submit_line(line.to_string(), ReplySink::stream(self.out_tx.clone()))
            .unwrap();
    }

    /// Sends a command over an out-of-band slot and awaits its reply.
    async fn request(&self, line: &str) -> Reply {
        let command = Command::parse_line(line).unwrap();
        let (pending, rx) = PendingCommand::new(command);
        self.handle.submit_pending(pending).unwrap();
        rx.await.unwrap()
    }

    async fn next_line(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.out_rx.recv())
            .await
            .expect("timed out waiting for a reply line")
            .expect("output stream closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn create_context(&self) -> String {
        let reply = self.request(r#"{"id":1,"method":"create_context"}"#).await;
        let result = reply.result.unwrap();
        assert_eq!(result["success"], true);
        result["context_id"].as_str().unwrap().to_string()
    }

    async fn shutdown(&mut self) {
        let reply = self.request(r#"{"id":999,"method":"shutdown"}"#).await;
        assert_eq!(reply.result.unwrap()["shutting_down"], true);
        (&mut self.loop_task).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn create_reply_merges_context_id() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let ctx = harness.create_context().await;
    assert!(ctx.starts_with("ctx-"));
    harness.shutdown().await;
}

#[tokio::test]
async fn serialized_commands_reply_in_issue_order() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let ctx = harness.create_context().await;
    harness.backend.last_context().unwrap().set_navigate_delay(Duration::from_millis(30));

    // A slow navigate issued before a fast click; both are serialized, so
    // replies must come back A then B.
    harness.submit(&format!(
        r#"{{"id":10,"method":"navigate","context_id":"{ctx}","url":"https://example.com"}}"#
    ));
    harness.submit(&format!(
        r##"{{"id":11,"method":"click","context_id":"{ctx}","selector":"#btn"}}"##
    ));

    assert_eq!(harness.next_line().await["id"], 10);
    assert_eq!(harness.next_line().await["id"], 11);
    harness.shutdown().await;
}

#[tokio::test]
async fn parallel_commands_all_reply_in_some_order() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let ctx = harness.create_context().await;

    for id in 20..25 {
        harness.submit(&format!(
            r##"{{"id":{id},"method":"query_state","context_id":"{ctx}","selector":"#q"}}"##
        ));
    }

    // No ordering guarantee exists for the parallel class; assert only
    // that every command got exactly one reply.
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(harness.next_line().await["id"].as_i64().unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec![20, 21, 22, 23, 24]);
    harness.shutdown().await;
}

#[tokio::test]
async fn action_on_unknown_context_fails_fast() {
    let mut harness = Harness::start(OrchestratorConfig::default());

    let reply = harness
        .request(r##"{"id":5,"method":"click","context_id":"ctx-404","selector":"#btn"}"##)
        .await;
    let result = reply.result.unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["status"], "context_not_found");
    harness.shutdown().await;
}

#[tokio::test]
async fn admission_failure_travels_through_result_not_error() {
    let mut harness = Harness::start(OrchestratorConfig {
        max_sessions: 1,
        ..OrchestratorConfig::default()
    });

    harness.create_context().await;
    let reply = harness.request(r#"{"id":2,"method":"create_context"}"#).await;
    assert!(reply.error.is_none());
    let result = reply.result.unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["status"], "resource_exhausted");
    harness.shutdown().await;
}

#[tokio::test]
async fn protocol_errors_use_the_error_reply() {
    let mut harness = Harness::start(OrchestratorConfig::default());

    harness.submit(r#"{"id":7,"method":"levitate"}"#);
    let reply = harness.next_line().await;
    assert_eq!(reply["id"], 7);
    assert!(reply["error"].as_str().unwrap().contains("levitate"));

    harness.submit("{broken json");
    let reply = harness.next_line().await;
    assert_eq!(reply["id"], -1);
    assert!(reply.get("result").is_none());
    harness.shutdown().await;
}

#[tokio::test]
async fn release_close_lifecycle_round_trips() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let ctx = harness.create_context().await;

    let reply = harness
        .request(&format!(r#"{{"id":30,"method":"release_context","context_id":"{ctx}"}}"#))
        .await;
    assert_eq!(reply.result.unwrap()["success"], true);

    let reply = harness
        .request(&format!(r#"{{"id":31,"method":"close_context","context_id":"{ctx}"}}"#))
        .await;
    assert_eq!(reply.result.unwrap()["success"], true);

    let reply = harness
        .request(&format!(r#"{{"id":32,"method":"close_context","context_id":"{ctx}"}}"#))
        .await;
    assert_eq!(reply.result.unwrap()["status"], "context_not_found");
    harness.shutdown().await;
}

#[tokio::test]
async fn list_contexts_returns_snapshot() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let a = harness.create_context().await;
    let b = harness.create_context().await;

    let reply = harness.request(r#"{"id":40,"method":"list_contexts"}"#).await;
    let contexts = reply.result.unwrap()["contexts"].clone();
    assert_eq!(contexts, serde_json::json!([a, b]));
    harness.shutdown().await;
}

#[tokio::test]
async fn backend_pump_runs_every_tick() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    harness.request(r#"{"id":50,"method":"ping"}"#).await;
    harness.request(r#"{"id":51,"method":"ping"}"#).await;
    assert!(harness.backend.pump_count() >= 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_inflight_parallel_work() {
    let mut harness = Harness::start(OrchestratorConfig::default());
    let ctx = harness.create_context().await;
    harness.backend.last_context().unwrap().stage_eval("slow()", "done");

    harness.submit(&format!(
        r#"{{"id":60,"method":"evaluate","context_id":"{ctx}","script":"slow()"}}"#
    ));
    harness.shutdown().await;

    // The evaluate issued before shutdown still resolved.
    let reply = harness.next_line().await;
    assert_eq!(reply["id"], 60);
    assert_eq!(reply["result"]["value"], "done");
}
