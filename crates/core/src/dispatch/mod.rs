//! Command dispatch: one FIFO queue in, per-command replies out.
//!
//! Any number of channels submit lines or parsed commands through a
//! [`CommandSender`]. The dispatch loop drains them into batches,
//! partitions each batch by [`Affinity`], runs the serialized partition
//! inline in arrival order, spawns the parallel partition onto a
//! [`JoinSet`], and pumps the backend's pending work once per tick so
//! long-running primitives keep making progress.
//!
//! Exactly one of {stream write, pending-slot resolution} happens per
//! command: a [`ReplySink`] is consumed by value on its single `send`.

mod affinity;

pub use affinity::{Affinity, affinity};

use std::sync::Arc;
use std::time::Duration;

use drover_protocol::{ActionResult, ActionStatus, Command, CommandKind, Reply};
use drover_runtime::{ContextConfig, RenderBackend};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, Result};
use crate::executor::{Action, ActionExecutor, ActionOutput};
use crate::session::SessionRegistry;

/// Where a command's single reply goes.
pub enum ReplySink {
    /// The channel's default output stream (one reply line per send).
    Stream(mpsc::UnboundedSender<String>),
    /// A single-resolution slot for out-of-band channels.
    Pending(oneshot::Sender<Reply>),
}

impl ReplySink {
    pub fn stream(tx: mpsc::UnboundedSender<String>) -> Self {
        Self::Stream(tx)
    }

    pub fn pending(slot: oneshot::Sender<Reply>) -> Self {
        Self::Pending(slot)
    }

    fn send(self, reply: Reply) {
        match self {
            ReplySink::Stream(tx) => {
                if tx.send(reply.to_line()).is_err() {
                    debug!(target = "drover.dispatch", "output stream closed; reply dropped");
                }
            }
            ReplySink::Pending(slot) => {
                if slot.send(reply).is_err() {
                    debug!(target = "drover.dispatch", "pending slot abandoned; reply dropped");
                }
            }
        }
    }
}

/// A command paired with the slot its direct reply resolves.
pub struct PendingCommand {
    pub command: Command,
    slot: oneshot::Sender<Reply>,
}

impl PendingCommand {
    pub fn new(command: Command) -> (Self, oneshot::Receiver<Reply>) {
        let (slot, rx) = oneshot::channel();
        (Self { command, slot }, rx)
    }
}

enum Inbound {
    Line { line: String, reply: ReplySink },
    Parsed { command: Command, reply: ReplySink },
}

/// Clonable handle feeding the dispatch queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CommandSender {
    /// Submits one raw protocol line; the dispatcher parses it so
    /// malformed lines still get in-order error replies.
    pub fn submit_line(&self, line: String, reply: ReplySink) -> Result<()> {
        self.tx
            .send(Inbound::Line { line, reply })
            .map_err(|_| CoreError::QueueClosed)
    }

    pub fn submit(&self, command: Command, reply: ReplySink) -> Result<()> {
        self.tx
            .send(Inbound::Parsed { command, reply })
            .map_err(|_| CoreError::QueueClosed)
    }

    pub fn submit_pending(&self, pending: PendingCommand) -> Result<()> {
        self.submit(pending.command, ReplySink::Pending(pending.slot))
    }
}

/// The dispatch loop. Constructed by [`Orchestrator::dispatcher`],
/// consumed by [`run`](Self::run).
///
/// [`Orchestrator::dispatcher`]: crate::orchestrator::Orchestrator::dispatcher
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn RenderBackend>,
    executor: ActionExecutor,
    default_timeout: Duration,
    coalesce: Duration,
    idle_sleep: Duration,
    rx: mpsc::UnboundedReceiver<Inbound>,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn RenderBackend>,
        executor: ActionExecutor,
        config: &OrchestratorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry,
            backend,
            executor,
            default_timeout: config.action_timeout(),
            coalesce: config.batch_coalesce(),
            idle_sleep: config.idle_tick_sleep(),
            rx,
            tx,
        }
    }

    pub fn handle(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Runs until a `shutdown` command arrives or every sender is gone.
    pub async fn run(mut self) -> Result<()> {
        // The loop's own sender would keep recv() alive forever.
        drop(self.tx);

        let mut parallel: JoinSet<()> = JoinSet::new();
        let mut shutdown: Option<(i64, ReplySink)> = None;

        loop {
            while parallel.try_join_next().is_some() {}

            // 1. Drain everything currently queued into one batch.
            let mut batch = Vec::new();
            while let Ok(inbound) = self.rx.try_recv() {
                batch.push(inbound);
            }

            if batch.is_empty() {
                if !parallel.is_empty() {
                    // Outstanding parallel work: short sleep, keep pumping.
                    tokio::time::sleep(self.idle_sleep).await;
                } else {
                    // Fully idle: block until work arrives, then give the
                    // burst a moment to coalesce into one batch.
                    match self.rx.recv().await {
                        Some(inbound) => batch.push(inbound),
                        None => break,
                    }
                    tokio::time::sleep(self.coalesce).await;
                    while let Ok(inbound) = self.rx.try_recv() {
                        batch.push(inbound);
                    }
                }
            }

            // 2-4. Partition and execute. Serialized commands run inline
            // in arrival order; parallel commands go to the worker pool.
            for inbound in batch {
                let (command, reply) = match inbound {
                    Inbound::Parsed { command, reply } => (command, reply),
                    Inbound::Line { line, reply } => match Command::parse_line(&line) {
                        Ok(command) => (command, reply),
                        Err(err) => {
                            warn!(target = "drover.dispatch", error = %err, "malformed request line");
                            let reply_msg = match err.id {
                                Some(id) => Reply::error(id, err.to_string()),
                                None => Reply::unaddressed_error(err.to_string()),
                            };
                            reply.send(reply_msg);
                            continue;
                        }
                    },
                };

                if matches!(command.kind, CommandKind::Shutdown) {
                    if shutdown.is_some() {
                        reply.send(Reply::result(command.id, json!({"shutting_down": true})));
                    } else {
                        info!(target = "drover.dispatch", "shutdown requested");
                        shutdown = Some((command.id, reply));
                    }
                    continue;
                }

                match affinity(&command.kind) {
                    Affinity::Serialized => {
                        let out = handle_command(
                            &self.registry,
                            self.executor,
                            command,
                            self.default_timeout,
                        )
                        .await;
                        reply.send(out);
                    }
                    Affinity::Parallel => {
                        let registry = Arc::clone(&self.registry);
                        let executor = self.executor;
                        let default_timeout = self.default_timeout;
                        parallel.spawn(async move {
                            let out =
                                handle_command(&registry, executor, command, default_timeout).await;
                            reply.send(out);
                        });
                    }
                }
            }

            // 5. Progress tick for previously-started backend work.
            self.backend.pump_pending_work();

            if let Some((id, reply)) = shutdown.take() {
                // Stop accepting batches; let in-flight parallel work finish.
                self.rx.close();
                while let Ok(inbound) = self.rx.try_recv() {
                    let (late_id, late_reply) = match inbound {
                        Inbound::Parsed { command, reply } => (Some(command.id), reply),
                        Inbound::Line { line, reply } => {
                            (Command::parse_line(&line).ok().map(|c| c.id), reply)
                        }
                    };
                    let msg = "orchestrator is shutting down";
                    late_reply.send(match late_id {
                        Some(late_id) => Reply::error(late_id, msg),
                        None => Reply::unaddressed_error(msg),
                    });
                }
                while !parallel.is_empty() {
                    if parallel.try_join_next().is_some() {
                        continue;
                    }
                    self.backend.pump_pending_work();
                    tokio::time::sleep(self.idle_sleep).await;
                }
                reply.send(Reply::result(id, json!({"shutting_down": true})));
                info!(target = "drover.dispatch", "dispatch loop stopped");
                return Ok(());
            }
        }

        // All channels hung up without a shutdown command.
        while parallel.join_next().await.is_some() {}
        info!(target = "drover.dispatch", "all channels closed; dispatch loop stopped");
        Ok(())
    }
}

/// Executes one non-shutdown command to its reply.
async fn handle_command(
    registry: &Arc<SessionRegistry>,
    executor: ActionExecutor,
    command: Command,
    default_timeout: Duration,
) -> Reply {
    let id = command.id;
    match command.kind {
        CommandKind::CreateContext {
            profile,
            proxy,
            block_resources,
            verification,
        } => {
            let config = ContextConfig {
                profile,
                proxy,
                block_resources,
            };
            match registry.create(config, verification).await {
                Ok(session) => {
                    let result = ActionResult::ok("context created");
                    let mut value = result_value(ActionOutput {
                        result,
                        data: None,
                    });
                    if let Value::Object(object) = &mut value {
                        object.insert("context_id".to_string(), json!(session.id()));
                    }
                    Reply::result(id, value)
                }
                Err(err) => Reply::result(id, result_value(ActionOutput {
                    result: admission_result(err),
                    data: None,
                })),
            }
        }
        CommandKind::CloseContext { context_id } => {
            let result = if registry.close(&context_id).await {
                ActionResult::ok(format!("context {context_id} closed"))
            } else {
                ActionResult::with_status(
                    ActionStatus::ContextNotFound,
                    format!("no such context: {context_id}"),
                )
            };
            Reply::result(id, result_value(ActionOutput { result, data: None }))
        }
        CommandKind::ReleaseContext { context_id } => {
            let result = match registry.release(&context_id) {
                Ok(()) => ActionResult::ok(format!("context {context_id} released")),
                Err(err) => admission_result(err),
            };
            Reply::result(id, result_value(ActionOutput { result, data: None }))
        }
        CommandKind::ListContexts => Reply::result(id, json!({"contexts": registry.list()})),
        CommandKind::Ping => Reply::result(id, json!({"pong": true})),
        CommandKind::Shutdown => {
            // The loop intercepts shutdown before dispatching here.
            Reply::result(id, json!({"shutting_down": true}))
        }
        kind => {
            let request = match ActionRequest::from_kind(kind) {
                Ok(request) => request,
                Err(result) => {
                    return Reply::result(id, result_value(ActionOutput { result, data: None }));
                }
            };

            // Fail fast on unknown sessions, before any verification.
            let checked = match registry.checkout(&request.context_id) {
                Ok(checked) => checked,
                Err(err) => {
                    return Reply::result(id, result_value(ActionOutput {
                        result: admission_result(err),
                        data: None,
                    }));
                }
            };

            let level = request
                .verification
                .unwrap_or_else(|| checked.session.default_verification());
            let timeout = request
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout);

            let output = executor
                .execute(&checked.session, request.action, level, timeout)
                .await;
            // `checked.guard` drops here, after the action fully resolved.
            Reply::result(id, result_value(output))
        }
    }
}

struct ActionRequest {
    context_id: String,
    action: Action,
    verification: Option<drover_protocol::VerificationLevel>,
    timeout_ms: Option<u64>,
}

impl ActionRequest {
    /// Distills an action-carrying [`CommandKind`] into its execution
    /// parts. Lifecycle methods never reach this.
    fn from_kind(kind: CommandKind) -> std::result::Result<Self, ActionResult> {
        let request = match kind {
            CommandKind::Navigate {
                context_id,
                url,
                wait,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Navigate { url, wait },
                verification,
                timeout_ms,
            },
            CommandKind::Click {
                context_id,
                selector,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Click { selector },
                verification,
                timeout_ms,
            },
            CommandKind::Type {
                context_id,
                selector,
                text,
                clear,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Type { selector, text, clear },
                verification,
                timeout_ms,
            },
            CommandKind::Press {
                context_id,
                key,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Press { key },
                verification,
                timeout_ms,
            },
            CommandKind::Select {
                context_id,
                selector,
                value,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Select { selector, value },
                verification,
                timeout_ms,
            },
            CommandKind::Hover {
                context_id,
                selector,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Hover { selector },
                verification,
                timeout_ms,
            },
            CommandKind::Scroll {
                context_id,
                selector,
                dx,
                dy,
                timeout_ms,
                verification,
            } => Self {
                context_id,
                action: Action::Scroll { selector, dx, dy },
                verification,
                timeout_ms,
            },
            CommandKind::Upload {
                context_id,
                selector,
                files,
                timeout_ms,
                verification,
            } => {
                if files.is_empty() {
                    return Err(ActionResult::with_status(
                        ActionStatus::InvalidArgument,
                        "upload requires at least one file",
                    )
                    .with_selector(selector));
                }
                Self {
                    context_id,
                    action: Action::Upload { selector, files },
                    verification,
                    timeout_ms,
                }
            }
            CommandKind::Evaluate {
                context_id,
                script,
                return_value,
                timeout_ms,
            } => Self {
                context_id,
                action: Action::Evaluate { script, return_value },
                verification: None,
                timeout_ms,
            },
            CommandKind::QueryState {
                context_id,
                selector,
            } => Self {
                context_id,
                action: Action::Query { selector },
                verification: None,
                timeout_ms: None,
            },
            CommandKind::GetText {
                context_id,
                selector,
            } => Self {
                context_id,
                action: Action::GetText { selector },
                verification: None,
                timeout_ms: None,
            },
            CommandKind::Screenshot { context_id, mode } => Self {
                context_id,
                action: Action::Capture { mode },
                verification: None,
                timeout_ms: None,
            },
            CommandKind::CreateContext { .. }
            | CommandKind::CloseContext { .. }
            | CommandKind::ReleaseContext { .. }
            | CommandKind::ListContexts
            | CommandKind::Ping
            | CommandKind::Shutdown => unreachable!("lifecycle methods handled before decomposition"),
        };
        Ok(request)
    }
}

/// Maps registry/admission failures into the result taxonomy. These are
/// action-level failures and travel through `result`, not `error`.
fn admission_result(err: CoreError) -> ActionResult {
    match err {
        CoreError::ResourceExhausted { limit } => ActionResult::with_status(
            ActionStatus::ResourceExhausted,
            format!("session limit reached ({limit} live sessions)"),
        ),
        CoreError::MemoryPressure { .. } => {
            ActionResult::with_status(ActionStatus::MemoryPressure, err.to_string())
        }
        CoreError::NotFound(context_id) => ActionResult::with_status(
            ActionStatus::ContextNotFound,
            format!("no such context: {context_id}"),
        ),
        CoreError::Backend(backend) => ActionResult::with_status(
            ActionStatus::BrowserNotFound,
            format!("engine could not provide a context: {backend}"),
        ),
        other => ActionResult::with_status(ActionStatus::InternalError, other.to_string()),
    }
}

/// Serializes an [`ActionOutput`] into the reply's `result` value,
/// merging any data payload into the object.
fn result_value(output: ActionOutput) -> Value {
    let mut value = serde_json::to_value(&output.result)
        .unwrap_or_else(|_| json!({"success": false, "status": "internal_error"}));
    if let (Value::Object(object), Some(data)) = (&mut value, output.data) {
        for (key, item) in data {
            object.insert(key, item);
        }
    }
    value
}
