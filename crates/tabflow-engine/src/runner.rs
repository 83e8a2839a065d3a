//! Per-run executor
//!
//! Walks one flow sequentially, deterministically and durably: preflight
//! (variables, entry resolution, binding rules, DAG validation), the main
//! node loop with retries, timeouts, pauses and breakpoints, and terminal
//! finalization. All storage writes and event appends go through the
//! run's serial write queue, which keeps per-run event order strict.
//!
//! The runner is single-threaded per run; node execution is never
//! re-entered. Every suspension point re-checks cancel and pause on
//! return.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tabflow_core::{
    any_rule_matches, find_next_node, resolve_entry_node, validate_flow, ErrorCode, Flow,
    GotoTarget, JsonMap, OnErrorDecision, OnErrorPolicy, PauseReason, Policy, QueueItem,
    QueueItemStatus, RetryPolicy, RunError, RunEvent, RunEventKind, RunRecord, RunStatus,
    ScreenshotPolicy, TimeoutScope, UnsupportedNodePolicy, ON_ERROR_EDGE_LABEL,
};
use tabflow_storage::Storage;

use crate::breakpoints::{BreakHit, BreakpointRegistry};
use crate::bus::EventBus;
use crate::control::{RunControl, RunHandle};
use crate::host::HostCapabilities;
use crate::registry::{NodeContext, NodeNext, NodeRegistry, PersistentVars};
use crate::write_queue::WriteQueue;

/// Loop guard: maximum node steps per run
pub const MAX_STEPS_PER_RUN: usize = 1000;

/// Shared dependencies a runner needs; cheap to clone per run
#[derive(Clone)]
pub struct RunnerEnv {
    pub storage: Arc<dyn Storage>,
    pub bus: Arc<EventBus>,
    pub nodes: Arc<NodeRegistry>,
    pub host: Arc<HostCapabilities>,
    pub breakpoints: Arc<BreakpointRegistry>,
    pub control: Arc<RunControl>,
    pub owner_id: String,
    pub lease_ttl: Duration,
}

/// Terminal outcome of a drive pass
enum Finished {
    Succeeded { outputs: JsonMap },
    Failed { error: RunError, node_id: Option<String> },
    Canceled { reason: Option<String> },
}

/// Executes exactly one run to a terminal status
pub struct Runner {
    env: RunnerEnv,
    item: QueueItem,
}

impl Runner {
    pub fn new(env: RunnerEnv, item: QueueItem) -> Self {
        Self { env, item }
    }

    /// Run to completion. Never panics outward; infrastructure failures
    /// finalize the run as `failed` with an `INTERNAL` error.
    #[instrument(skip(self), fields(run_id = %self.item.id))]
    pub async fn run(self) -> RunStatus {
        let run_id = self.item.id;
        let handle = RunHandle::new(run_id);
        self.env.control.register(Arc::clone(&handle));
        let writes = WriteQueue::new();

        let mut record = match self.load_record(&writes).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%run_id, "cannot load run record: {e}");
                self.env.control.unregister(run_id);
                writes.shutdown().await;
                return RunStatus::Failed;
            }
        };

        let finished = match self.drive(&handle, &writes, &mut record).await {
            Ok(finished) => finished,
            Err(error) => Finished::Failed {
                error,
                node_id: record.current_node_id.clone(),
            },
        };

        let status = self.finalize(&writes, &mut record, finished).await;

        self.env.host.network.stop(run_id).await;
        self.env.breakpoints.clear(run_id);
        self.env.control.unregister(run_id);
        writes.shutdown().await;
        status
    }

    /// Append an event through the serial write queue
    async fn emit(&self, writes: &WriteQueue, kind: RunEventKind) -> Result<RunEvent, RunError> {
        let bus = Arc::clone(&self.env.bus);
        let run_id = self.item.id;
        writes
            .exec(async move { bus.publish(run_id, kind).await })
            .await?
            .map_err(RunError::from)
    }

    /// Persist the record through the serial write queue, preserving the
    /// event-sequence cursor maintained by the store
    async fn save_record(&self, writes: &WriteQueue, record: &RunRecord) -> Result<(), RunError> {
        let storage = Arc::clone(&self.env.storage);
        let mut record = record.clone();
        record.updated_at = Utc::now();
        writes
            .exec(async move {
                if let Some(stored) = storage.get_run(record.id).await? {
                    record.next_seq = stored.next_seq;
                }
                storage.save_run(record).await
            })
            .await?
            .map_err(RunError::from)
    }

    /// Ensure the run record exists so later failure paths can patch it
    async fn load_record(&self, writes: &WriteQueue) -> Result<RunRecord, RunError> {
        if let Some(record) = self.env.storage.get_run(self.item.id).await? {
            return Ok(record);
        }
        let now = Utc::now();
        let mut record = RunRecord::queued(self.item.id, self.item.flow_id, now);
        record.args = self.item.args.clone();
        record.max_attempts = self.item.max_attempts;
        record.trigger = self.item.trigger.clone();
        record.debug = self.item.debug.clone();
        self.save_record(writes, &record).await?;
        Ok(record)
    }

    async fn drive(
        &self,
        handle: &Arc<RunHandle>,
        writes: &WriteQueue,
        record: &mut RunRecord,
    ) -> Result<Finished, RunError> {
        let run_id = self.item.id;

        // Debug config: seed breakpoints, honor pause-on-start
        if let Some(debug) = record.debug.clone().or_else(|| self.item.debug.clone()) {
            for node_id in debug.breakpoints {
                self.env.breakpoints.add_breakpoint(run_id, node_id);
            }
            if debug.pause_on_start {
                handle.request_pause();
            }
        }

        let flow = match self.env.storage.get_flow(record.flow_id).await {
            Ok(Some(flow)) => flow,
            Ok(None) => {
                return Ok(Finished::Failed {
                    error: RunError::validation(format!("flow {} not found", record.flow_id)),
                    node_id: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(error) = validate_flow(&flow) {
            return Ok(Finished::Failed { error, node_id: None });
        }

        let Some(entry) = resolve_entry_node(&flow, record.start_node_id.as_deref()) else {
            return Ok(Finished::Failed {
                error: RunError::validation("flow has no entry node"),
                node_id: None,
            });
        };
        let entry_id = entry.id.clone();

        // Binding rules are enforced before any side effects
        if !flow.bindings.is_empty() {
            match self.env.host.tabs.current_url(record.tab_id).await {
                Ok(Some(url)) if any_rule_matches(&flow.bindings, &url) => {}
                Ok(_) => {
                    return Ok(Finished::Failed {
                        error: RunError::validation("flow is not bound to the current page"),
                        node_id: None,
                    })
                }
                Err(error) => return Ok(Finished::Failed { error, node_id: None }),
            }
        }

        // Required variables: prompt the tab best-effort, then enforce
        let mut vars = flow.seed_vars(&record.args);
        let missing: Vec<String> = flow
            .missing_required_vars(&vars)
            .into_iter()
            .map(str::to_owned)
            .collect();
        for name in &missing {
            match self.env.host.tabs.prompt_variable(record.tab_id, name).await {
                Ok(Some(value)) => {
                    vars.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(e) => debug!(%run_id, name, "variable prompt failed: {e}"),
            }
        }
        let still_missing: Vec<String> = flow
            .missing_required_vars(&vars)
            .into_iter()
            .map(str::to_owned)
            .collect();
        if !still_missing.is_empty() {
            return Ok(Finished::Failed {
                error: RunError::validation("required variables are unset")
                    .with_data(serde_json::json!({ "missing": still_missing })),
                node_id: None,
            });
        }
        handle.replace_vars(vars);

        // Network capture is observability only; failures are invisible
        self.env.host.network.start(run_id, record.tab_id).await;

        let now = Utc::now();
        record.status = RunStatus::Running;
        record.started_at = Some(now);
        record.attempt += 1;
        if record.attempt > record.max_attempts {
            return Ok(Finished::Failed {
                error: RunError::internal(format!(
                    "run exceeded {} attempts",
                    record.max_attempts
                )),
                node_id: None,
            });
        }
        self.save_record(writes, record).await?;
        self.emit(
            writes,
            RunEventKind::RunStarted {
                flow_id: record.flow_id,
                entry_node_id: entry_id.clone(),
            },
        )
        .await?;

        self.walk(handle, writes, record, &flow, entry_id).await
    }

    /// The main node loop
    async fn walk(
        &self,
        handle: &Arc<RunHandle>,
        writes: &WriteQueue,
        record: &mut RunRecord,
        flow: &Flow,
        entry_id: String,
    ) -> Result<Finished, RunError> {
        let run_id = self.item.id;
        let run_deadline = flow
            .policy
            .as_ref()
            .and_then(|p| p.run_timeout)
            .and_then(|t| record.started_at.map(|s| s + t));

        let mut current = Some(entry_id);
        let mut outputs = JsonMap::new();
        let mut step_count = 0usize;

        while let Some(node_id) = current.clone() {
            step_count += 1;
            if step_count > MAX_STEPS_PER_RUN {
                return Ok(Finished::Failed {
                    error: RunError::new(
                        ErrorCode::DagExecutionFailed,
                        format!("run exceeded {MAX_STEPS_PER_RUN} node steps"),
                    ),
                    node_id: Some(node_id),
                });
            }
            if let Some(deadline) = run_deadline {
                if Utc::now() >= deadline {
                    return Ok(Finished::Failed {
                        error: RunError::timeout("run timeout exceeded"),
                        node_id: Some(node_id),
                    });
                }
            }

            // Persist the cursor; status stays whatever it is so a pause
            // in progress is not clobbered
            handle.set_current_node(Some(node_id.clone()));
            record.current_node_id = Some(node_id.clone());
            self.save_record(writes, record).await?;

            // Cancel/pause checkpoint
            if handle.gate().is_canceled() {
                return Ok(Finished::Canceled {
                    reason: handle.gate().cancel_reason(),
                });
            }
            if handle.gate().is_paused() {
                if let Some(finished) = self
                    .pause_here(handle, writes, record, PauseReason::Manual)
                    .await?
                {
                    return Ok(finished);
                }
            }

            let Some(node) = flow.node(&node_id) else {
                return Ok(Finished::Failed {
                    error: RunError::invariant(format!("current node {node_id} is not in the flow")),
                    node_id: Some(node_id),
                });
            };

            if node.disabled {
                self.emit(
                    writes,
                    RunEventKind::NodeSkipped {
                        node_id: node_id.clone(),
                        reason: "disabled".to_string(),
                    },
                )
                .await?;
                current = find_next_node(flow, &node_id, None).map(|n| n.id.clone());
                continue;
            }

            // Breakpoints and armed step-over pause before the node runs
            if let Some(hit) = self.env.breakpoints.check(run_id, &node_id) {
                let reason = match hit {
                    BreakHit::Breakpoint => PauseReason::Breakpoint {
                        node_id: node_id.clone(),
                    },
                    BreakHit::Step => PauseReason::Step {
                        node_id: node_id.clone(),
                    },
                };
                handle.gate().pause();
                if let Some(finished) = self.pause_here(handle, writes, record, reason).await? {
                    return Ok(finished);
                }
            }

            self.emit(
                writes,
                RunEventKind::NodeQueued {
                    node_id: node_id.clone(),
                },
            )
            .await?;

            let executor = self.env.nodes.get(&node.kind);
            let effective = Policy::effective(
                executor.as_ref().and_then(|e| e.default_policy()).as_ref(),
                flow.policy.as_ref().and_then(|p| p.node_defaults.as_ref()),
                node.policy.as_ref(),
            );

            let Some(executor) = executor else {
                let unsupported = flow
                    .policy
                    .as_ref()
                    .and_then(|p| p.on_unsupported_node)
                    .unwrap_or_default();
                match unsupported {
                    UnsupportedNodePolicy::Skip => {
                        self.emit(
                            writes,
                            RunEventKind::NodeSkipped {
                                node_id: node_id.clone(),
                                reason: format!("unsupported kind: {}", node.kind),
                            },
                        )
                        .await?;
                        current = find_next_node(flow, &node_id, None).map(|n| n.id.clone());
                        continue;
                    }
                    UnsupportedNodePolicy::Stop => {
                        let error = RunError::new(
                            ErrorCode::UnsupportedNode,
                            format!("unknown node kind: {}", node.kind),
                        );
                        let decision =
                            decide_on_error(&effective, &error, 1, has_on_error_edge(flow, &node_id));
                        self.emit(
                            writes,
                            RunEventKind::NodeFailed {
                                node_id: node_id.clone(),
                                attempt: 1,
                                error: error.clone(),
                                decision: decision.clone(),
                            },
                        )
                        .await?;
                        match self
                            .apply_decision(flow, &node_id, decision, error)
                            .await?
                        {
                            DecisionOutcome::Next(next) => {
                                current = next;
                                continue;
                            }
                            DecisionOutcome::Finish(finished) => return Ok(finished),
                            // Retrying an unknown kind cannot change the outcome
                            DecisionOutcome::Retry { .. } => {
                                return Ok(Finished::Failed {
                                    error: RunError::new(
                                        ErrorCode::UnsupportedNode,
                                        format!("unknown node kind: {}", node.kind),
                                    ),
                                    node_id: Some(node_id),
                                })
                            }
                        }
                    }
                }
            };

            // Attempt loop
            let mut attempt: u32 = 1;
            let mut node_budget_used = Duration::ZERO;
            let next = 'attempts: loop {
                self.emit(
                    writes,
                    RunEventKind::NodeStarted {
                        node_id: node_id.clone(),
                        attempt,
                    },
                )
                .await?;

                if let Some(finished) = self.apply_wait_policy(handle, record, &effective).await {
                    return Ok(finished);
                }

                let exec_result = match executor.validate_config(&node.config) {
                    Err(e) => Err(e),
                    Ok(()) => {
                        let ctx = NodeContext {
                            run_id,
                            flow_id: record.flow_id,
                            tab_id: record.tab_id,
                            attempt,
                            vars: handle.vars_snapshot(),
                            host: Arc::clone(&self.env.host),
                            persistent: PersistentVars::new(Arc::clone(&self.env.storage)),
                        };
                        self.execute_with_timeout(
                            &executor,
                            &ctx,
                            node,
                            &effective,
                            &mut node_budget_used,
                        )
                        .await
                    }
                };

                // Suspension return: honor cancel before anything else
                if handle.gate().is_canceled() {
                    return Ok(Finished::Canceled {
                        reason: handle.gate().cancel_reason(),
                    });
                }

                match exec_result {
                    Ok(success) => {
                        if matches!(
                            effective.artifacts.map(|a| a.screenshot),
                            Some(ScreenshotPolicy::EveryNode)
                        ) {
                            self.capture_artifact(writes, record, &node_id).await;
                        }
                        if !success.vars_patch.is_empty() {
                            handle.apply_patch(&success.vars_patch);
                            self.emit(
                                writes,
                                RunEventKind::VarsPatch {
                                    node_id: Some(node_id.clone()),
                                    patch: success.vars_patch.clone(),
                                },
                            )
                            .await?;
                        }
                        for log in &success.logs {
                            self.emit(
                                writes,
                                RunEventKind::Log {
                                    level: log.level,
                                    message: log.message.clone(),
                                    data: log.data.clone(),
                                },
                            )
                            .await?;
                        }
                        for (k, v) in &success.outputs {
                            outputs.insert(k.clone(), v.clone());
                        }
                        self.emit(
                            writes,
                            RunEventKind::NodeSucceeded {
                                node_id: node_id.clone(),
                                outputs: if success.outputs.is_empty() {
                                    None
                                } else {
                                    Some(success.outputs.clone())
                                },
                            },
                        )
                        .await?;

                        break 'attempts match success.next {
                            Some(NodeNext::End) => None,
                            Some(NodeNext::EdgeLabel(label)) => {
                                find_next_node(flow, &node_id, Some(&label)).map(|n| n.id.clone())
                            }
                            None => find_next_node(flow, &node_id, None).map(|n| n.id.clone()),
                        };
                    }
                    Err(error) => {
                        if matches!(
                            effective.artifacts.map(|a| a.screenshot),
                            Some(ScreenshotPolicy::OnFailure | ScreenshotPolicy::EveryNode)
                        ) {
                            self.capture_artifact(writes, record, &node_id).await;
                        }
                        let decision = decide_on_error(
                            &effective,
                            &error,
                            attempt,
                            has_on_error_edge(flow, &node_id),
                        );
                        self.emit(
                            writes,
                            RunEventKind::NodeFailed {
                                node_id: node_id.clone(),
                                attempt,
                                error: error.clone(),
                                decision: decision.clone(),
                            },
                        )
                        .await?;

                        match self.apply_decision(flow, &node_id, decision, error).await? {
                            DecisionOutcome::Next(next) => break 'attempts next,
                            DecisionOutcome::Finish(finished) => return Ok(finished),
                            DecisionOutcome::Retry { next_attempt, delay } => {
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                if handle.gate().is_canceled() {
                                    return Ok(Finished::Canceled {
                                        reason: handle.gate().cancel_reason(),
                                    });
                                }
                                if handle.gate().is_paused() {
                                    if let Some(finished) = self
                                        .pause_here(handle, writes, record, PauseReason::Manual)
                                        .await?
                                    {
                                        return Ok(finished);
                                    }
                                }
                                attempt = next_attempt;
                            }
                        }
                    }
                }
            };

            current = next;
        }

        // Sensitive outputs are filtered only at finalization
        for name in flow.sensitive_var_names() {
            outputs.remove(name);
        }
        Ok(Finished::Succeeded { outputs })
    }

    /// Park at the pause gate; returns a terminal outcome when the wait
    /// ended in cancellation
    async fn pause_here(
        &self,
        handle: &Arc<RunHandle>,
        writes: &WriteQueue,
        record: &mut RunRecord,
        reason: PauseReason,
    ) -> Result<Option<Finished>, RunError> {
        let run_id = self.item.id;
        info!(%run_id, ?reason, "run paused");

        self.emit(writes, RunEventKind::RunPaused { reason }).await?;
        record.status = RunStatus::Paused;
        self.save_record(writes, record).await?;
        self.mark_queue(writes, QueueItemStatus::Paused).await?;

        handle.gate().wait_while_paused().await;

        if handle.gate().is_canceled() {
            return Ok(Some(Finished::Canceled {
                reason: handle.gate().cancel_reason(),
            }));
        }

        self.emit(writes, RunEventKind::RunResumed {}).await?;
        record.status = RunStatus::Running;
        self.save_record(writes, record).await?;
        self.mark_queue(writes, QueueItemStatus::Running).await?;
        info!(%run_id, "run resumed");
        Ok(None)
    }

    async fn mark_queue(
        &self,
        writes: &WriteQueue,
        status: QueueItemStatus,
    ) -> Result<(), RunError> {
        let storage = Arc::clone(&self.env.storage);
        let run_id = self.item.id;
        let owner = self.env.owner_id.clone();
        let ttl = self.env.lease_ttl;
        writes
            .exec(async move {
                match status {
                    QueueItemStatus::Paused => {
                        storage.mark_paused(run_id, &owner, Utc::now(), ttl).await
                    }
                    QueueItemStatus::Running => {
                        storage.mark_running(run_id, &owner, Utc::now(), ttl).await
                    }
                    QueueItemStatus::Queued => storage.requeue(run_id).await,
                }
            })
            .await?
            .map_err(RunError::from)
    }

    /// Best-effort screenshot per the artifact policy; failures only log
    async fn capture_artifact(&self, writes: &WriteQueue, record: &RunRecord, node_id: &str) {
        let shot = match self.env.host.tabs.capture_screenshot(record.tab_id).await {
            Ok(Some(shot)) => shot,
            Ok(None) => return,
            Err(e) => {
                debug!(run_id = %self.item.id, node_id, "screenshot capture failed: {e}");
                return;
            }
        };
        let kind = RunEventKind::Log {
            level: tabflow_core::LogLevel::Debug,
            message: format!("screenshot captured at node {node_id}"),
            data: Some(serde_json::json!({ "node_id": node_id, "screenshot": shot })),
        };
        if let Err(e) = self.emit(writes, kind).await {
            debug!(run_id = %self.item.id, "screenshot event append failed: {e}");
        }
    }

    /// Apply the wait policy; only a cancellation interrupts it
    async fn apply_wait_policy(
        &self,
        handle: &Arc<RunHandle>,
        record: &RunRecord,
        policy: &Policy,
    ) -> Option<Finished> {
        let wait = policy.wait.as_ref()?;
        if let Some(delay) = wait.delay_before {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if handle.gate().is_canceled() {
                    return Some(Finished::Canceled {
                        reason: handle.gate().cancel_reason(),
                    });
                }
            }
        }
        if wait.wait_for_network_idle {
            if let Err(e) = self.env.host.tabs.wait_for_network_idle(record.tab_id).await {
                warn!(run_id = %self.item.id, "network-idle wait failed: {e}");
            }
        }
        if wait.wait_for_stable_dom {
            if let Err(e) = self.env.host.tabs.wait_for_stable_dom(record.tab_id).await {
                warn!(run_id = %self.item.id, "stable-dom wait failed: {e}");
            }
        }
        if handle.gate().is_canceled() {
            return Some(Finished::Canceled {
                reason: handle.gate().cancel_reason(),
            });
        }
        None
    }

    /// Race the executor against the effective timeout
    async fn execute_with_timeout(
        &self,
        executor: &Arc<dyn crate::registry::NodeExecutor>,
        ctx: &NodeContext,
        node: &tabflow_core::Node,
        policy: &Policy,
        node_budget_used: &mut Duration,
    ) -> crate::registry::NodeResult {
        let Some(timeout) = &policy.timeout else {
            return executor.execute(ctx, node).await;
        };

        let budget = match timeout.scope {
            TimeoutScope::Attempt => timeout.duration,
            // Node scope: the budget spans retries, so race the remainder
            TimeoutScope::Node => timeout.duration.saturating_sub(*node_budget_used),
        };
        if budget.is_zero() {
            return Err(RunError::timeout(format!(
                "node {} exhausted its {}ms budget",
                node.id,
                timeout.duration.as_millis()
            )));
        }

        let started = Instant::now();
        let result = tokio::time::timeout(budget, executor.execute(ctx, node)).await;
        *node_budget_used += started.elapsed();

        match result {
            Ok(inner) => inner,
            Err(_) => Err(RunError::timeout(format!(
                "node {} timed out after {}ms",
                node.id,
                budget.as_millis()
            ))),
        }
    }

    /// Translate an on-error decision into control flow
    async fn apply_decision(
        &self,
        flow: &Flow,
        node_id: &str,
        decision: OnErrorDecision,
        error: RunError,
    ) -> Result<DecisionOutcome, RunError> {
        Ok(match decision {
            OnErrorDecision::Stop => DecisionOutcome::Finish(Finished::Failed {
                error,
                node_id: Some(node_id.to_string()),
            }),
            OnErrorDecision::Continue => {
                DecisionOutcome::Next(find_next_node(flow, node_id, None).map(|n| n.id.clone()))
            }
            OnErrorDecision::Goto { target } => {
                let next = match &target {
                    GotoTarget::EdgeLabel(label) => {
                        find_next_node(flow, node_id, Some(label)).map(|n| n.id.clone())
                    }
                    GotoTarget::Node(id) => flow.node(id).map(|n| n.id.clone()),
                };
                match next {
                    Some(next) => DecisionOutcome::Next(Some(next)),
                    None => DecisionOutcome::Finish(Finished::Failed {
                        error: RunError::new(
                            ErrorCode::DagExecutionFailed,
                            format!("goto target not found from node {node_id}"),
                        )
                        .with_cause(error),
                        node_id: Some(node_id.to_string()),
                    }),
                }
            }
            OnErrorDecision::Retry {
                next_attempt,
                delay_ms,
            } => DecisionOutcome::Retry {
                next_attempt,
                delay: Duration::from_millis(delay_ms),
            },
        })
    }

    /// Write the trailing terminal event and patch the record
    async fn finalize(
        &self,
        writes: &WriteQueue,
        record: &mut RunRecord,
        finished: Finished,
    ) -> RunStatus {
        let run_id = self.item.id;
        let now = Utc::now();

        let (status, kind) = match finished {
            Finished::Succeeded { outputs } => {
                record.outputs = outputs.clone();
                record.error = None;
                (RunStatus::Succeeded, RunEventKind::RunSucceeded { outputs })
            }
            Finished::Failed { error, node_id } => {
                record.error = Some(error.clone());
                (RunStatus::Failed, RunEventKind::RunFailed { error, node_id })
            }
            Finished::Canceled { reason } => {
                record.error = Some(RunError::canceled(reason.as_deref()));
                (
                    RunStatus::Canceled,
                    RunEventKind::RunCanceled { reason },
                )
            }
        };

        // The trailing event must land before the record turns terminal;
        // the store refuses appends on terminal runs.
        if let Err(e) = self.emit(writes, kind).await {
            warn!(%run_id, "failed to append terminal event: {e}");
        }

        record.status = status;
        record.finished_at = Some(now);
        record.took_ms = record
            .started_at
            .map(|s| (now - s).num_milliseconds().max(0) as u64);
        if let Err(e) = self.save_record(writes, record).await {
            warn!(%run_id, "failed to persist terminal record: {e}");
        }

        info!(%run_id, %status, "run finished");
        status
    }
}

enum DecisionOutcome {
    /// Continue the walk at this node (None ends the run successfully)
    Next(Option<String>),
    Finish(Finished),
    Retry { next_attempt: u32, delay: Duration },
}

fn has_on_error_edge(flow: &Flow, node_id: &str) -> bool {
    flow.outgoing_edges(node_id)
        .any(|e| e.label.as_deref() == Some(ON_ERROR_EDGE_LABEL))
}

/// Resolve what to do about a failed attempt.
///
/// Explicit on-error policy wins. Without one, a configured retry policy
/// is consulted; once retries are exhausted or the code is rejected, an
/// `on_error` edge is followed when present, else the run stops.
fn decide_on_error(
    policy: &Policy,
    error: &RunError,
    attempt: u32,
    on_error_edge: bool,
) -> OnErrorDecision {
    if let Some(on_error) = &policy.on_error {
        return match on_error {
            OnErrorPolicy::Stop => OnErrorDecision::Stop,
            OnErrorPolicy::Continue => OnErrorDecision::Continue,
            OnErrorPolicy::Goto { target } => OnErrorDecision::Goto {
                target: target.clone(),
            },
            OnErrorPolicy::Retry { overrides } => {
                let retry = overrides.as_ref().or(policy.retry.as_ref());
                retry_decision(retry, error, attempt).unwrap_or(OnErrorDecision::Stop)
            }
        };
    }
    if let Some(decision) = retry_decision(policy.retry.as_ref(), error, attempt) {
        return decision;
    }
    if on_error_edge {
        return OnErrorDecision::Goto {
            target: GotoTarget::EdgeLabel(ON_ERROR_EDGE_LABEL.to_string()),
        };
    }
    OnErrorDecision::Stop
}

fn retry_decision(
    retry: Option<&RetryPolicy>,
    error: &RunError,
    attempt: u32,
) -> Option<OnErrorDecision> {
    let retry = retry?;
    // attempts are 1-based; `count` retries allow `count + 1` attempts
    if attempt > retry.count {
        return None;
    }
    if !retry.accepts(error.code) {
        return None;
    }
    let delay = retry.delay_for_retry(attempt);
    Some(OnErrorDecision::Retry {
        next_attempt: attempt + 1,
        delay_ms: delay.as_millis() as u64,
    })
}

/// Build a queue item for direct runner tests
pub fn queue_item_for(run_id: Uuid, flow_id: Uuid) -> QueueItem {
    QueueItem::queued(run_id, flow_id, 0, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_error() -> RunError {
        RunError::new(ErrorCode::ToolError, "boom")
    }

    #[test]
    fn default_decision_is_stop() {
        let policy = Policy::default();
        let decision = decide_on_error(&policy, &tool_error(), 1, false);
        assert!(matches!(decision, OnErrorDecision::Stop));
    }

    #[test]
    fn on_error_edge_is_followed_by_default() {
        let policy = Policy::default();
        let decision = decide_on_error(&policy, &tool_error(), 1, true);
        assert!(matches!(
            decision,
            OnErrorDecision::Goto { target: GotoTarget::EdgeLabel(ref l) } if l == ON_ERROR_EDGE_LABEL
        ));
    }

    #[test]
    fn retry_policy_bounds_attempts() {
        let policy = Policy {
            retry: Some(RetryPolicy::fixed(2, Duration::ZERO)),
            ..Default::default()
        };
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 1, false),
            OnErrorDecision::Retry { next_attempt: 2, .. }
        ));
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 2, false),
            OnErrorDecision::Retry { next_attempt: 3, .. }
        ));
        // count=2 means at most 3 attempts; the third failure stops
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 3, false),
            OnErrorDecision::Stop
        ));
    }

    #[test]
    fn exhausted_retries_fall_through_to_on_error_edge() {
        let policy = Policy {
            retry: Some(RetryPolicy::fixed(1, Duration::ZERO)),
            ..Default::default()
        };
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 2, true),
            OnErrorDecision::Goto { .. }
        ));
    }

    #[test]
    fn retry_on_rejection_stops_early() {
        let mut retry = RetryPolicy::fixed(5, Duration::ZERO);
        retry.retry_on = Some(vec![ErrorCode::Timeout]);
        let policy = Policy {
            retry: Some(retry),
            ..Default::default()
        };
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 1, false),
            OnErrorDecision::Stop
        ));
        assert!(matches!(
            decide_on_error(&policy, &RunError::timeout("t"), 1, false),
            OnErrorDecision::Retry { .. }
        ));
    }

    #[test]
    fn explicit_on_error_wins_over_retry_policy() {
        let policy = Policy {
            retry: Some(RetryPolicy::fixed(5, Duration::ZERO)),
            on_error: Some(OnErrorPolicy::Continue),
            ..Default::default()
        };
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 1, true),
            OnErrorDecision::Continue
        ));
    }

    #[test]
    fn explicit_retry_uses_overrides() {
        let policy = Policy {
            on_error: Some(OnErrorPolicy::Retry {
                overrides: Some(RetryPolicy::fixed(1, Duration::ZERO)),
            }),
            ..Default::default()
        };
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 1, false),
            OnErrorDecision::Retry { next_attempt: 2, .. }
        ));
        assert!(matches!(
            decide_on_error(&policy, &tool_error(), 2, false),
            OnErrorDecision::Stop
        ));
    }
}
