//! RPC server
//!
//! Serves framed JSON messages over in-process ports: each connection is
//! a pair of channels plus a task that dispatches requests against the
//! engine. Subscriptions filter `event` pushes per connection; handler
//! errors become `{ok: false, error}` responses and are never thrown
//! across the channel.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tabflow_core::{RunError, TriggerContext};
use tabflow_engine::{
    DebugCommand, Engine, EnqueueRequest, FireSource, SubscriptionId,
};
use tabflow_storage::RunFilter;

use crate::protocol::{ClientFrame, ServerFrame};
use crate::validate::{
    normalize_flow, normalize_trigger, parse_params, CancelRunParams, EnqueueRunParams,
    FireTriggerParams, FlowInput, GetEventsParams, IdParams, ListRunsParams, RunIdParams,
    StartRunParams, SubscribeParams, TriggerInput,
};

/// One end of an RPC connection, as handed to a client
pub struct RpcConnection {
    /// Client-to-server frames
    pub tx: mpsc::UnboundedSender<ClientFrame>,

    /// Server-to-client frames
    pub rx: mpsc::UnboundedReceiver<ServerFrame>,
}

/// Dispatches RPC methods against an engine
pub struct RpcServer {
    engine: Arc<Engine>,
}

impl RpcServer {
    pub fn new(engine: Arc<Engine>) -> Arc<Self> {
        Arc::new(Self { engine })
    }

    /// Open a connection and spawn its serving task
    pub fn connect(self: &Arc<Self>) -> RpcConnection {
        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerFrame>();

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut subscription: Option<SubscriptionId> = None;

            while let Some(frame) = client_rx.recv().await {
                let ClientFrame::Request {
                    request_id,
                    method,
                    params,
                } = frame;

                let response = match method.as_str() {
                    "subscribe" => {
                        server.handle_subscribe(&server_tx, &mut subscription, params, &request_id)
                    }
                    "unsubscribe" => {
                        if let Some(id) = subscription.take() {
                            server.engine.bus().unsubscribe(id);
                        }
                        ServerFrame::ok(&request_id, json!({ "unsubscribed": true }))
                    }
                    _ => match server.dispatch(&method, params).await {
                        Ok(result) => ServerFrame::ok(&request_id, result),
                        Err(e) => {
                            debug!(method, "rpc error: {e}");
                            ServerFrame::err(&request_id, e.to_string())
                        }
                    },
                };
                if server_tx.send(response).is_err() {
                    break;
                }
            }

            if let Some(id) = subscription {
                server.engine.bus().unsubscribe(id);
            }
            debug!("rpc connection closed");
        });

        RpcConnection {
            tx: client_tx,
            rx: server_rx,
        }
    }

    fn handle_subscribe(
        &self,
        server_tx: &mpsc::UnboundedSender<ServerFrame>,
        subscription: &mut Option<SubscriptionId>,
        params: Value,
        request_id: &str,
    ) -> ServerFrame {
        let parsed: SubscribeParams = match parse_params("subscribe", params) {
            Ok(p) => p,
            Err(e) => return ServerFrame::err(request_id, e.to_string()),
        };

        if let Some(old) = subscription.take() {
            self.engine.bus().unsubscribe(old);
        }

        let events_tx = server_tx.clone();
        let id = self.engine.bus().subscribe(
            parsed.run_id,
            Arc::new(move |event| {
                let _ = events_tx.send(ServerFrame::Event {
                    event: event.clone(),
                });
            }),
        );
        *subscription = Some(id);

        let _ = server_tx.send(ServerFrame::SubscribeAck {
            run_id: parsed.run_id,
        });
        ServerFrame::ok(request_id, json!({ "subscribed": true }))
    }

    /// Method dispatch; every arm validates its params first
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RunError> {
        let storage = self.engine.storage();
        match method {
            // ----- runs -----
            "listRuns" => {
                let p: ListRunsParams = parse_params(method, params)?;
                let runs = storage
                    .list_runs(RunFilter {
                        status: p.status,
                        flow_id: p.flow_id,
                        limit: p.limit,
                    })
                    .await?;
                Ok(serde_json::to_value(runs).unwrap_or(Value::Null))
            }
            "getRun" => {
                let p: RunIdParams = parse_params(method, params)?;
                let run = storage
                    .get_run(p.run_id)
                    .await?
                    .ok_or_else(|| RunError::validation(format!("run {} not found", p.run_id)))?;
                Ok(serde_json::to_value(run).unwrap_or(Value::Null))
            }
            "getEvents" => {
                let p: GetEventsParams = parse_params(method, params)?;
                let events = storage
                    .list_events(p.run_id, p.from_seq, Some(p.page_limit()))
                    .await?;
                Ok(serde_json::to_value(events).unwrap_or(Value::Null))
            }

            // ----- flows -----
            "getFlow" => {
                let p: IdParams = parse_params(method, params)?;
                let flow = storage
                    .get_flow(p.id)
                    .await?
                    .ok_or_else(|| RunError::validation(format!("flow {} not found", p.id)))?;
                Ok(serde_json::to_value(flow).unwrap_or(Value::Null))
            }
            "listFlows" => {
                let flows = storage.list_flows().await?;
                Ok(serde_json::to_value(flows).unwrap_or(Value::Null))
            }
            "saveFlow" => {
                let input: FlowInput = parse_params(method, params)?;
                let flow = normalize_flow(storage.as_ref(), input).await?;
                storage.save_flow(flow.clone()).await?;
                Ok(serde_json::to_value(flow).unwrap_or(Value::Null))
            }
            "deleteFlow" => {
                let p: IdParams = parse_params(method, params)?;
                self.guard_flow_deletion(p.id).await?;
                let deleted = storage.delete_flow(p.id).await?;
                Ok(json!({ "deleted": deleted }))
            }

            // ----- triggers -----
            "createTrigger" => {
                let input: TriggerInput = parse_params(method, params)?;
                let spec = normalize_trigger(storage.as_ref(), input).await?;
                storage.save_trigger(spec.clone()).await?;
                self.engine.triggers().reconcile().await?;
                Ok(serde_json::to_value(spec).unwrap_or(Value::Null))
            }
            "updateTrigger" => {
                let input: TriggerInput = parse_params(method, params)?;
                let id = input
                    .id
                    .ok_or_else(|| RunError::validation("updateTrigger requires an id"))?;
                if storage.get_trigger(id).await?.is_none() {
                    return Err(RunError::validation(format!("trigger {id} not found")));
                }
                let spec = normalize_trigger(storage.as_ref(), input).await?;
                storage.save_trigger(spec.clone()).await?;
                self.engine.triggers().reconcile().await?;
                Ok(serde_json::to_value(spec).unwrap_or(Value::Null))
            }
            "deleteTrigger" => {
                let p: IdParams = parse_params(method, params)?;
                let deleted = storage.delete_trigger(p.id).await?;
                self.engine.triggers().reconcile().await?;
                Ok(json!({ "deleted": deleted }))
            }
            "getTrigger" => {
                let p: IdParams = parse_params(method, params)?;
                let spec = storage
                    .get_trigger(p.id)
                    .await?
                    .ok_or_else(|| RunError::validation(format!("trigger {} not found", p.id)))?;
                Ok(serde_json::to_value(spec).unwrap_or(Value::Null))
            }
            "listTriggers" => {
                let specs = storage.list_triggers().await?;
                Ok(serde_json::to_value(specs).unwrap_or(Value::Null))
            }
            "enableTrigger" => self.set_trigger_enabled(params, true).await,
            "disableTrigger" => self.set_trigger_enabled(params, false).await,
            "fireTrigger" => {
                let p: FireTriggerParams = parse_params(method, params)?;
                let receipt = self
                    .engine
                    .triggers()
                    .fire(
                        p.trigger_id,
                        FireSource {
                            source_tab_id: p.source_tab_id,
                            source_url: p.source_url,
                        },
                    )
                    .await?;
                Ok(match receipt {
                    Some(receipt) => json!({
                        "fired": true,
                        "runId": receipt.run_id,
                        "position": receipt.position,
                    }),
                    None => json!({ "fired": false }),
                })
            }

            // ----- queue -----
            "enqueueRun" => {
                let p: EnqueueRunParams = parse_params(method, params)?;
                let receipt = self
                    .engine
                    .enqueue()
                    .enqueue(EnqueueRequest {
                        flow_id: p.flow_id,
                        start_node_id: p.start_node_id,
                        priority: p.priority,
                        max_attempts: p.max_attempts,
                        args: p.args,
                        trigger: None,
                        debug: p.debug,
                        tab_id: p.tab_id,
                    })
                    .await?;
                Ok(json!({ "runId": receipt.run_id, "position": receipt.position }))
            }
            "listQueue" => {
                let items = storage.list_items(None).await?;
                Ok(serde_json::to_value(items).unwrap_or(Value::Null))
            }
            "cancelQueueItem" => {
                let p: RunIdParams = parse_params(method, params)?;
                self.engine.control().cancel(p.run_id, None).await?;
                Ok(json!({ "canceled": true }))
            }

            // ----- run control -----
            "startRun" => {
                let p: StartRunParams = parse_params(method, params)?;
                let receipt = self
                    .engine
                    .enqueue()
                    .enqueue(EnqueueRequest {
                        flow_id: p.flow_id,
                        start_node_id: p.start_node_id,
                        priority: 0,
                        max_attempts: 1,
                        args: p.args,
                        trigger: Some(TriggerContext::manual()),
                        debug: p.debug,
                        tab_id: p.tab_id,
                    })
                    .await?;
                Ok(json!({ "runId": receipt.run_id, "position": receipt.position }))
            }
            "cancelRun" => {
                let p: CancelRunParams = parse_params(method, params)?;
                self.engine.control().cancel(p.run_id, p.reason).await?;
                Ok(json!({ "canceled": true }))
            }
            "pauseRun" => {
                let p: RunIdParams = parse_params(method, params)?;
                self.engine.control().pause(p.run_id).await?;
                Ok(json!({ "requested": true }))
            }
            "resumeRun" => {
                let p: RunIdParams = parse_params(method, params)?;
                self.engine.control().resume(p.run_id).await?;
                Ok(json!({ "resumed": true }))
            }

            // ----- debug -----
            "debug" => {
                let command: DebugCommand = parse_params(method, params)?;
                self.engine.debug().handle(command).await
            }

            other => Err(RunError::validation(format!("unknown method: {other}"))),
        }
    }

    async fn set_trigger_enabled(&self, params: Value, enabled: bool) -> Result<Value, RunError> {
        let p: IdParams = parse_params("enableTrigger", params)?;
        let storage = self.engine.storage();
        let mut spec = storage
            .get_trigger(p.id)
            .await?
            .ok_or_else(|| RunError::validation(format!("trigger {} not found", p.id)))?;
        spec.enabled = enabled;
        spec.updated_at = Utc::now();
        storage.save_trigger(spec.clone()).await?;
        if let Err(e) = self.engine.triggers().reconcile().await {
            warn!("trigger reconcile after toggle failed: {e}");
        }
        Ok(serde_json::to_value(spec).unwrap_or(Value::Null))
    }

    /// Flows stay deletable only while nothing references them
    async fn guard_flow_deletion(&self, flow_id: uuid::Uuid) -> Result<(), RunError> {
        let storage = self.engine.storage();
        let linked_triggers = storage
            .list_triggers()
            .await?
            .into_iter()
            .any(|t| t.flow_id == flow_id);
        if linked_triggers {
            return Err(RunError::validation(
                "flow has linked triggers; delete them first",
            ));
        }
        let queued = storage
            .list_items(None)
            .await?
            .into_iter()
            .any(|i| i.flow_id == flow_id);
        if queued {
            return Err(RunError::validation(
                "flow has queued or active runs; cancel them first",
            ));
        }
        Ok(())
    }
}
