//! Queue scheduler
//!
//! Claims runs off the durable queue and executes them, enforcing
//! `max_parallel_runs` per owner. Multiple kicks coalesce into a single
//! pump pass; a polling tick backstops any missed kick. Background loops
//! heartbeat the owner's leases and reclaim expired ones. A ref-counted
//! keepalive is held while any run is active.
//!
//! Stopping the scheduler does not cancel in-flight runs; their leases
//! simply expire and the next owner reclaims them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tabflow_core::QueueItem;
use tabflow_storage::Storage;

use crate::host::KeepaliveController;
use crate::runner::{Runner, RunnerEnv};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lease owner identity; unique per engine instance
    pub owner_id: String,

    pub max_parallel_runs: usize,

    pub lease_ttl: Duration,

    pub heartbeat_interval: Duration,

    pub reclaim_interval: Duration,

    /// Fallback pump cadence in case a kick is missed
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            owner_id: format!("engine-{}", Uuid::now_v7()),
            max_parallel_runs: 4,
            lease_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            reclaim_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_max_parallel_runs(mut self, max: usize) -> Self {
        self.max_parallel_runs = max.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Claims queued runs and drives them in parallel
pub struct Scheduler {
    config: SchedulerConfig,
    storage: Arc<dyn Storage>,
    env: RunnerEnv,
    active: Mutex<HashSet<Uuid>>,
    kick: Arc<Notify>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    keepalive: Arc<KeepaliveController>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        storage: Arc<dyn Storage>,
        env: RunnerEnv,
        kick: Arc<Notify>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let keepalive = KeepaliveController::new(Arc::clone(&env.host.keepalive));
        Arc::new(Self {
            config,
            storage,
            env,
            active: Mutex::new(HashSet::new()),
            kick,
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            keepalive,
            loops: Mutex::new(Vec::new()),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.config.owner_id
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Wake the pump; multiple kicks coalesce
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Start the pump, heartbeat and reclaim loops
    #[instrument(skip(self), fields(owner_id = %self.config.owner_id))]
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("scheduler already started");
            return;
        }
        info!(
            max_parallel = self.config.max_parallel_runs,
            "starting scheduler"
        );

        let mut loops = self.loops.lock();
        loops.push(self.spawn_pump_loop());
        loops.push(self.spawn_heartbeat_loop());
        loops.push(self.spawn_reclaim_loop());
        drop(loops);

        self.kick();
    }

    /// Stop the loops; in-flight runs keep going
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(owner_id = %self.config.owner_id, "stopping scheduler");
        let _ = self.shutdown_tx.send(true);
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
    }

    fn spawn_pump_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                scheduler.pump().await;
                tokio::select! {
                    _ = scheduler.kick.notified() => {}
                    _ = tokio::time::sleep(scheduler.config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("pump loop: shutdown requested");
                        break;
                    }
                }
                if !scheduler.started.load(Ordering::SeqCst) {
                    break;
                }
            }
            debug!("pump loop exited");
        })
    }

    /// Claim and launch runs until parallelism is saturated or the queue
    /// is empty
    async fn pump(self: &Arc<Self>) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        loop {
            if self.active_count() >= self.config.max_parallel_runs {
                return;
            }
            let claimed = match self
                .storage
                .claim_next(&self.config.owner_id, Utc::now(), self.config.lease_ttl)
                .await
            {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(e) => {
                    error!("claim failed: {e}");
                    return;
                }
            };
            self.launch(claimed);
        }
    }

    fn launch(self: &Arc<Self>, item: QueueItem) {
        let run_id = item.id;
        {
            let mut active = self.active.lock();
            if !active.insert(run_id) {
                // Double claim by the same scheduler is a logic bug; retire
                // the item rather than executing it twice.
                error!(%run_id, "invariant violation: run claimed twice by one scheduler");
                let storage = Arc::clone(&self.storage);
                tokio::spawn(async move {
                    if let Err(e) = storage.mark_done(run_id).await {
                        error!(%run_id, "failed to retire double-claimed run: {e}");
                    }
                });
                return;
            }
        }

        let scheduler = Arc::clone(self);
        let keepalive_guard = self.keepalive.acquire();
        tokio::spawn(async move {
            let _keepalive = keepalive_guard;
            let status = Runner::new(scheduler.env.clone(), item).run().await;
            debug!(%run_id, %status, "run task finished");

            if let Err(e) = scheduler.storage.mark_done(run_id).await {
                warn!(%run_id, "mark_done failed: {e}");
            }
            scheduler.active.lock().remove(&run_id);
            scheduler.kick();
        });
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = scheduler
                            .storage
                            .heartbeat(&scheduler.config.owner_id, Utc::now(), scheduler.config.lease_ttl)
                            .await;
                        match result {
                            Ok(renewed) if renewed > 0 => debug!(renewed, "leases renewed"),
                            Ok(_) => {}
                            Err(e) => error!("heartbeat failed: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("heartbeat loop: shutdown requested");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_reclaim_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.reclaim_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.storage.reclaim_expired_leases(Utc::now()).await {
                            Ok(reclaimed) if !reclaimed.is_empty() => {
                                info!(count = reclaimed.len(), "reclaimed expired leases");
                                scheduler.kick();
                            }
                            Ok(_) => {}
                            Err(e) => error!("lease reclamation failed: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("reclaim loop: shutdown requested");
                        break;
                    }
                }
            }
        })
    }
}
