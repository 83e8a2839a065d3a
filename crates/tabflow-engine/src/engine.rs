//! Engine facade
//!
//! Wires storage, the event bus, the plugin registry, run control, the
//! scheduler, the enqueue service, the trigger manager and the debug
//! controller into one object. Startup order matters: crash recovery
//! runs first, then trigger reconciliation, then the scheduler.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use tabflow_storage::Storage;

use crate::breakpoints::BreakpointRegistry;
use crate::bus::EventBus;
use crate::control::RunControl;
use crate::debug::DebugController;
use crate::enqueue::EnqueueService;
use crate::host::HostCapabilities;
use crate::recovery::{recover, RecoveryReport};
use crate::registry::NodeRegistry;
use crate::runner::RunnerEnv;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::triggers::{FireRouter, TriggerManager};

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
}

/// The assembled execution engine
pub struct Engine {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    host: Arc<HostCapabilities>,
    breakpoints: Arc<BreakpointRegistry>,
    control: Arc<RunControl>,
    scheduler: Arc<Scheduler>,
    enqueue: Arc<EnqueueService>,
    triggers: Arc<TriggerManager>,
    debug: Arc<DebugController>,
    config: EngineConfig,
}

impl Engine {
    /// Assemble an engine over the given storage, host ports and node
    /// registry. Nothing starts until [`Engine::start`].
    pub fn new(
        storage: Arc<dyn Storage>,
        host: Arc<HostCapabilities>,
        nodes: NodeRegistry,
        config: EngineConfig,
    ) -> Arc<Self> {
        let bus = EventBus::new(Arc::clone(&storage));
        let kick = Arc::new(Notify::new());
        let breakpoints = Arc::new(BreakpointRegistry::new());
        let control = RunControl::new(Arc::clone(&storage), Arc::clone(&bus), Arc::clone(&kick));

        let env = RunnerEnv {
            storage: Arc::clone(&storage),
            bus: Arc::clone(&bus),
            nodes: Arc::new(nodes),
            host: Arc::clone(&host),
            breakpoints: Arc::clone(&breakpoints),
            control: Arc::clone(&control),
            owner_id: config.scheduler.owner_id.clone(),
            lease_ttl: config.scheduler.lease_ttl,
        };

        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&storage),
            env,
            Arc::clone(&kick),
        );
        let enqueue = EnqueueService::new(Arc::clone(&storage), Arc::clone(&bus), kick);
        let router = FireRouter::new(Arc::clone(&storage), Arc::clone(&enqueue));
        let triggers = TriggerManager::with_default_handlers(Arc::clone(&storage), router, &host);
        let debug = DebugController::new(
            Arc::clone(&storage),
            Arc::clone(&control),
            Arc::clone(&breakpoints),
        );
        debug.attach_to_bus(&bus);

        Arc::new(Self {
            storage,
            bus,
            host,
            breakpoints,
            control,
            scheduler,
            enqueue,
            triggers,
            debug,
            config,
        })
    }

    /// Recover, reconcile triggers, then start scheduling
    pub async fn start(&self) -> RecoveryReport {
        let report = recover(
            &self.storage,
            &self.bus,
            self.scheduler.owner_id(),
            self.config.scheduler.lease_ttl,
        )
        .await;

        if let Err(e) = self.triggers.reconcile().await {
            tracing::warn!("initial trigger reconcile failed: {e}");
        }

        self.scheduler.start();
        info!(owner_id = %self.scheduler.owner_id(), "engine started");
        report
    }

    /// Stop scheduling; in-flight runs are not canceled
    pub fn stop(&self) {
        self.scheduler.stop();
        self.triggers.uninstall_all();
        info!("engine stopped");
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn host(&self) -> &Arc<HostCapabilities> {
        &self.host
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointRegistry> {
        &self.breakpoints
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn enqueue(&self) -> &Arc<EnqueueService> {
        &self.enqueue
    }

    pub fn triggers(&self) -> &Arc<TriggerManager> {
        &self.triggers
    }

    pub fn debug(&self) -> &Arc<DebugController> {
        &self.debug
    }
}
