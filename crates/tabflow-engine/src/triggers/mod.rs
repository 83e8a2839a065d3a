//! Trigger subsystem
//!
//! Each trigger kind has one handler that installs and uninstalls
//! persisted specs against its host surface. The [`TriggerManager`]
//! reconciles the persisted set against what is installed on every
//! trigger CRUD, and every fire funnels through one [`FireRouter`] into
//! the enqueue service.

mod alarm;
mod command;
mod dom;
mod manual;
mod menu;
mod url;

pub use alarm::{CronTriggerHandler, IntervalTriggerHandler, OnceTriggerHandler};
pub use command::CommandTriggerHandler;
pub use dom::DomTriggerHandler;
pub use manual::ManualTriggerHandler;
pub use menu::ContextMenuTriggerHandler;
pub use url::UrlTriggerHandler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tabflow_core::{RunError, TriggerConfig, TriggerContext, TriggerKind, TriggerSpec};
use tabflow_storage::Storage;

use crate::enqueue::{EnqueueReceipt, EnqueueRequest, EnqueueService};
use crate::host::HostCapabilities;

/// Where a fire came from
#[derive(Debug, Clone, Default)]
pub struct FireSource {
    pub source_tab_id: Option<i64>,
    pub source_url: Option<String>,
}

/// A trigger-kind handler managing its installed specs
pub trait TriggerHandler: Send + Sync {
    fn kind(&self) -> TriggerKind;

    fn install(&self, spec: &TriggerSpec);

    fn uninstall(&self, id: Uuid);

    fn uninstall_all(&self) {
        for id in self.installed_ids() {
            self.uninstall(id);
        }
    }

    fn installed_ids(&self) -> Vec<Uuid>;
}

/// The shared fire path: load the spec, refuse disabled, enqueue
pub struct FireRouter {
    storage: Arc<dyn Storage>,
    enqueue: Arc<EnqueueService>,
}

impl FireRouter {
    pub fn new(storage: Arc<dyn Storage>, enqueue: Arc<EnqueueService>) -> Arc<Self> {
        Arc::new(Self { storage, enqueue })
    }

    /// Fire a trigger; returns None when the spec is gone or disabled
    #[instrument(skip(self, source), fields(trigger_id = %trigger_id))]
    pub async fn on_fire(
        &self,
        trigger_id: Uuid,
        source: FireSource,
    ) -> Result<Option<EnqueueReceipt>, RunError> {
        let Some(spec) = self.storage.get_trigger(trigger_id).await? else {
            warn!("fire for unknown trigger");
            return Ok(None);
        };
        if !spec.enabled {
            debug!("fire refused: trigger disabled");
            return Ok(None);
        }

        let context = TriggerContext {
            trigger_id: Some(trigger_id),
            kind: spec.kind(),
            source_tab_id: source.source_tab_id,
            source_url: source.source_url,
            fired_at: Utc::now(),
        };

        let mut request = EnqueueRequest::new(spec.flow_id);
        request.args = spec.args.clone();
        request.trigger = Some(context);
        let receipt = self.enqueue.enqueue(request).await?;
        info!(run_id = %receipt.run_id, "trigger enqueued run");

        // One-shot triggers disable themselves after firing
        if matches!(spec.config, TriggerConfig::Once { .. }) {
            let mut spec = spec;
            spec.enabled = false;
            spec.updated_at = Utc::now();
            self.storage.save_trigger(spec).await?;
        }

        Ok(Some(receipt))
    }

    /// Fire from a sync host callback; errors are logged, never thrown
    pub fn fire_detached(self: &Arc<Self>, trigger_id: Uuid, source: FireSource) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = router.on_fire(trigger_id, source).await {
                warn!(%trigger_id, "trigger fire failed: {e}");
            }
        });
    }
}

/// Reconciles persisted trigger specs against installed handlers
pub struct TriggerManager {
    storage: Arc<dyn Storage>,
    router: Arc<FireRouter>,
    handlers: HashMap<TriggerKind, Arc<dyn TriggerHandler>>,
    installed: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    version: AtomicU64,
}

impl TriggerManager {
    /// Build a manager with the standard handler per kind
    pub fn with_default_handlers(
        storage: Arc<dyn Storage>,
        router: Arc<FireRouter>,
        host: &HostCapabilities,
    ) -> Arc<Self> {
        let mut handlers: HashMap<TriggerKind, Arc<dyn TriggerHandler>> = HashMap::new();
        let list: Vec<Arc<dyn TriggerHandler>> = vec![
            ManualTriggerHandler::new(),
            UrlTriggerHandler::new(host.navigation.as_ref(), Arc::clone(&router)),
            IntervalTriggerHandler::new(Arc::clone(&host.alarms), Arc::clone(&router)),
            OnceTriggerHandler::new(Arc::clone(&host.alarms), Arc::clone(&router)),
            CronTriggerHandler::new(Arc::clone(&host.alarms), Arc::clone(&router)),
            ContextMenuTriggerHandler::new(Arc::clone(&host.menus), Arc::clone(&router)),
            DomTriggerHandler::new(Arc::clone(&host.dom), Arc::clone(&router)),
            CommandTriggerHandler::new(Arc::clone(&host.commands), Arc::clone(&router)),
        ];
        for handler in list {
            handlers.insert(handler.kind(), handler);
        }

        Arc::new(Self {
            storage,
            router,
            handlers,
            installed: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
        })
    }

    pub fn handler(&self, kind: TriggerKind) -> Option<Arc<dyn TriggerHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Fire a trigger explicitly (the RPC `fireTrigger` path)
    pub async fn fire(
        &self,
        trigger_id: Uuid,
        source: FireSource,
    ) -> Result<Option<EnqueueReceipt>, RunError> {
        self.router.on_fire(trigger_id, source).await
    }

    /// Diff the persisted spec set against installed handlers.
    ///
    /// Installs are versioned: a reconcile that loses the race to a newer
    /// one drops its results instead of applying stale state.
    pub async fn reconcile(&self) -> Result<(), RunError> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let specs = self.storage.list_triggers().await?;
        if self.version.load(Ordering::SeqCst) != version {
            debug!("reconcile superseded by a newer pass");
            return Ok(());
        }

        let desired: HashMap<Uuid, &TriggerSpec> = specs
            .iter()
            .filter(|s| s.enabled)
            .map(|s| (s.id, s))
            .collect();

        let mut installed = self.installed.lock();

        // Uninstall removed, disabled or stale-updated specs
        let stale: Vec<Uuid> = installed
            .iter()
            .filter(|(id, installed_at)| {
                desired
                    .get(*id)
                    .map_or(true, |spec| spec.updated_at != **installed_at)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(at) = installed.remove(&id) {
                let kind = specs
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.kind());
                match kind.and_then(|k| self.handlers.get(&k)) {
                    Some(handler) => handler.uninstall(id),
                    // Spec is gone; the kind is unknown, ask every handler
                    None => self.handlers.values().for_each(|h| h.uninstall(id)),
                }
                debug!(%id, installed_at = %at, "trigger uninstalled");
            }
        }

        // Install new specs
        for (id, spec) in &desired {
            if installed.contains_key(id) {
                continue;
            }
            match self.handlers.get(&spec.kind()) {
                Some(handler) => {
                    handler.install(spec);
                    installed.insert(*id, spec.updated_at);
                    debug!(%id, kind = %spec.kind(), "trigger installed");
                }
                None => warn!(%id, kind = %spec.kind(), "no handler for trigger kind"),
            }
        }

        info!(installed = installed.len(), "trigger reconcile complete");
        Ok(())
    }

    /// Uninstall everything (shutdown path)
    pub fn uninstall_all(&self) {
        for handler in self.handlers.values() {
            handler.uninstall_all();
        }
        self.installed.lock().clear();
    }

    pub fn installed_count(&self) -> usize {
        self.installed.lock().len()
    }
}
