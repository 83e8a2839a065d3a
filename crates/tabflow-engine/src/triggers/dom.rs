//! DOM trigger handler
//!
//! Installs a selector observer through the host port; matches reported
//! by the injected observer fire the trigger with the source tab and URL.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use tabflow_core::{TriggerConfig, TriggerKind, TriggerSpec};

use crate::host::{DomMatch, DomObserverHost};

use super::{FireRouter, FireSource, TriggerHandler};

pub struct DomTriggerHandler {
    installed: Mutex<HashSet<Uuid>>,
    dom: Arc<dyn DomObserverHost>,
    router: Arc<FireRouter>,
}

impl DomTriggerHandler {
    pub fn new(dom: Arc<dyn DomObserverHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashSet::new()),
            dom: Arc::clone(&dom),
            router,
        });

        let weak = Arc::downgrade(&handler);
        dom.subscribe(Arc::new(move |matched: &DomMatch| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let Ok(trigger_id) = Uuid::parse_str(&matched.observer_id) else {
                return;
            };
            if handler.installed.lock().contains(&trigger_id) {
                handler.router.fire_detached(
                    trigger_id,
                    FireSource {
                        source_tab_id: matched.tab_id,
                        source_url: matched.page_url.clone(),
                    },
                );
            }
        }));
        handler
    }
}

impl TriggerHandler for DomTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Dom
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::Dom { selector, options } = &spec.config else {
            warn!(trigger_id = %spec.id, "dom handler got wrong config");
            return;
        };
        self.dom.observe(&spec.id.to_string(), selector, options);
        self.installed.lock().insert(spec.id);
    }

    fn uninstall(&self, id: Uuid) {
        if self.installed.lock().remove(&id) {
            self.dom.unobserve(&id.to_string());
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().iter().copied().collect()
    }
}
