//! URL trigger handler
//!
//! Listens to completed main-frame navigations and matches each installed
//! spec's normalized rule list. Matching is prefix/domain comparison only;
//! the safe-subdomain rule never matches lookalike hosts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use tabflow_core::{any_rule_matches, TriggerConfig, TriggerKind, TriggerSpec, UrlRule};

use crate::host::{NavigationEvent, NavigationHost};

use super::{FireRouter, FireSource, TriggerHandler};

pub struct UrlTriggerHandler {
    rules: Mutex<HashMap<Uuid, Vec<UrlRule>>>,
    router: Arc<FireRouter>,
}

impl UrlTriggerHandler {
    pub fn new(navigation: &dyn NavigationHost, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            rules: Mutex::new(HashMap::new()),
            router,
        });

        let weak = Arc::downgrade(&handler);
        navigation.subscribe(Arc::new(move |event| {
            if let Some(handler) = weak.upgrade() {
                handler.on_navigation(event);
            }
        }));
        handler
    }

    fn on_navigation(&self, event: &NavigationEvent) {
        if !event.main_frame {
            return;
        }
        let Ok(url) = Url::parse(&event.url) else {
            return;
        };

        let matched: Vec<Uuid> = self
            .rules
            .lock()
            .iter()
            .filter(|(_, rules)| any_rule_matches(rules, &url))
            .map(|(id, _)| *id)
            .collect();

        for trigger_id in matched {
            self.router.fire_detached(
                trigger_id,
                FireSource {
                    source_tab_id: Some(event.tab_id),
                    source_url: Some(event.url.clone()),
                },
            );
        }
    }
}

impl TriggerHandler for UrlTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Url
    }

    fn install(&self, spec: &TriggerSpec) {
        match &spec.config {
            TriggerConfig::Url { rules } => {
                self.rules.lock().insert(spec.id, rules.clone());
            }
            other => warn!(trigger_id = %spec.id, "url handler got {:?}", other.kind()),
        }
    }

    fn uninstall(&self, id: Uuid) {
        self.rules.lock().remove(&id);
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.rules.lock().keys().copied().collect()
    }
}
