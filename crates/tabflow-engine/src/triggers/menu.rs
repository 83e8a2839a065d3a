//! Context-menu trigger handler
//!
//! One menu item per installed trigger, with a namespaced item id so
//! clicks route back unambiguously. Clicks carry the source tab and page
//! URL into the fire context.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use tabflow_core::{TriggerConfig, TriggerKind, TriggerSpec};

use crate::host::{MenuClick, MenuHost};

use super::{FireRouter, FireSource, TriggerHandler};

const MENU_PREFIX: &str = "tabflow-menu-";

fn menu_item_id(trigger_id: Uuid) -> String {
    format!("{MENU_PREFIX}{trigger_id}")
}

pub struct ContextMenuTriggerHandler {
    installed: Mutex<HashSet<Uuid>>,
    menus: Arc<dyn MenuHost>,
    router: Arc<FireRouter>,
}

impl ContextMenuTriggerHandler {
    pub fn new(menus: Arc<dyn MenuHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashSet::new()),
            menus: Arc::clone(&menus),
            router,
        });

        let weak = Arc::downgrade(&handler);
        menus.subscribe(Arc::new(move |click: &MenuClick| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let Some(trigger_id) = click
                .item_id
                .strip_prefix(MENU_PREFIX)
                .and_then(|rest| Uuid::parse_str(rest).ok())
            else {
                return;
            };
            if handler.installed.lock().contains(&trigger_id) {
                handler.router.fire_detached(
                    trigger_id,
                    FireSource {
                        source_tab_id: click.tab_id,
                        source_url: click.page_url.clone(),
                    },
                );
            }
        }));
        handler
    }
}

impl TriggerHandler for ContextMenuTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ContextMenu
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::ContextMenu { title } = &spec.config else {
            warn!(trigger_id = %spec.id, "context-menu handler got wrong config");
            return;
        };
        self.menus.create_item(&menu_item_id(spec.id), title);
        self.installed.lock().insert(spec.id);
    }

    fn uninstall(&self, id: Uuid) {
        if self.installed.lock().remove(&id) {
            self.menus.remove_item(&menu_item_id(id));
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().iter().copied().collect()
    }
}
