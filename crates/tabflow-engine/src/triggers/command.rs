//! Command trigger handler
//!
//! Binds a global command name to a trigger. Dispatches reported by the
//! host fire every installed trigger bound to that command.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use tabflow_core::{TriggerConfig, TriggerKind, TriggerSpec};

use crate::host::{CommandDispatch, CommandHost};

use super::{FireRouter, FireSource, TriggerHandler};

pub struct CommandTriggerHandler {
    /// trigger id -> command name
    installed: Mutex<HashMap<Uuid, String>>,
    commands: Arc<dyn CommandHost>,
    router: Arc<FireRouter>,
}

impl CommandTriggerHandler {
    pub fn new(commands: Arc<dyn CommandHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashMap::new()),
            commands: Arc::clone(&commands),
            router,
        });

        let weak = Arc::downgrade(&handler);
        commands.subscribe(Arc::new(move |dispatch: &CommandDispatch| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let matched: Vec<Uuid> = handler
                .installed
                .lock()
                .iter()
                .filter(|(_, command)| **command == dispatch.command)
                .map(|(id, _)| *id)
                .collect();
            for trigger_id in matched {
                handler.router.fire_detached(
                    trigger_id,
                    FireSource {
                        source_tab_id: dispatch.tab_id,
                        source_url: dispatch.page_url.clone(),
                    },
                );
            }
        }));
        handler
    }
}

impl TriggerHandler for CommandTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Command
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::Command { command } = &spec.config else {
            warn!(trigger_id = %spec.id, "command handler got wrong config");
            return;
        };
        self.commands.register(command);
        self.installed.lock().insert(spec.id, command.clone());
    }

    fn uninstall(&self, id: Uuid) {
        if let Some(command) = self.installed.lock().remove(&id) {
            self.commands.unregister(&command);
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().keys().copied().collect()
    }
}
