//! Manual trigger handler
//!
//! No platform listener. Installation only records the spec so the
//! reconcile diff stays accurate; fires happen exclusively through the
//! RPC `fireTrigger` path.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use tabflow_core::{TriggerKind, TriggerSpec};

use super::TriggerHandler;

#[derive(Default)]
pub struct ManualTriggerHandler {
    installed: Mutex<HashSet<Uuid>>,
}

impl ManualTriggerHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TriggerHandler for ManualTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Manual
    }

    fn install(&self, spec: &TriggerSpec) {
        self.installed.lock().insert(spec.id);
    }

    fn uninstall(&self, id: Uuid) {
        self.installed.lock().remove(&id);
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().iter().copied().collect()
    }
}
