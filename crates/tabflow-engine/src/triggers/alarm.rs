//! Alarm-backed trigger handlers: interval, once and cron
//!
//! Each handler namespaces its alarm names so fires route back to the
//! right handler. `once` disables its spec through the fire router and
//! uninstalls itself; `cron` re-arms the next hour/day slot after every
//! fire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use tabflow_core::{CronSchedule, TriggerConfig, TriggerKind, TriggerSpec};

use crate::host::AlarmHost;

use super::{FireRouter, FireSource, TriggerHandler};

fn alarm_trigger_id(prefix: &str, name: &str) -> Option<Uuid> {
    name.strip_prefix(prefix)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

// =============================================================================
// interval
// =============================================================================

const INTERVAL_PREFIX: &str = "interval:";

pub struct IntervalTriggerHandler {
    installed: Mutex<HashSet<Uuid>>,
    alarms: Arc<dyn AlarmHost>,
    router: Arc<FireRouter>,
}

impl IntervalTriggerHandler {
    pub fn new(alarms: Arc<dyn AlarmHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashSet::new()),
            alarms: Arc::clone(&alarms),
            router,
        });

        let weak = Arc::downgrade(&handler);
        alarms.subscribe(Arc::new(move |name| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let Some(trigger_id) = alarm_trigger_id(INTERVAL_PREFIX, name) else {
                return;
            };
            if handler.installed.lock().contains(&trigger_id) {
                handler.router.fire_detached(trigger_id, FireSource::default());
            }
        }));
        handler
    }
}

impl TriggerHandler for IntervalTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Interval
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::Interval { period_minutes } = &spec.config else {
            warn!(trigger_id = %spec.id, "interval handler got wrong config");
            return;
        };
        let period = (*period_minutes).max(1);
        self.alarms.set_recurring(
            &format!("{INTERVAL_PREFIX}{}", spec.id),
            Duration::from_secs(u64::from(period) * 60),
        );
        self.installed.lock().insert(spec.id);
    }

    fn uninstall(&self, id: Uuid) {
        if self.installed.lock().remove(&id) {
            self.alarms.clear(&format!("{INTERVAL_PREFIX}{id}"));
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().iter().copied().collect()
    }
}

// =============================================================================
// once
// =============================================================================

const ONCE_PREFIX: &str = "once:";

pub struct OnceTriggerHandler {
    installed: Mutex<HashSet<Uuid>>,
    alarms: Arc<dyn AlarmHost>,
    router: Arc<FireRouter>,
}

impl OnceTriggerHandler {
    pub fn new(alarms: Arc<dyn AlarmHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashSet::new()),
            alarms: Arc::clone(&alarms),
            router,
        });

        let weak = Arc::downgrade(&handler);
        alarms.subscribe(Arc::new(move |name| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let Some(trigger_id) = alarm_trigger_id(ONCE_PREFIX, name) else {
                return;
            };
            if handler.installed.lock().remove(&trigger_id) {
                handler.alarms.clear(&format!("{ONCE_PREFIX}{trigger_id}"));
                // The router disables the spec after the fire
                handler.router.fire_detached(trigger_id, FireSource::default());
            }
        }));
        handler
    }
}

impl TriggerHandler for OnceTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Once
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::Once { when } = &spec.config else {
            warn!(trigger_id = %spec.id, "once handler got wrong config");
            return;
        };
        self.alarms
            .set_once(&format!("{ONCE_PREFIX}{}", spec.id), *when);
        self.installed.lock().insert(spec.id);
    }

    fn uninstall(&self, id: Uuid) {
        if self.installed.lock().remove(&id) {
            self.alarms.clear(&format!("{ONCE_PREFIX}{id}"));
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().iter().copied().collect()
    }
}

// =============================================================================
// cron
// =============================================================================

const CRON_PREFIX: &str = "cron:";

pub struct CronTriggerHandler {
    installed: Mutex<HashMap<Uuid, CronSchedule>>,
    alarms: Arc<dyn AlarmHost>,
    router: Arc<FireRouter>,
}

impl CronTriggerHandler {
    pub fn new(alarms: Arc<dyn AlarmHost>, router: Arc<FireRouter>) -> Arc<Self> {
        let handler = Arc::new(Self {
            installed: Mutex::new(HashMap::new()),
            alarms: Arc::clone(&alarms),
            router,
        });

        let weak = Arc::downgrade(&handler);
        alarms.subscribe(Arc::new(move |name| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            let Some(trigger_id) = alarm_trigger_id(CRON_PREFIX, name) else {
                return;
            };
            let next = handler
                .installed
                .lock()
                .get(&trigger_id)
                .map(|schedule| schedule.next_fire_after(Utc::now()));
            if let Some(next) = next {
                handler
                    .alarms
                    .set_once(&format!("{CRON_PREFIX}{trigger_id}"), next);
                handler.router.fire_detached(trigger_id, FireSource::default());
            }
        }));
        handler
    }
}

impl TriggerHandler for CronTriggerHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Cron
    }

    fn install(&self, spec: &TriggerSpec) {
        let TriggerConfig::Cron { schedule } = &spec.config else {
            warn!(trigger_id = %spec.id, "cron handler got wrong config");
            return;
        };
        let next = schedule.next_fire_after(Utc::now());
        self.alarms.set_once(&format!("{CRON_PREFIX}{}", spec.id), next);
        self.installed.lock().insert(spec.id, schedule.clone());
    }

    fn uninstall(&self, id: Uuid) {
        if self.installed.lock().remove(&id).is_some() {
            self.alarms.clear(&format!("{CRON_PREFIX}{id}"));
        }
    }

    fn installed_ids(&self) -> Vec<Uuid> {
        self.installed.lock().keys().copied().collect()
    }
}
