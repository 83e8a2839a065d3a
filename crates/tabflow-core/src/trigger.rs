//! Trigger specifications
//!
//! A trigger spec binds an external signal to a flow. The kind-specific
//! configuration is a tagged enum so a spec can never carry fields for the
//! wrong kind. Handlers install and uninstall specs; the trigger manager
//! reconciles the persisted set against what is installed.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::UrlRule;
use crate::JsonMap;

/// Registered trigger kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Url,
    Cron,
    Interval,
    Once,
    Command,
    ContextMenu,
    Dom,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Url => "url",
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Once => "once",
            Self::Command => "command",
            Self::ContextMenu => "context_menu",
            Self::Dom => "dom",
        };
        write!(f, "{s}")
    }
}

/// Hour/day-of-week schedule
///
/// Fires at the top of `hour` (UTC) on the listed weekdays; an empty
/// weekday list means every day. Finer granularity is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// Hour of day, 0-23
    pub hour: u32,

    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl CronSchedule {
    /// The first fire time strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hour = self.hour.min(23);
        for offset in 0..=7 {
            let day = now.date_naive() + Duration::days(offset);
            let candidate = Utc
                .with_ymd_and_hms(day.year(), day.month(), day.day(), hour, 0, 0)
                .single()
                .unwrap_or(now);
            if candidate <= now {
                continue;
            }
            if self.days.is_empty() || self.days.contains(&day.weekday()) {
                return candidate;
            }
        }
        // Unreachable for a valid schedule: within 8 days some weekday matches
        now + Duration::days(7)
    }
}

/// Options for DOM observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DomObserveOptions {
    /// Fire once per page load instead of on every mutation match
    #[serde(default)]
    pub once_per_page: bool,

    /// Observe subtree mutations under the matched element
    #[serde(default)]
    pub subtree: bool,
}

/// Kind-specific trigger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    Manual,

    Url { rules: Vec<UrlRule> },

    Cron { schedule: CronSchedule },

    Interval { period_minutes: u32 },

    Once { when: DateTime<Utc> },

    Command { command: String },

    ContextMenu { title: String },

    Dom {
        selector: String,
        #[serde(default)]
        options: DomObserveOptions,
    },
}

impl TriggerConfig {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Manual => TriggerKind::Manual,
            Self::Url { .. } => TriggerKind::Url,
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Interval { .. } => TriggerKind::Interval,
            Self::Once { .. } => TriggerKind::Once,
            Self::Command { .. } => TriggerKind::Command,
            Self::ContextMenu { .. } => TriggerKind::ContextMenu,
            Self::Dom { .. } => TriggerKind::Dom,
        }
    }
}

/// A persisted trigger binding a signal to a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub id: Uuid,
    pub flow_id: Uuid,

    #[serde(default)]
    pub name: String,

    pub enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Args forwarded into the runs this trigger enqueues
    #[serde(default)]
    pub args: JsonMap,

    pub config: TriggerConfig,
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        self.config.kind()
    }
}

/// A process-wide named value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentVar {
    pub name: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    #[test]
    fn config_kind_matches_variant() {
        let config = TriggerConfig::Url {
            rules: vec![UrlRule::Domain("example.com".to_string())],
        };
        assert_eq!(config.kind(), TriggerKind::Url);
        assert_eq!(TriggerConfig::Manual.kind(), TriggerKind::Manual);
    }

    #[test]
    fn spec_serialization_round_trips() {
        let spec = TriggerSpec {
            id: Uuid::now_v7(),
            flow_id: Uuid::now_v7(),
            name: "nightly".to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            args: JsonMap::new(),
            config: TriggerConfig::Cron {
                schedule: CronSchedule {
                    hour: 3,
                    days: vec![Weekday::Mon, Weekday::Fri],
                },
            },
        };

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"kind\":\"cron\""));
        let parsed: TriggerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, parsed);
    }

    #[test]
    fn cron_next_fire_is_strictly_future() {
        let schedule = CronSchedule { hour: 6, days: vec![] };
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap();
        let next = schedule.next_fire_after(now);
        assert!(next > now);
        assert_eq!(next.hour(), 6);
        assert_eq!(next.date_naive(), now.date_naive() + Duration::days(1));
    }

    #[test]
    fn cron_respects_weekdays() {
        // 2025-03-10 is a Monday
        let schedule = CronSchedule {
            hour: 12,
            days: vec![Weekday::Wed],
        };
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let next = schedule.next_fire_after(now);
        assert_eq!(next.weekday(), Weekday::Wed);
        assert_eq!(next.hour(), 12);
    }

    #[test]
    fn cron_same_day_when_hour_not_passed() {
        let schedule = CronSchedule { hour: 18, days: vec![] };
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();
        let next = schedule.next_fire_after(now);
        assert_eq!(next.date_naive(), now.date_naive());
        assert_eq!(next.hour(), 18);
    }

    #[test]
    fn dom_config_defaults() {
        let config: TriggerConfig = serde_json::from_value(json!({
            "kind": "dom",
            "selector": "#checkout",
        }))
        .unwrap();
        match config {
            TriggerConfig::Dom { selector, options } => {
                assert_eq!(selector, "#checkout");
                assert!(!options.once_per_page);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
