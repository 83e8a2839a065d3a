//! Node execution policies
//!
//! A [`Policy`] bundles the rules that govern one node execution: timeout,
//! retry, pre-execution waits, the on-error decision and artifact capture.
//! Policies merge hierarchically — plugin default, then flow default, then
//! the node override — with the node winning field-wise.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// What the timeout budget applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// Each attempt gets the full budget
    #[default]
    Attempt,

    /// The budget spans all attempts of the node
    Node,
}

/// Timeout for a node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    #[serde(default)]
    pub scope: TimeoutScope,
}

/// Backoff strategy between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Linear,
    Exp,
}

/// Jitter applied to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    #[default]
    None,
    /// Uniform random delay in `[0, computed]`
    Full,
}

/// Retry configuration
///
/// `count` is the number of retries, so a node makes at most `count + 1`
/// attempts. `retry_on` restricts retries to the listed error codes; when
/// absent, any retryable error qualifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub count: u32,

    #[serde(with = "duration_millis")]
    pub interval: Duration,

    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default, with = "option_duration_millis")]
    pub max_interval: Option<Duration>,

    #[serde(default)]
    pub jitter: Jitter,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<Vec<ErrorCode>>,
}

impl RetryPolicy {
    /// Fixed-interval retries
    pub fn fixed(count: u32, interval: Duration) -> Self {
        Self {
            count,
            interval,
            backoff: Backoff::None,
            max_interval: None,
            jitter: Jitter::None,
            retry_on: None,
        }
    }

    /// Delay before the given retry (1-based)
    ///
    /// base · {none: 1, linear: n, exp: 2^(n-1)}, capped at `max_interval`,
    /// with full jitter drawing uniformly from `[0, capped]`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let n = retry.max(1);
        let base = self.interval.as_secs_f64();
        let scaled = match self.backoff {
            Backoff::None => base,
            Backoff::Linear => base * n as f64,
            Backoff::Exp => base * 2f64.powi(n as i32 - 1),
        };
        let capped = match self.max_interval {
            Some(max) => scaled.min(max.as_secs_f64()),
            None => scaled,
        };
        let final_secs = match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                if capped > 0.0 {
                    rand::thread_rng().gen_range(0.0..=capped)
                } else {
                    0.0
                }
            }
        };
        Duration::from_secs_f64(final_secs)
    }

    /// Whether an error with this code is eligible for retry
    pub fn accepts(&self, code: ErrorCode) -> bool {
        match &self.retry_on {
            Some(codes) => codes.contains(&code),
            None => true,
        }
    }
}

/// Waits applied before a node executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WaitPolicy {
    #[serde(default, with = "option_duration_millis")]
    pub delay_before: Option<Duration>,

    #[serde(default)]
    pub wait_for_network_idle: bool,

    #[serde(default)]
    pub wait_for_stable_dom: bool,
}

/// Where to jump on a `goto` decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GotoTarget {
    EdgeLabel(String),
    Node(String),
}

/// What to do when a node fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Terminate the run with the error
    Stop,

    /// Follow the default edge as if the node succeeded
    Continue,

    /// Jump to an edge label or node
    Goto { target: GotoTarget },

    /// Retry, optionally overriding the effective retry policy
    Retry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<RetryPolicy>,
    },
}

/// Screenshot capture policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotPolicy {
    #[default]
    Off,
    OnFailure,
    EveryNode,
}

/// Artifact capture configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactPolicy {
    #[serde(default)]
    pub screenshot: ScreenshotPolicy,
}

/// A merged bundle of execution rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactPolicy>,
}

impl Policy {
    /// Merge `over` onto `self`, with `over`'s set fields winning
    pub fn overridden_by(&self, over: &Policy) -> Policy {
        Policy {
            timeout: over.timeout.or(self.timeout),
            retry: over.retry.clone().or_else(|| self.retry.clone()),
            wait: over.wait.clone().or_else(|| self.wait.clone()),
            on_error: over.on_error.clone().or_else(|| self.on_error.clone()),
            artifacts: over.artifacts.or(self.artifacts),
        }
    }

    /// Resolve the effective policy: plugin default ⊕ flow default ⊕ node
    pub fn effective(
        plugin_default: Option<&Policy>,
        flow_default: Option<&Policy>,
        node: Option<&Policy>,
    ) -> Policy {
        let mut merged = plugin_default.cloned().unwrap_or_default();
        if let Some(flow) = flow_default {
            merged = merged.overridden_by(flow);
        }
        if let Some(node) = node {
            merged = merged.overridden_by(node);
        }
        merged
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_node_wins_field_wise() {
        let plugin = Policy {
            timeout: Some(TimeoutPolicy {
                duration: Duration::from_secs(30),
                scope: TimeoutScope::Attempt,
            }),
            retry: Some(RetryPolicy::fixed(2, Duration::from_secs(1))),
            ..Default::default()
        };
        let flow = Policy {
            on_error: Some(OnErrorPolicy::Continue),
            ..Default::default()
        };
        let node = Policy {
            retry: Some(RetryPolicy::fixed(5, Duration::from_millis(100))),
            ..Default::default()
        };

        let effective = Policy::effective(Some(&plugin), Some(&flow), Some(&node));
        assert_eq!(effective.retry.unwrap().count, 5);
        assert_eq!(effective.timeout.unwrap().duration, Duration::from_secs(30));
        assert_eq!(effective.on_error, Some(OnErrorPolicy::Continue));
    }

    #[test]
    fn backoff_none_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(2));
    }

    #[test]
    fn backoff_linear_scales_with_retry_number() {
        let mut policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        policy.backoff = Backoff::Linear;
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(6));
    }

    #[test]
    fn backoff_exp_doubles() {
        let mut policy = RetryPolicy::fixed(4, Duration::from_secs(1));
        policy.backoff = Backoff::Exp;
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(4), Duration::from_secs(8));
    }

    #[test]
    fn max_interval_caps_delay() {
        let mut policy = RetryPolicy::fixed(10, Duration::from_secs(1));
        policy.backoff = Backoff::Exp;
        policy.max_interval = Some(Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn full_jitter_stays_within_bound() {
        let mut policy = RetryPolicy::fixed(3, Duration::from_secs(4));
        policy.jitter = Jitter::Full;
        for _ in 0..50 {
            assert!(policy.delay_for_retry(1) <= Duration::from_secs(4));
        }
    }

    #[test]
    fn retry_on_restricts_codes() {
        let mut policy = RetryPolicy::fixed(2, Duration::ZERO);
        policy.retry_on = Some(vec![ErrorCode::Timeout, ErrorCode::ToolError]);
        assert!(policy.accepts(ErrorCode::Timeout));
        assert!(!policy.accepts(ErrorCode::ScriptFailed));

        policy.retry_on = None;
        assert!(policy.accepts(ErrorCode::ScriptFailed));
    }

    #[test]
    fn policy_serialization_round_trips() {
        let policy = Policy {
            timeout: Some(TimeoutPolicy {
                duration: Duration::from_millis(2500),
                scope: TimeoutScope::Node,
            }),
            retry: Some(RetryPolicy::fixed(1, Duration::from_millis(10))),
            wait: Some(WaitPolicy {
                delay_before: Some(Duration::from_millis(50)),
                wait_for_network_idle: true,
                wait_for_stable_dom: false,
            }),
            on_error: Some(OnErrorPolicy::Goto {
                target: GotoTarget::EdgeLabel("on_error".to_string()),
            }),
            artifacts: Some(ArtifactPolicy {
                screenshot: ScreenshotPolicy::OnFailure,
            }),
        };

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
