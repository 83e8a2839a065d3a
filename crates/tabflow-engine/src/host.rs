//! Host capability ports
//!
//! The engine never talks to a browser directly. Everything it needs from
//! the host runtime — tabs, tools, navigation events, alarms, menus, DOM
//! observers, command bindings, process keepalive — comes in through the
//! traits here. Production hosts adapt their runtime; tests plug in fakes.
//! [`HostCapabilities::noop`] wires inert defaults for every port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use tabflow_core::{DomObserveOptions, RunError};

/// Prevents the host runtime from suspending the process
pub trait Keepalive: Send + Sync {
    fn engage(&self);
    fn disengage(&self);
}

/// Ref-counted wrapper so nested holds collapse into one engage/disengage
pub struct KeepaliveController {
    inner: Arc<dyn Keepalive>,
    holds: AtomicUsize,
}

impl KeepaliveController {
    pub fn new(inner: Arc<dyn Keepalive>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            holds: AtomicUsize::new(0),
        })
    }

    /// Acquire a hold; the underlying keepalive engages on 0 -> 1
    pub fn acquire(self: &Arc<Self>) -> KeepaliveGuard {
        if self.holds.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.engage();
        }
        KeepaliveGuard {
            controller: Arc::clone(self),
        }
    }

    pub fn active_holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.holds.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.disengage();
        }
    }
}

/// Releases its hold on drop
pub struct KeepaliveGuard {
    controller: Arc<KeepaliveController>,
}

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        self.controller.release();
    }
}

/// Tab-level operations the runner needs
#[async_trait]
pub trait TabHost: Send + Sync {
    /// URL currently loaded in the tab (or the active tab when None)
    async fn current_url(&self, tab_id: Option<i64>) -> Result<Option<Url>, RunError>;

    /// Ask the page for a variable value; best-effort
    async fn prompt_variable(
        &self,
        tab_id: Option<i64>,
        name: &str,
    ) -> Result<Option<serde_json::Value>, RunError>;

    async fn wait_for_network_idle(&self, tab_id: Option<i64>) -> Result<(), RunError>;

    async fn wait_for_stable_dom(&self, tab_id: Option<i64>) -> Result<(), RunError>;

    /// Capture a screenshot of the tab; None when the host cannot
    async fn capture_screenshot(
        &self,
        tab_id: Option<i64>,
    ) -> Result<Option<serde_json::Value>, RunError>;
}

/// Browser tool invocation: a name and a JSON arg bag in, a structured
/// result or a coded error out
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn invoke(
        &self,
        tab_id: Option<i64>,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, RunError>;
}

/// Optional network capture for run observability
#[async_trait]
pub trait NetworkCapture: Send + Sync {
    async fn start(&self, run_id: uuid::Uuid, tab_id: Option<i64>);
    async fn stop(&self, run_id: uuid::Uuid);
}

/// A completed navigation reported by the host
#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub tab_id: i64,
    pub url: String,
    pub main_frame: bool,
}

pub type NavigationListener = Arc<dyn Fn(&NavigationEvent) + Send + Sync>;

/// Completed-navigation notifications
pub trait NavigationHost: Send + Sync {
    fn subscribe(&self, listener: NavigationListener);
}

pub type AlarmListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Named alarms, recurring or one-shot; fires report the alarm name
pub trait AlarmHost: Send + Sync {
    fn set_recurring(&self, name: &str, period: Duration);
    fn set_once(&self, name: &str, at: DateTime<Utc>);
    fn clear(&self, name: &str);
    fn subscribe(&self, listener: AlarmListener);
}

/// A context-menu click reported by the host
#[derive(Debug, Clone)]
pub struct MenuClick {
    pub item_id: String,
    pub tab_id: Option<i64>,
    pub page_url: Option<String>,
}

pub type MenuClickListener = Arc<dyn Fn(&MenuClick) + Send + Sync>;

/// Context-menu registry
pub trait MenuHost: Send + Sync {
    fn create_item(&self, id: &str, title: &str);
    fn remove_item(&self, id: &str);
    fn subscribe(&self, listener: MenuClickListener);
}

/// A DOM selector match reported by an injected observer
#[derive(Debug, Clone)]
pub struct DomMatch {
    pub observer_id: String,
    pub tab_id: Option<i64>,
    pub page_url: Option<String>,
}

pub type DomMatchListener = Arc<dyn Fn(&DomMatch) + Send + Sync>;

/// DOM observer injection
pub trait DomObserverHost: Send + Sync {
    fn observe(&self, id: &str, selector: &str, options: &DomObserveOptions);
    fn unobserve(&self, id: &str);
    fn subscribe(&self, listener: DomMatchListener);
}

/// A global command dispatch reported by the host
#[derive(Debug, Clone)]
pub struct CommandDispatch {
    pub command: String,
    pub tab_id: Option<i64>,
    pub page_url: Option<String>,
}

pub type CommandListener = Arc<dyn Fn(&CommandDispatch) + Send + Sync>;

/// Global command registry
pub trait CommandHost: Send + Sync {
    fn register(&self, command: &str);
    fn unregister(&self, command: &str);
    fn subscribe(&self, listener: CommandListener);
}

/// Every port in one bundle
pub struct HostCapabilities {
    pub keepalive: Arc<dyn Keepalive>,
    pub tabs: Arc<dyn TabHost>,
    pub tools: Arc<dyn ToolHost>,
    pub network: Arc<dyn NetworkCapture>,
    pub navigation: Arc<dyn NavigationHost>,
    pub alarms: Arc<dyn AlarmHost>,
    pub menus: Arc<dyn MenuHost>,
    pub dom: Arc<dyn DomObserverHost>,
    pub commands: Arc<dyn CommandHost>,
}

impl HostCapabilities {
    /// Inert defaults for every port
    pub fn noop() -> Arc<Self> {
        let noop = Arc::new(NoopHost);
        Arc::new(Self {
            keepalive: noop.clone(),
            tabs: noop.clone(),
            tools: noop.clone(),
            network: noop.clone(),
            navigation: noop.clone(),
            alarms: noop.clone(),
            menus: noop.clone(),
            dom: noop.clone(),
            commands: noop,
        })
    }
}

/// Implements every port as a no-op
pub struct NoopHost;

impl Keepalive for NoopHost {
    fn engage(&self) {}
    fn disengage(&self) {}
}

#[async_trait]
impl TabHost for NoopHost {
    async fn current_url(&self, _tab_id: Option<i64>) -> Result<Option<Url>, RunError> {
        Ok(None)
    }

    async fn prompt_variable(
        &self,
        _tab_id: Option<i64>,
        name: &str,
    ) -> Result<Option<serde_json::Value>, RunError> {
        debug!(name, "no tab host; variable prompt skipped");
        Ok(None)
    }

    async fn wait_for_network_idle(&self, _tab_id: Option<i64>) -> Result<(), RunError> {
        Ok(())
    }

    async fn wait_for_stable_dom(&self, _tab_id: Option<i64>) -> Result<(), RunError> {
        Ok(())
    }

    async fn capture_screenshot(
        &self,
        _tab_id: Option<i64>,
    ) -> Result<Option<serde_json::Value>, RunError> {
        Ok(None)
    }
}

#[async_trait]
impl ToolHost for NoopHost {
    async fn invoke(
        &self,
        _tab_id: Option<i64>,
        tool: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value, RunError> {
        Err(RunError::new(
            tabflow_core::ErrorCode::ToolError,
            format!("no tool host available for tool: {tool}"),
        ))
    }
}

#[async_trait]
impl NetworkCapture for NoopHost {
    async fn start(&self, _run_id: uuid::Uuid, _tab_id: Option<i64>) {}
    async fn stop(&self, _run_id: uuid::Uuid) {}
}

impl NavigationHost for NoopHost {
    fn subscribe(&self, _listener: NavigationListener) {}
}

impl AlarmHost for NoopHost {
    fn set_recurring(&self, _name: &str, _period: Duration) {}
    fn set_once(&self, _name: &str, _at: DateTime<Utc>) {}
    fn clear(&self, _name: &str) {}
    fn subscribe(&self, _listener: AlarmListener) {}
}

impl MenuHost for NoopHost {
    fn create_item(&self, _id: &str, _title: &str) {}
    fn remove_item(&self, _id: &str) {}
    fn subscribe(&self, _listener: MenuClickListener) {}
}

impl DomObserverHost for NoopHost {
    fn observe(&self, _id: &str, _selector: &str, _options: &DomObserveOptions) {}
    fn unobserve(&self, _id: &str) {}
    fn subscribe(&self, _listener: DomMatchListener) {}
}

impl CommandHost for NoopHost {
    fn register(&self, _command: &str) {}
    fn unregister(&self, _command: &str) {}
    fn subscribe(&self, _listener: CommandListener) {}
}
