//! Pause gate
//!
//! A single-slot wait primitive for one run. Pause parks the runner at its
//! next checkpoint; resume or cancel releases it. Only the runner ever
//! awaits the gate, so there is no waiter accumulation to manage.

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct GateState {
    paused: bool,
    canceled: bool,
    cancel_reason: Option<String>,
}

/// Pause/cancel coordination between a runner and its controllers
#[derive(Default)]
pub struct PauseGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause; ignored once canceled
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if !state.canceled {
            state.paused = true;
        }
    }

    /// Release a paused runner
    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Cancel the run; releases any pause wait permanently. Idempotent —
    /// the first reason wins.
    pub fn cancel(&self, reason: Option<String>) {
        let mut state = self.state.lock();
        if !state.canceled {
            state.canceled = true;
            state.cancel_reason = reason;
        }
        state.paused = false;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.state.lock().cancel_reason.clone()
    }

    /// Park until resumed or canceled; returns immediately when not paused
    pub async fn wait_while_paused(&self) {
        loop {
            // Register interest before checking state so a racing
            // resume/cancel cannot be missed.
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if state.canceled || !state.paused {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_not_paused() {
        let gate = PauseGate::new();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_while_paused())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn resume_releases_waiter() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.resume();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("resume should release")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_waiter_and_sticks() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.cancel(Some("user".to_string()));
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("cancel should release")
            .unwrap();

        assert!(gate.is_canceled());
        assert_eq!(gate.cancel_reason().as_deref(), Some("user"));

        // Later pause requests are ignored and the first reason wins
        gate.pause();
        assert!(!gate.is_paused());
        gate.cancel(Some("other".to_string()));
        assert_eq!(gate.cancel_reason().as_deref(), Some("user"));
    }
}
