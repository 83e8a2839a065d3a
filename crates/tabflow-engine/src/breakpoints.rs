//! Breakpoint registry
//!
//! Small per-run component owning the breakpoint set and the step-mode
//! bit. The debug controller is stateless about step mode and always
//! reads it from here; the runner consults it before executing a node.

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

/// Breakpoint state for one run
#[derive(Debug, Clone, Default)]
pub struct BreakpointState {
    pub breakpoints: HashSet<String>,
    pub step_armed: bool,
}

/// Why the runner should pause before a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakHit {
    Breakpoint,
    Step,
}

/// Breakpoints and step mode, keyed by run id
#[derive(Default)]
pub struct BreakpointRegistry {
    states: DashMap<Uuid, BreakpointState>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, run_id: Uuid) -> BreakpointState {
        self.states.get(&run_id).map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set_breakpoints(&self, run_id: Uuid, node_ids: impl IntoIterator<Item = String>) {
        let mut entry = self.states.entry(run_id).or_default();
        entry.breakpoints = node_ids.into_iter().collect();
    }

    pub fn add_breakpoint(&self, run_id: Uuid, node_id: String) {
        self.states.entry(run_id).or_default().breakpoints.insert(node_id);
    }

    pub fn remove_breakpoint(&self, run_id: Uuid, node_id: &str) {
        if let Some(mut entry) = self.states.get_mut(&run_id) {
            entry.breakpoints.remove(node_id);
        }
    }

    /// Arm one "pause at the next node"
    pub fn arm_step(&self, run_id: Uuid) {
        self.states.entry(run_id).or_default().step_armed = true;
    }

    pub fn disarm_step(&self, run_id: Uuid) {
        if let Some(mut entry) = self.states.get_mut(&run_id) {
            entry.step_armed = false;
        }
    }

    /// Check whether the runner should pause at `node_id`.
    ///
    /// Step mode disarms itself on the first hit so a single step-over
    /// cannot pause the run twice. Breakpoints win when both apply.
    pub fn check(&self, run_id: Uuid, node_id: &str) -> Option<BreakHit> {
        let mut entry = self.states.get_mut(&run_id)?;
        let stepped = entry.step_armed;
        if stepped {
            entry.step_armed = false;
        }
        if entry.breakpoints.contains(node_id) {
            Some(BreakHit::Breakpoint)
        } else if stepped {
            Some(BreakHit::Step)
        } else {
            None
        }
    }

    /// Drop all state for a finished run
    pub fn clear(&self, run_id: Uuid) {
        self.states.remove(&run_id);
    }
}
