//! # tabflow-storage
//!
//! Durable object stores for the tabflow engine: flows, runs, the
//! append-only event log, the leased run queue, persistent variables and
//! trigger specs.
//!
//! The contract lives in the [`store`] traits; [`MemoryStorage`] is the
//! reference transactional backend. Every store method is atomic — it
//! commits all of its writes or none — which is the engine's integrity
//! boundary: a failed operation surfaces as an error and never leaves a
//! run in an inconsistent status.

pub mod error;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStorage;
pub use store::{
    EventStore, FlowStore, QueueStore, RecoveredLease, RunFilter, RunStore, Storage,
    TriggerStore, VarStore,
};
