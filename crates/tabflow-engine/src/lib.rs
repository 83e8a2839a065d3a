//! # tabflow-engine
//!
//! The execution engine: turns a stored workflow graph plus a trigger
//! into a durable, resumable, debuggable run.
//!
//! ## Architecture
//!
//! ```text
//! trigger / RPC ──▶ EnqueueService ──▶ queue (run.queued)
//!                                        │
//!                                        ▼  claim under lease
//!                                   Scheduler ──▶ Runner (per run)
//!                                        │            │ events
//!                                        ▼            ▼
//!                                    storage ◀── EventBus ──▶ subscribers
//! ```
//!
//! Runners execute in parallel, one logical task per claimed run; within
//! a run, all storage writes are serialized through that run's write
//! queue. Crash recovery reclaims leases left by previous owners before
//! the scheduler starts.

pub mod breakpoints;
pub mod bus;
pub mod control;
pub mod debug;
pub mod engine;
pub mod enqueue;
pub mod host;
pub mod nodes;
pub mod pause;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod triggers;
pub mod write_queue;

pub use breakpoints::{BreakHit, BreakpointRegistry, BreakpointState};
pub use bus::{channel_subscriber, EventBus, EventListener, SubscriptionId};
pub use control::{RunControl, RunHandle};
pub use debug::{DebugCommand, DebugController, DebuggerState};
pub use engine::{Engine, EngineConfig};
pub use enqueue::{EnqueueReceipt, EnqueueRequest, EnqueueService};
pub use host::{HostCapabilities, Keepalive, KeepaliveController, NoopHost};
pub use nodes::builtin_registry;
pub use pause::PauseGate;
pub use recovery::{recover, RecoveryReport};
pub use registry::{
    parse_config, NodeContext, NodeExecutor, NodeLog, NodeNext, NodeRegistry, NodeResult,
    NodeSuccess, PersistentVars,
};
pub use runner::{Runner, RunnerEnv, MAX_STEPS_PER_RUN};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use triggers::{FireRouter, FireSource, TriggerHandler, TriggerManager};
pub use write_queue::WriteQueue;
