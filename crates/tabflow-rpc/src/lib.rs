//! # tabflow-rpc
//!
//! The engine's external surface: framed JSON request/response plus
//! streaming event pushes over an in-process port. Covers flow CRUD, run
//! listing and inspection, event paging, trigger management, queue
//! management, run control and the debug channel.

pub mod protocol;
pub mod server;
pub mod validate;

pub use protocol::{ClientFrame, ServerFrame};
pub use server::{RpcConnection, RpcServer};
pub use validate::{normalize_flow, normalize_trigger, FlowInput, TriggerInput};
