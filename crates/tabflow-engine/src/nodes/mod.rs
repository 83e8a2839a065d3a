//! Builtin node kinds
//!
//! The engine ships `log`, `delay` and `tool`. Browser tools themselves
//! stay host-side; the `tool` kind only routes a named invocation through
//! the [`crate::host::ToolHost`] port.

mod delay;
mod log;
mod tool;

pub use delay::DelayNode;
pub use log::LogNode;
pub use tool::ToolNode;

use std::sync::Arc;

use crate::registry::NodeRegistry;

/// A registry pre-populated with the builtin kinds
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(LogNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(ToolNode));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = builtin_registry();
        for kind in ["log", "delay", "tool"] {
            assert!(registry.contains(kind), "missing builtin kind: {kind}");
        }
    }
}
