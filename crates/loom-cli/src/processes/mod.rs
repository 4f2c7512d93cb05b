//! Processes shipped with the `loom` binary.

mod audit;

pub use audit::Audit;

use loom_core::app::ProcessRegistry;
use loom_core::app::process::RegistryError;

/// Every process this binary knows how to run.
pub fn registry() -> Result<ProcessRegistry, RegistryError> {
    let mut registry = ProcessRegistry::new();
    registry.register(Audit)?;
    Ok(registry)
}
