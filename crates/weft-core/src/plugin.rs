//! The plug-in contract.
//!
//! Collaborator-supplied modules register an init function with the core
//! and hand back a [`Plugin`] object. The core activates plug-ins, tracks
//! the features they provide, and uses the feature set for dependency
//! resolution between plug-ins.

use std::sync::Arc;

use crate::core::Core;
use crate::error::Result;
use crate::json::Json;

/// A loaded plug-in.
///
/// # Object safety
///
/// This trait is object-safe: `Arc<dyn Plugin>` is the standard storage type.
pub trait Plugin: Send + Sync {
    /// The plug-in's unique name.
    fn name(&self) -> &str;

    /// The features this plug-in provides once activated. Other plug-ins
    /// name these in their requirements.
    fn provided_features(&self) -> Vec<String> {
        Vec::new()
    }

    /// Brings the plug-in into service. Called once, right after the init
    /// function returned the plug-in object.
    fn activate(&self, core: &Core) -> Result<()>;

    /// Takes the plug-in out of service. Called on unload.
    fn deactivate(&self, _core: &Core) {}
}

/// A module's entry point: `(core, args_json) -> plugin_object`.
pub type PluginInit =
    Arc<dyn Fn(&Core, Option<&Json>) -> Result<Arc<dyn Plugin>> + Send + Sync>;
