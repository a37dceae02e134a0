//! The core aggregation object.
//!
//! A [`Core`] owns the configuration store and the event dispatcher, and
//! manages the plug-in registry: module init functions register by name,
//! loading invokes them and activates the resulting plug-in, and the
//! features that activated plug-ins provide drive dependency resolution
//! between plug-ins.
//!
//! # Connections
//!
//! - Hooks reach the [`Conf`](crate::conf::Conf) to make decisions and
//!   push follow-up events through the
//!   [`EventDispatcher`](crate::dispatcher::EventDispatcher).
//! - Plug-ins implement [`Plugin`](crate::plugin::Plugin).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::conf::Conf;
use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::json::Json;
use crate::plugin::{Plugin, PluginInit};

struct CoreInner {
    conf: Conf,
    dispatcher: EventDispatcher,
    modules: Mutex<HashMap<String, PluginInit>>,
    plugins: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    features: Mutex<Vec<String>>,
}

/// The central object tying configuration, dispatching, and plug-ins
/// together. Clones share the same core.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

impl Core {
    /// Creates a core around an already-loaded configuration.
    pub fn new(conf: Conf) -> Core {
        Core {
            inner: Arc::new(CoreInner {
                conf,
                dispatcher: EventDispatcher::new(),
                modules: Mutex::new(HashMap::new()),
                plugins: Mutex::new(HashMap::new()),
                features: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn conf(&self) -> &Conf {
        &self.inner.conf
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    // -- Module registry --

    /// Registers a module init function under `name`.
    pub fn register_module(
        &self,
        name: &str,
        init: impl Fn(&Core, Option<&Json>) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    ) -> Result<()> {
        let mut modules = self.inner.modules.lock().unwrap();
        if modules.contains_key(name) {
            return Err(Error::invalid_argument(format!(
                "module '{name}' is already registered"
            )));
        }
        modules.insert(name.to_string(), Arc::new(init));
        Ok(())
    }

    /// Loads a module: invokes its init function, activates the returned
    /// plug-in, and records its provided features.
    pub fn load_module(&self, name: &str, args: Option<&Json>) -> Result<Arc<dyn Plugin>> {
        let init = self
            .inner
            .modules
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no module named '{name}'")))?;

        if self.inner.plugins.lock().unwrap().contains_key(name) {
            return Err(Error::invalid_argument(format!("module '{name}' is already loaded")));
        }

        let plugin = init.as_ref()(self, args)?;
        plugin.activate(self)?;

        let features = plugin.provided_features();
        self.inner.plugins.lock().unwrap().insert(name.to_string(), plugin.clone());
        self.inner.features.lock().unwrap().extend(features);
        log::debug!(target: "weft-core", "loaded module {name}");
        Ok(plugin)
    }

    /// Unloads a module, deactivating its plug-in and retiring its
    /// features.
    pub fn unload_module(&self, name: &str) -> Result<()> {
        let plugin = self
            .inner
            .plugins
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("module '{name}' is not loaded")))?;

        plugin.deactivate(self);
        let retired = plugin.provided_features();
        self.inner.features.lock().unwrap().retain(|f| !retired.contains(f));
        log::debug!(target: "weft-core", "unloaded module {name}");
        Ok(())
    }

    /// The plug-in loaded under `name`, if any.
    pub fn find_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.inner.plugins.lock().unwrap().get(name).cloned()
    }

    // -- Feature tracking --

    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.inner.features.lock().unwrap().iter().any(|f| f == feature)
    }

    /// Checks that every named feature is provided by some loaded
    /// plug-in. Used by plug-ins to resolve their dependencies at
    /// activation time.
    pub fn ensure_features(&self, features: &[&str]) -> Result<()> {
        let enabled = self.inner.features.lock().unwrap();
        for feature in features {
            if !enabled.iter().any(|f| f == feature) {
                return Err(Error::not_found(format!("required feature '{feature}' is missing")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
