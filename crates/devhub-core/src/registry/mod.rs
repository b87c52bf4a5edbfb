//! Plugin-based factory registry
//!
//! The registry maps a descriptor's `path` to a factory object, so plugins
//! are chosen by name at runtime instead of being loaded from a module path.
//!
//! ## Registration
//!
//! Plugin crates expose a `register()` function:
//!
//! ```rust,ignore
//! // In devhub-mdns
//! pub fn register(registry: &PluginRegistry, dispatcher: ProxyDispatcher, ports: ServicePorts) {
//!     registry.register_plugin("mdns", Box::new(DiscoveryFactory::new(dispatcher, ports)));
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::PluginDescriptors;
use crate::error::{Error, Result};
use crate::traits::{Plugin, PluginContext, PluginFactory};

/// Registry of plugin factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct PluginRegistry {
    /// Registered factories in registration order
    factories: RwLock<Vec<(String, Arc<dyn PluginFactory>)>>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin factory
    ///
    /// # Parameters
    ///
    /// - `name`: Factory key matched against `PluginDescriptor::path`
    /// - `factory`: Factory object for creating plugin instances
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_plugin(&self, name: impl Into<String>, factory: Box<dyn PluginFactory>) {
        let name = name.into();
        let factory: Arc<dyn PluginFactory> = Arc::from(factory);
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        match factories.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                tracing::warn!("Replacing plugin factory '{}'", name);
                *existing = factory;
            }
            None => factories.push((name, factory)),
        }
    }

    /// Create a plugin from the factory registered under `path`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn Plugin>)`: Created plugin instance
    /// - `Err(Error::UnknownPlugin)`: No factory registered under `path`
    /// - `Err(Error)`: The factory failed
    pub fn create_plugin(&self, path: &str, ctx: PluginContext) -> Result<Box<dyn Plugin>> {
        let factory = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories
                .iter()
                .find(|(n, _)| n == path)
                .map(|(_, f)| f.clone())
                .ok_or_else(|| Error::unknown_plugin(path))?
        };

        factory.create(ctx)
    }

    /// Default descriptor set built from every registered factory
    pub fn default_descriptors(&self) -> PluginDescriptors {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut descriptors = PluginDescriptors::new();
        for (name, factory) in factories.iter() {
            descriptors.insert(name.clone(), factory.default_descriptor());
        }
        descriptors
    }

    /// List all registered plugin names
    pub fn list_plugins(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Check if a plugin name is registered
    pub fn has_plugin(&self, name: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.iter().any(|(n, _)| n == name)
    }
}
