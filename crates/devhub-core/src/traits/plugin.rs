// # Plugin Trait
//
// Defines the lifecycle contract every feature module honours.
//
// ## Lifecycle
//
// ```text
// create(ctx) ──► load() ──► ... ──► unload()
//   Unloaded        Loaded              Unloaded
// ```
//
// - `create`: receives the shared router, the plugin's options and a
//   `ConfigEvents` sender. Must not assume exclusive use of the router.
// - `load`: registers routes and starts periodic work. Calling it twice is a
//   lifecycle error.
// - `unload`: cancels timers, removes listeners and routes. Effective on
//   return: nothing the plugin started may fire afterwards. Calling it on an
//   unloaded plugin is a no-op.
//
// ## Config changes
//
// A plugin whose option changes at runtime calls
// `ConfigEvents::config_updated(key, value)`. The loader receives a
// `ConfigUpdate` and owns the only write path to the config file.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{PluginDescriptor, PluginOptions};
use crate::error::Result;
use crate::router::SharedRouter;

/// A configuration change reported by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdate {
    /// Plugin that owns the option
    pub plugin: String,
    /// Option key
    pub key: String,
    /// New value
    pub value: Value,
}

/// Sender half of a plugin's config-change channel
#[derive(Debug, Clone)]
pub struct ConfigEvents {
    plugin: String,
    tx: mpsc::UnboundedSender<ConfigUpdate>,
}

impl ConfigEvents {
    /// Create a sender bound to `plugin`
    pub fn new(plugin: impl Into<String>, tx: mpsc::UnboundedSender<ConfigUpdate>) -> Self {
        Self {
            plugin: plugin.into(),
            tx,
        }
    }

    /// Create a sender together with its receiver
    ///
    /// Useful when a plugin is constructed outside of a `PluginLoader`.
    pub fn channel(plugin: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ConfigUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(plugin, tx), rx)
    }

    /// Plugin this sender reports for
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Report that option `key` now holds `value`
    ///
    /// Returns `false` if nobody is listening any more.
    pub fn config_updated(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let update = ConfigUpdate {
            plugin: self.plugin.clone(),
            key: key.into(),
            value: value.into(),
        };
        if self.tx.send(update).is_err() {
            tracing::debug!(plugin = %self.plugin, "Config update dropped, loader gone");
            return false;
        }
        true
    }
}

/// Everything a plugin receives at construction
#[derive(Clone)]
pub struct PluginContext {
    /// Plugin name (descriptor key)
    pub name: String,
    /// Route table shared with every other plugin
    pub router: SharedRouter,
    /// Options from the plugin's descriptor
    pub config: PluginOptions,
    /// Channel for reporting option changes
    pub events: ConfigEvents,
}

impl PluginContext {
    /// Build a context outside of a loader, returning the config-change receiver
    pub fn standalone(
        name: impl Into<String>,
        router: SharedRouter,
        config: PluginOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ConfigUpdate>) {
        let name = name.into();
        let (events, rx) = ConfigEvents::channel(name.clone());
        (
            Self {
                name,
                router,
                config,
                events,
            },
            rx,
        )
    }
}

/// Trait for feature plugins
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &str;

    /// Register routes and start periodic work
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Plugin is live
    /// - `Err(Error::Lifecycle)`: Plugin was already loaded
    /// - `Err(Error)`: Any other startup failure
    async fn load(&mut self) -> Result<()>;

    /// Stop everything the plugin started
    ///
    /// Must be effective on return and safe to call more than once.
    fn unload(&mut self);

    /// Whether the plugin is currently loaded
    fn is_loaded(&self) -> bool;
}

/// Helper trait for constructing plugins from a descriptor
pub trait PluginFactory: Send + Sync {
    /// Create a plugin instance
    ///
    /// # Parameters
    ///
    /// - `ctx`: Shared router, options and config-change sender
    fn create(&self, ctx: PluginContext) -> Result<Box<dyn Plugin>>;

    /// Descriptor written to a fresh config file for this plugin
    fn default_descriptor(&self) -> PluginDescriptor;
}
