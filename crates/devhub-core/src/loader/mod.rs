//! Plugin loader
//!
//! The PluginLoader is responsible for:
//! - Reading plugin descriptors through a [`ConfigStore`]
//! - Instantiating every enabled plugin against the shared router
//! - Tracking loaded plugins and unloading them
//! - Persisting config changes reported by plugins
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   descriptors   ┌──────────────┐   create(ctx)   ┌────────────────┐
//! │ ConfigStore │ ──────────────► │ PluginLoader │ ──────────────► │ PluginRegistry │
//! └─────────────┘                 └──────────────┘                 └────────────────┘
//!        ▲                                ▲
//!        │ save(full map)                 │ ConfigUpdate (mpsc)
//!        │                                │
//! ┌──────────────┐                 ┌──────────────┐
//! │ persist task │ ◄────────────── │   plugins    │
//! └──────────────┘                 └──────────────┘
//! ```
//!
//! ## State Machine
//!
//! Per descriptor: `Unloaded → (enabled) → Loaded → Unloaded`. Disabled
//! descriptors are skipped without a log line and never reach `Loaded`.
//!
//! ## Persistence
//!
//! A single task owns the write path. Every accepted [`ConfigUpdate`] updates
//! the in-memory descriptor and saves the whole map, so the file always holds
//! the full current state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigOption, OptionType, PluginDescriptor, PluginDescriptors};
use crate::error::{Error, Result};
use crate::registry::PluginRegistry;
use crate::router::SharedRouter;
use crate::traits::{ConfigEvents, ConfigStore, ConfigUpdate, Plugin, PluginContext};

/// Capacity of the loader event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown` waits for pending config writes
const PERSIST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Events emitted by the PluginLoader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// Plugin created and loaded
    PluginLoaded { name: String },

    /// Plugin could not be created or loaded
    PluginFailed { name: String, error: String },

    /// Plugin unloaded
    PluginUnloaded { name: String },

    /// Config update written to the store
    ConfigPersisted { plugin: String, key: String },

    /// Config update rejected or the write failed
    ConfigPersistFailed {
        plugin: String,
        key: String,
        error: String,
    },
}

/// A live plugin and the name it was loaded under
struct LoadedPlugin {
    name: String,
    plugin: Box<dyn Plugin>,
}

/// Plugin loader
///
/// ## Lifecycle
///
/// 1. Open with [`PluginLoader::open()`]
/// 2. Load with [`PluginLoader::load_plugins()`]
/// 3. Stop with [`PluginLoader::shutdown()`] (or drop, which unloads without draining)
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    router: SharedRouter,
    descriptors: Arc<Mutex<PluginDescriptors>>,
    plugins: Vec<LoadedPlugin>,
    updates_tx: Option<mpsc::UnboundedSender<ConfigUpdate>>,
    persist_task: Option<JoinHandle<()>>,
    event_tx: mpsc::Sender<LoaderEvent>,
}

impl PluginLoader {
    /// Open a loader over `store`
    ///
    /// Loads the descriptor set and starts the persistence task. Must be
    /// called inside a tokio runtime.
    ///
    /// # Returns
    ///
    /// A tuple of (loader, event_receiver) where event_receiver yields loader events
    pub async fn open(
        registry: Arc<PluginRegistry>,
        store: Arc<dyn ConfigStore>,
        router: SharedRouter,
    ) -> Result<(Self, mpsc::Receiver<LoaderEvent>)> {
        let descriptors = store.load().await?;
        info!("Plugin configuration loaded: {} descriptor(s)", descriptors.len());

        let descriptors = Arc::new(Mutex::new(descriptors));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let persist_task = tokio::spawn(persist_updates(
            updates_rx,
            descriptors.clone(),
            store,
            event_tx.clone(),
        ));

        let loader = Self {
            registry,
            router,
            descriptors,
            plugins: Vec::new(),
            updates_tx: Some(updates_tx),
            persist_task: Some(persist_task),
            event_tx,
        };

        Ok((loader, event_rx))
    }

    /// Load every enabled plugin, in descriptor order
    ///
    /// Failures are logged and reported per plugin; they never stop the
    /// remaining plugins from loading.
    ///
    /// # Returns
    ///
    /// Number of plugins loaded by this call
    pub async fn load_plugins(&mut self) -> usize {
        let descriptors = self.descriptors.lock().await.clone();

        let mut loaded = 0;
        for (name, descriptor) in descriptors.iter() {
            if !descriptor.enabled {
                continue;
            }
            if self.load_plugin(name, descriptor).await.is_ok() {
                loaded += 1;
            }
        }

        info!("{} plugin(s) loaded", loaded);
        loaded
    }

    /// Create and load a single plugin
    ///
    /// The descriptor is added to the managed set if it is not there yet, so
    /// config updates from the plugin can be persisted.
    pub async fn load_plugin(&mut self, name: &str, descriptor: &PluginDescriptor) -> Result<()> {
        if self.is_loaded(name) {
            return Err(Error::lifecycle(format!("Plugin '{}' is already loaded", name)));
        }

        let Some(updates_tx) = self.updates_tx.clone() else {
            return Err(Error::lifecycle("Loader is shutting down"));
        };

        {
            let mut descriptors = self.descriptors.lock().await;
            if descriptors.get(name).is_none() {
                descriptors.insert(name, descriptor.clone());
            }
        }

        let ctx = PluginContext {
            name: name.to_string(),
            router: self.router.clone(),
            config: descriptor.config.clone(),
            events: ConfigEvents::new(name, updates_tx),
        };

        let mut plugin = match self.registry.create_plugin(&descriptor.path, ctx) {
            Ok(plugin) => plugin,
            Err(e) => return Err(self.report_failure(name, e)),
        };

        if let Err(e) = plugin.load().await {
            // Release whatever the plugin registered before failing
            plugin.unload();
            self.router.remove_owned_by(name);
            return Err(self.report_failure(name, e));
        }

        info!("Plugin \"{}\" loaded from \"{}\"", name, descriptor.path);
        self.plugins.push(LoadedPlugin {
            name: name.to_string(),
            plugin,
        });
        self.emit_event(LoaderEvent::PluginLoaded {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Unload every active plugin and clear the active list
    ///
    /// Safe to call with no plugins loaded.
    pub fn unload_plugins(&mut self) {
        for mut loaded in self.plugins.drain(..) {
            loaded.plugin.unload();

            let leaked = self.router.remove_owned_by(&loaded.name);
            if leaked > 0 {
                warn!("Plugin \"{}\" left {} route(s) registered after unload", loaded.name, leaked);
            }

            debug!("Plugin \"{}\" unloaded", loaded.name);
            // Inlined emit: `self.plugins` is mutably borrowed by drain
            if self
                .event_tx
                .try_send(LoaderEvent::PluginUnloaded { name: loaded.name })
                .is_err()
            {
                warn!("Loader event channel full, dropping event");
            }
        }
    }

    /// Names of active plugins, in load order
    pub fn active_plugins(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    /// Whether a plugin with this name is active
    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name == name)
    }

    /// Snapshot of the managed descriptor set
    pub async fn descriptors(&self) -> PluginDescriptors {
        self.descriptors.lock().await.clone()
    }

    /// Router shared with the plugins
    pub fn router(&self) -> &SharedRouter {
        &self.router
    }

    /// Unload all plugins and wait for pending config writes
    pub async fn shutdown(mut self) {
        self.unload_plugins();

        // Closing our sender ends the persist task once plugins' senders are gone
        self.updates_tx = None;

        if let Some(task) = self.persist_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, task).await {
                Ok(_) => debug!("Config persistence drained"),
                Err(_) => {
                    warn!("Config persistence did not drain within {:?}", PERSIST_DRAIN_TIMEOUT);
                    abort.abort();
                }
            }
        }

        info!("Plugin loader stopped");
    }

    fn report_failure(&self, name: &str, err: Error) -> Error {
        error!("Failed to load plugin \"{}\": {}", name, err);
        self.emit_event(LoaderEvent::PluginFailed {
            name: name.to_string(),
            error: err.to_string(),
        });
        err
    }

    /// Emit a loader event, dropping it if the channel is full
    fn emit_event(&self, event: LoaderEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Loader event channel full, dropping event");
        }
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        self.unload_plugins();
        if let Some(task) = self.persist_task.take() {
            task.abort();
        }
    }
}

/// Apply a config update to the descriptor set
///
/// Known keys keep their declared type; unknown keys become new options with
/// the type inferred from the value.
pub fn apply_update(descriptors: &mut PluginDescriptors, update: &ConfigUpdate) -> Result<()> {
    let descriptor = descriptors
        .get_mut(&update.plugin)
        .ok_or_else(|| Error::config(format!("No descriptor for plugin '{}'", update.plugin)))?;

    match descriptor.config.get_mut(&update.key) {
        Some(option) => option.set_value(update.value.clone()),
        None => {
            let kind = OptionType::of(&update.value).ok_or_else(|| {
                Error::config(format!(
                    "Unsupported value for new option '{}': {}",
                    update.key, update.value
                ))
            })?;
            let option = ConfigOption::new(0, update.key.clone(), kind, update.value.clone())?;
            descriptor.config.insert(update.key.clone(), option);
            Ok(())
        }
    }
}

/// Persistence task: the only writer of the config store
async fn persist_updates(
    mut updates_rx: mpsc::UnboundedReceiver<ConfigUpdate>,
    descriptors: Arc<Mutex<PluginDescriptors>>,
    store: Arc<dyn ConfigStore>,
    event_tx: mpsc::Sender<LoaderEvent>,
) {
    let emit = |event: LoaderEvent| {
        if event_tx.try_send(event).is_err() {
            warn!("Loader event channel full, dropping event");
        }
    };

    while let Some(update) = updates_rx.recv().await {
        let snapshot = {
            let mut guard = descriptors.lock().await;
            if let Err(e) = apply_update(&mut guard, &update) {
                warn!("Rejected config update {}.{}: {}", update.plugin, update.key, e);
                emit(LoaderEvent::ConfigPersistFailed {
                    plugin: update.plugin,
                    key: update.key,
                    error: e.to_string(),
                });
                continue;
            }
            guard.clone()
        };

        match store.save(&snapshot).await {
            Ok(()) => {
                debug!("Persisted config update {}.{}", update.plugin, update.key);
                emit(LoaderEvent::ConfigPersisted {
                    plugin: update.plugin,
                    key: update.key,
                });
            }
            Err(e) => {
                error!("Failed to persist config update {}.{}: {}", update.plugin, update.key, e);
                emit(LoaderEvent::ConfigPersistFailed {
                    plugin: update.plugin,
                    key: update.key,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptors() -> PluginDescriptors {
        PluginDescriptors::new().with(
            "mdns",
            PluginDescriptor::new("mdns").with_option("txDelay", ConfigOption::number(1, "Discovery Period", 500)),
        )
    }

    fn update(plugin: &str, key: &str, value: serde_json::Value) -> ConfigUpdate {
        ConfigUpdate {
            plugin: plugin.into(),
            key: key.into(),
            value,
        }
    }

    #[test]
    fn test_apply_update_known_key() {
        let mut d = descriptors();
        apply_update(&mut d, &update("mdns", "txDelay", json!(1000))).unwrap();
        assert_eq!(d.get("mdns").unwrap().config["txDelay"].as_u64(), Some(1000));
    }

    #[test]
    fn test_apply_update_rejects_type_change() {
        let mut d = descriptors();
        assert!(apply_update(&mut d, &update("mdns", "txDelay", json!("fast"))).is_err());
        assert_eq!(d.get("mdns").unwrap().config["txDelay"].as_u64(), Some(500));
    }

    #[test]
    fn test_apply_update_new_key_infers_type() {
        let mut d = descriptors();
        apply_update(&mut d, &update("mdns", "mockKey", json!("mockValue"))).unwrap();
        let option = &d.get("mdns").unwrap().config["mockKey"];
        assert_eq!(option.kind, OptionType::String);
        assert_eq!(option.as_str(), Some("mockValue"));

        assert!(apply_update(&mut d, &update("mdns", "list", json!([1, 2]))).is_err());
    }

    #[test]
    fn test_apply_update_unknown_plugin() {
        let mut d = descriptors();
        assert!(apply_update(&mut d, &update("ghost", "k", json!(1))).is_err());
    }
}
