// # Config Store Trait
//
// Defines the interface for loading and persisting plugin descriptors.
//
// ## Implementations
//
// - File-based: JSON file with atomic replace (`FileConfigStore`)
// - In-memory: tests and embedded use (`MemoryConfigStore`)
//
// ## Ownership
//
// Only the `PluginLoader` writes through a store. Plugins never touch it;
// they report changes with `ConfigEvents::config_updated`.

use async_trait::async_trait;

use crate::config::PluginDescriptors;
use crate::error::Result;

/// Trait for config store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the descriptor set
    ///
    /// Stores that can recover (missing or corrupt file) should return a
    /// default set instead of failing.
    async fn load(&self) -> Result<PluginDescriptors>;

    /// Persist the full descriptor set, replacing what was stored before
    async fn save(&self, descriptors: &PluginDescriptors) -> Result<()>;
}
