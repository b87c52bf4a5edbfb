// # Memory Config Store
//
// In-memory implementation of ConfigStore.
//
// ## When to Use
//
// - Testing environments
// - Embedding the service where persistence is handled elsewhere

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::config::PluginDescriptors;
use crate::error::Result;
use crate::traits::ConfigStore;

/// In-memory config store
///
/// Clones share the same contents and save counter.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<PluginDescriptors>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `descriptors`
    pub fn with_descriptors(descriptors: PluginDescriptors) -> Self {
        Self {
            inner: Arc::new(RwLock::new(descriptors)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of completed `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current stored contents
    pub async fn snapshot(&self) -> PluginDescriptors {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<PluginDescriptors> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, descriptors: &PluginDescriptors) -> Result<()> {
        *self.inner.write().await = descriptors.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
