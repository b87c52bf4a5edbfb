// # File Config Store
//
// File-based implementation of ConfigStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: New content goes to `<path>.tmp`, then renamed over `<path>`
// - Backup: The previous file is copied to `<path>.backup` before each replace
// - Corruption: An unparsable or invalid file falls back to the backup
// - Defaults: With neither file nor usable backup, the default set is
//   written back and used
//
// Loading never fails: a missing or broken config file must not stop the
// device from starting.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::PluginDescriptors;
use crate::error::{Error, Result};
use crate::traits::ConfigStore;

/// File-based config store
///
/// # Example
///
/// ```rust,no_run
/// use devhub_core::{ConfigStore, FileConfigStore, PluginDescriptors};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::new("./default.json", PluginDescriptors::new());
///     let descriptors = store.load().await?;
///     store.save(&descriptors).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    defaults: PluginDescriptors,
    /// Serializes writers so temp files never interleave
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    /// Create a store for `path`, falling back to `defaults` when needed
    pub fn new<P: AsRef<Path>>(path: P, defaults: PluginDescriptors) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            defaults,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the config file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate a descriptor file
    async fn read_descriptors(path: &Path) -> Result<PluginDescriptors> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::config_store(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let descriptors: PluginDescriptors = serde_json::from_str(&content).map_err(|e| {
            Error::config_store(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        descriptors.validate()?;
        Ok(descriptors)
    }

    /// Fall back to the backup or the defaults, rewriting the main file
    async fn recover(&self) -> PluginDescriptors {
        let backup_path = Self::backup_path(&self.path);
        let recovered = if fs::try_exists(&backup_path).await.unwrap_or(false) {
            match Self::read_descriptors(&backup_path).await {
                Ok(descriptors) => {
                    tracing::info!("Recovered config from backup: {} plugins", descriptors.len());
                    Some(descriptors)
                }
                Err(e) => {
                    tracing::warn!("Backup config unusable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let descriptors = recovered.unwrap_or_else(|| {
            tracing::warn!("Using default plugin configuration");
            self.defaults.clone()
        });

        if let Err(e) = self.write_file(&descriptors, false).await {
            tracing::error!("Failed to write recovered config {}: {}", self.path.display(), e);
        }

        descriptors
    }

    /// Write descriptors atomically
    ///
    /// `keep_backup` copies the current file to `.backup` first; recovery
    /// skips it so a corrupt file never overwrites a good backup.
    async fn write_file(&self, descriptors: &PluginDescriptors, keep_backup: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_string_pretty(descriptors)
            .map_err(|e| Error::config_store(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await.unwrap_or(false) {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config_store(format!(
                        "Failed to create config directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::config_store(format!("Failed to create temp file {}: {}", temp_path.display(), e))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::config_store(format!("Failed to write temp file {}: {}", temp_path.display(), e))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::config_store(format!("Failed to sync temp file {}: {}", temp_path.display(), e))
            })?;
        }

        if keep_backup && fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create config backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::config_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Config written to {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<PluginDescriptors> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::info!("Config file {} not found, creating defaults", self.path.display());
            return Ok(self.recover().await);
        }

        match Self::read_descriptors(&self.path).await {
            Ok(descriptors) => {
                tracing::debug!("Loaded config: {} plugins", descriptors.len());
                Ok(descriptors)
            }
            Err(e) => {
                tracing::warn!("Config file appears corrupted: {}. Attempting recovery.", e);
                Ok(self.recover().await)
            }
        }
    }

    async fn save(&self, descriptors: &PluginDescriptors) -> Result<()> {
        self.write_file(descriptors, true).await
    }
}
