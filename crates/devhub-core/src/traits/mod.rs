//! Core traits for the DevHub service
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Plugin`]: Lifecycle contract of a feature module
//! - [`PluginFactory`]: Builds a plugin from its context
//! - [`ConfigStore`]: Persistent storage of plugin descriptors

pub mod config_store;
pub mod plugin;

pub use config_store::ConfigStore;
pub use plugin::{ConfigEvents, ConfigUpdate, Plugin, PluginContext, PluginFactory};
