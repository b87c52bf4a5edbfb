// # devhub-core
//
// Core library for the DevHub device web service.
//
// ## Architecture Overview
//
// This library provides the pieces every feature plugin builds on:
// - **ConfigStore**: Trait for loading and persisting plugin descriptors
// - **Plugin**: Lifecycle contract every feature module honours
// - **PluginRegistry**: Name -> factory map, replaces loading modules by path
// - **PluginLoader**: Instantiates enabled plugins and owns the config write path
// - **SharedRouter**: Runtime-mutable route table shared by all plugins
//
// ## Design Principles
//
// 1. **Plugin-Based**: Features register factories, the loader never hard-codes them
// 2. **Message Passing**: Plugins report config changes over a channel, they never write files
// 3. **Owned State**: No process-wide globals, every table is owned by one instance
// 4. **Deterministic Unload**: After `unload()` a plugin produces no further effects

pub mod config;
pub mod error;
pub mod loader;
pub mod registry;
pub mod router;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{ConfigOption, OptionType, PluginDescriptor, PluginDescriptors, PluginOptions};
pub use error::{Error, Result};
pub use loader::{LoaderEvent, PluginLoader};
pub use registry::PluginRegistry;
pub use router::{MethodFilter, RouteHandler, RouteKind, RoutePattern, RoutedRequest, SharedRouter};
pub use store::{FileConfigStore, MemoryConfigStore};
pub use traits::{ConfigEvents, ConfigStore, ConfigUpdate, Plugin, PluginContext, PluginFactory};
