//! Configuration types for the DevHub service
//!
//! The descriptor file is a JSON object keyed by plugin name:
//!
//! ```json
//! {
//!   "mdns": {
//!     "path": "mdns",
//!     "enabled": true,
//!     "config": {
//!       "txDelay": { "priority": 1, "readableName": "Discovery Period", "type": "number", "value": 30000 }
//!     }
//!   }
//! }
//! ```
//!
//! Plugin order in the file is significant: plugins are loaded in that order
//! and the order survives a load/save cycle.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Declared type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// JSON number
    Number,
    /// JSON string
    String,
    /// JSON boolean
    Boolean,
}

impl OptionType {
    /// Check whether a JSON value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            OptionType::Number => value.is_number(),
            OptionType::String => value.is_string(),
            OptionType::Boolean => value.is_boolean(),
        }
    }

    /// Infer the option type of a JSON value
    ///
    /// Returns `None` for null, arrays and objects.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Number(_) => Some(OptionType::Number),
            Value::String(_) => Some(OptionType::String),
            Value::Bool(_) => Some(OptionType::Boolean),
            _ => None,
        }
    }
}

/// A single named configuration option of a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    /// Display priority (lower renders first)
    pub priority: i64,

    /// Human readable label
    pub readable_name: String,

    /// Declared value type
    #[serde(rename = "type")]
    pub kind: OptionType,

    /// Current value, always of type `kind`
    pub value: Value,
}

impl ConfigOption {
    /// Create a new option, rejecting a value that does not match `kind`
    pub fn new(
        priority: i64,
        readable_name: impl Into<String>,
        kind: OptionType,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let option = Self {
            priority,
            readable_name: readable_name.into(),
            kind,
            value: value.into(),
        };
        option.validate()?;
        Ok(option)
    }

    /// Convenience constructor for a number option
    pub fn number(priority: i64, readable_name: impl Into<String>, value: u64) -> Self {
        Self {
            priority,
            readable_name: readable_name.into(),
            kind: OptionType::Number,
            value: Value::from(value),
        }
    }

    /// Convenience constructor for a string option
    pub fn string(priority: i64, readable_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            priority,
            readable_name: readable_name.into(),
            kind: OptionType::String,
            value: Value::String(value.into()),
        }
    }

    /// Convenience constructor for a boolean option
    pub fn boolean(priority: i64, readable_name: impl Into<String>, value: bool) -> Self {
        Self {
            priority,
            readable_name: readable_name.into(),
            kind: OptionType::Boolean,
            value: Value::Bool(value),
        }
    }

    /// Validate that the value matches the declared type
    pub fn validate(&self) -> Result<()> {
        if self.kind.matches(&self.value) {
            Ok(())
        } else {
            Err(Error::config(format!(
                "Option '{}' declared as {:?} but holds {}",
                self.readable_name, self.kind, self.value
            )))
        }
    }

    /// Replace the value, keeping the declared type
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        if !self.kind.matches(&value) {
            return Err(Error::config(format!(
                "Option '{}' expects a {:?} value, got {}",
                self.readable_name, self.kind, value
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Value as a boolean, if it is one
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Value as an unsigned integer, if it is one
    pub fn as_u64(&self) -> Option<u64> {
        self.value.as_u64()
    }

    /// Value as a string slice, if it is one
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Named options of one plugin
pub type PluginOptions = BTreeMap<String, ConfigOption>;

/// Read a boolean option, falling back to `default` when absent or mistyped
pub fn option_bool(options: &PluginOptions, key: &str, default: bool) -> bool {
    options.get(key).and_then(ConfigOption::as_bool).unwrap_or(default)
}

/// Read a number option, falling back to `default` when absent or mistyped
pub fn option_u64(options: &PluginOptions, key: &str, default: u64) -> u64 {
    options.get(key).and_then(ConfigOption::as_u64).unwrap_or(default)
}

/// Read a string option, falling back to `default` when absent or mistyped
pub fn option_string(options: &PluginOptions, key: &str, default: &str) -> String {
    options
        .get(key)
        .and_then(ConfigOption::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Persisted record describing one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Registry key of the factory that builds this plugin
    pub path: String,

    /// Whether the plugin is loaded at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Plugin options
    #[serde(default)]
    pub config: PluginOptions,
}

impl PluginDescriptor {
    /// Create an enabled descriptor with no options
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            config: PluginOptions::new(),
        }
    }

    /// Enable or disable the plugin
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add an option
    pub fn with_option(mut self, key: impl Into<String>, option: ConfigOption) -> Self {
        self.config.insert(key.into(), option);
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// Ordered map of plugin name to descriptor
///
/// Serialized as a JSON object whose key order follows insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginDescriptors {
    entries: Vec<(String, PluginDescriptor)>,
}

impl PluginDescriptors {
    /// Create an empty descriptor set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor, keeping the original position on replace
    pub fn insert(&mut self, name: impl Into<String>, descriptor: PluginDescriptor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = descriptor,
            None => self.entries.push((name, descriptor)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, descriptor: PluginDescriptor) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Look up a descriptor by plugin name
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Look up a descriptor mutably by plugin name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginDescriptor> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Iterate descriptors in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PluginDescriptor)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Plugin names in order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate every option of every descriptor
    pub fn validate(&self) -> Result<()> {
        for (name, descriptor) in &self.entries {
            if descriptor.path.is_empty() {
                return Err(Error::config(format!("Plugin '{}' has an empty path", name)));
            }
            for (key, option) in &descriptor.config {
                option
                    .validate()
                    .map_err(|e| Error::config(format!("Plugin '{}' option '{}': {}", name, key, e)))?;
            }
        }
        Ok(())
    }
}

impl Serialize for PluginDescriptors {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, descriptor) in &self.entries {
            map.serialize_entry(name, descriptor)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PluginDescriptors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DescriptorsVisitor;

        impl<'de> Visitor<'de> for DescriptorsVisitor {
            type Value = PluginDescriptors;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of plugin name to plugin descriptor")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut descriptors = PluginDescriptors::new();
                while let Some((name, descriptor)) = access.next_entry::<String, PluginDescriptor>()? {
                    if descriptors.get(&name).is_some() {
                        return Err(serde::de::Error::custom(format!("duplicate plugin '{}'", name)));
                    }
                    descriptors.entries.push((name, descriptor));
                }
                Ok(descriptors)
            }
        }

        deserializer.deserialize_map(DescriptorsVisitor)
    }
}
