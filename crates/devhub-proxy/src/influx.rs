//! Database proxy plugin
//!
//! Proxies `ALL /influx/*` to the co-located time-series database. An
//! `https` target is reached with a forwarder that accepts the device's
//! self-signed certificate; no other route gets that exemption.

use async_trait::async_trait;
use devhub_core::config::{option_string, option_u64};
use devhub_core::{
    ConfigOption, Error, Plugin, PluginContext, PluginDescriptor, PluginFactory, PluginRegistry,
    Result, SharedRouter,
};
use std::sync::Arc;
use url::Url;

use crate::dispatcher::ProxyDispatcher;
use crate::forwarder::Forwarder;

/// Route prefix served by the plugin
pub const INFLUX_PREFIX: &str = "/influx";

const DEFAULT_PORT: u64 = 8086;
const DEFAULT_DOMAIN: &str = "localhost";
const DEFAULT_SCHEME: &str = "https";

/// Proxy plugin for the local database
pub struct InfluxPlugin {
    name: String,
    router: SharedRouter,
    dispatcher: ProxyDispatcher,
    target: Url,
    forwarder: Arc<Forwarder>,
    loaded: bool,
}

impl InfluxPlugin {
    /// Create the plugin from its context
    ///
    /// Reads `INFLUX_PORT`, `INFLUX_DOMAIN` and `INFLUX_SCHEME`.
    pub fn new(ctx: PluginContext, dispatcher: ProxyDispatcher) -> Result<Self> {
        let port = option_u64(&ctx.config, "INFLUX_PORT", DEFAULT_PORT);
        let domain = option_string(&ctx.config, "INFLUX_DOMAIN", DEFAULT_DOMAIN);
        let scheme = option_string(&ctx.config, "INFLUX_SCHEME", DEFAULT_SCHEME);

        let port = u16::try_from(port)
            .map_err(|_| Error::plugin(&ctx.name, format!("INFLUX_PORT out of range: {}", port)))?;

        let target = Url::parse(&format!("{}://{}:{}", scheme, domain, port))
            .map_err(|e| Error::plugin(&ctx.name, format!("Invalid database origin: {}", e)))?;

        let forwarder = match target.scheme() {
            "https" => Forwarder::accepting_invalid_certs()?,
            "http" => Forwarder::new()?,
            other => {
                return Err(Error::plugin(&ctx.name, format!("Unsupported INFLUX_SCHEME '{}'", other)));
            }
        };

        Ok(Self {
            name: ctx.name,
            router: ctx.router,
            dispatcher,
            target,
            forwarder: Arc::new(forwarder),
            loaded: false,
        })
    }

    /// Origin requests are forwarded to
    pub fn target(&self) -> &Url {
        &self.target
    }
}

#[async_trait]
impl Plugin for InfluxPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(Error::lifecycle(format!("Plugin '{}' is already loaded", self.name)));
        }

        self.dispatcher.register_static(
            &self.router,
            INFLUX_PREFIX,
            self.target.clone(),
            self.forwarder.clone(),
            &self.name,
        )?;

        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if !self.loaded {
            return;
        }
        self.dispatcher.remove_owned_by(&self.router, &self.name);
        self.loaded = false;
        tracing::debug!("Database proxy '{}' unloaded", self.name);
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Factory for [`InfluxPlugin`]
pub struct InfluxFactory {
    dispatcher: ProxyDispatcher,
}

impl InfluxFactory {
    pub fn new(dispatcher: ProxyDispatcher) -> Self {
        Self { dispatcher }
    }
}

impl PluginFactory for InfluxFactory {
    fn create(&self, ctx: PluginContext) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(InfluxPlugin::new(ctx, self.dispatcher.clone())?))
    }

    fn default_descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("influx")
            .with_option("INFLUX_PORT", ConfigOption::number(1, "Influx Port", DEFAULT_PORT))
            .with_option("INFLUX_DOMAIN", ConfigOption::string(1, "Influx Domain", DEFAULT_DOMAIN))
            .with_option("INFLUX_SCHEME", ConfigOption::string(2, "Influx Scheme", DEFAULT_SCHEME))
    }
}

/// Register the database proxy plugin with a registry
///
/// # Example
///
/// ```rust,ignore
/// let registry = PluginRegistry::new();
/// devhub_proxy::register(&registry, dispatcher.clone());
/// ```
pub fn register(registry: &PluginRegistry, dispatcher: ProxyDispatcher) {
    registry.register_plugin("influx", Box::new(InfluxFactory::new(dispatcher)));
}
