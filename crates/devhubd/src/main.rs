// # devhubd - DevHub Daemon
//
// Thin integration layer: all plugin, routing and discovery logic lives in
// the library crates.
//
// The devhubd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Registering the built-in plugins
// 4. Loading enabled plugins and serving HTTP until SIGINT/SIGTERM
//
// ## Configuration
//
// - `DEVHUB_HTTP_PORT`: Port the HTTP server listens on (default 80)
// - `DEVHUB_HTTPS_PORT`: HTTPS port advertised in discovery responses (default 443)
// - `DEVHUB_BIND_ADDR`: Listen address (default 0.0.0.0)
// - `DEVHUB_CONFIG_FILE`: Plugin descriptor file (default ./default.json)
// - `DEVHUB_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export DEVHUB_HTTP_PORT=8080
// export DEVHUB_CONFIG_FILE=/var/lib/devhub/default.json
//
// devhubd
// ```

use anyhow::{Context, Result};
use devhub_core::{FileConfigStore, LoaderEvent, PluginLoader, PluginRegistry, SharedRouter};
use devhub_mdns::ServicePorts;
use devhub_proxy::{Forwarder, ProxyDispatcher};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevhubExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DevhubExitCode> for ExitCode {
    fn from(code: DevhubExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
struct Config {
    http_port: u16,
    https_port: u16,
    bind_addr: IpAddr,
    config_file: PathBuf,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            http_port: parse_or(&lookup, "DEVHUB_HTTP_PORT", 80)?,
            https_port: parse_or(&lookup, "DEVHUB_HTTPS_PORT", 443)?,
            bind_addr: parse_or(&lookup, "DEVHUB_BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            config_file: lookup("DEVHUB_CONFIG_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./default.json")),
            log_level: lookup("DEVHUB_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("DEVHUB_HTTP_PORT must be between 1 and 65535");
        }
        if self.https_port == 0 {
            anyhow::bail!("DEVHUB_HTTPS_PORT must be between 1 and 65535");
        }

        if let Some(parent) = self.config_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "DEVHUB_CONFIG_FILE parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "DEVHUB_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    fn ports(&self) -> ServicePorts {
        ServicePorts {
            http: self.http_port,
            https: self.https_port,
        }
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: '{}'", key, value)),
        _ => Ok(default),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DevhubExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DevhubExitCode::ConfigError.into();
    }

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DevhubExitCode::ConfigError.into();
    }

    info!("Starting devhubd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DevhubExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config) -> DevhubExitCode {
    let (loader, listener) = match start(&config).await {
        Ok(started) => started,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return DevhubExitCode::ConfigError;
        }
    };

    let app = loader.router().clone().into_axum().layer(devhub_core::router::cors());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match wait_for_shutdown().await {
                Ok(signal) => info!("Received shutdown signal: {}", signal),
                Err(e) => error!("Signal handling failed: {:#}", e),
            }
        })
        .await;

    info!("Shutting down daemon");
    loader.shutdown().await;

    match served {
        Ok(()) => DevhubExitCode::CleanShutdown,
        Err(e) => {
            error!("HTTP server error: {}", e);
            DevhubExitCode::RuntimeError
        }
    }
}

/// Register plugins, load the enabled ones and bind the listener
async fn start(config: &Config) -> Result<(PluginLoader, tokio::net::TcpListener)> {
    let router = SharedRouter::new();
    let dispatcher = ProxyDispatcher::new(Forwarder::new()?);

    let registry = Arc::new(PluginRegistry::new());
    info!("Registering discovery plugin");
    devhub_mdns::register(&registry, dispatcher.clone(), config.ports());
    info!("Registering influx proxy plugin");
    devhub_proxy::register(&registry, dispatcher);

    let store = Arc::new(FileConfigStore::new(
        &config.config_file,
        registry.default_descriptors(),
    ));
    info!("Plugin configuration: {}", config.config_file.display());

    let (mut loader, events) = PluginLoader::open(registry, store, router).await?;
    tokio::spawn(log_loader_events(events));

    let loaded = loader.load_plugins().await;
    info!("{} plugin(s) active: {:?}", loaded, loader.active_plugins());

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    Ok((loader, listener))
}

async fn log_loader_events(mut events: mpsc::Receiver<LoaderEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LoaderEvent::PluginFailed { name, error } => {
                warn!("Plugin '{}' failed: {}", name, error)
            }
            LoaderEvent::ConfigPersistFailed { plugin, key, error } => {
                warn!("Could not persist {}.{}: {}", plugin, key, error)
            }
            other => debug!("Loader event: {:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.http_port, 80);
        assert_eq!(config.https_port, 443);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:80");
        assert_eq!(config.config_file, PathBuf::from("./default.json"));
        assert_eq!(config.level().unwrap(), Level::INFO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DEVHUB_HTTP_PORT", "8080"),
            ("DEVHUB_HTTPS_PORT", " 8443 "),
            ("DEVHUB_BIND_ADDR", "127.0.0.1"),
            ("DEVHUB_LOG_LEVEL", "DEBUG"),
        ])
        .unwrap();
        assert_eq!(config.ports(), ServicePorts { http: 8080, https: 8443 });
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[("DEVHUB_HTTP_PORT", "http")]).is_err());
        assert!(config(&[("DEVHUB_HTTP_PORT", "70000")]).is_err());
        assert!(config(&[("DEVHUB_BIND_ADDR", "localhost")]).is_err());

        let zero = config(&[("DEVHUB_HTTPS_PORT", "0")]).unwrap();
        assert!(zero.validate().is_err());

        let level = config(&[("DEVHUB_LOG_LEVEL", "loud")]).unwrap();
        assert!(level.validate().is_err());
    }

    #[test]
    fn test_missing_config_dir_rejected() {
        let config = config(&[("DEVHUB_CONFIG_FILE", "/nonexistent/devhub/default.json")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DevhubExitCode::CleanShutdown as u8, 0);
        assert_eq!(DevhubExitCode::ConfigError as u8, 1);
        assert_eq!(DevhubExitCode::RuntimeError as u8, 2);
    }
}
