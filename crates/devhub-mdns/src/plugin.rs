//! Peer discovery plugin
//!
//! ## Tasks
//!
//! ```text
//!                 ┌──────────────┐  every txDelay   ┌───────────┐
//! receive=true ─► │DiscoveryTimer│ ───── query ───► │           │
//!                 └──────────────┘                  │ transport │
//!                 ┌──────────────┐ ◄── datagrams ── │           │
//!  always ──────► │   listener   │ ─── response ──► │           │
//!                 └──────┬───────┘  (transmit=true) └───────────┘
//!                        │ valid response
//!                        ▼
//!             NeighbourTable + ProxyDispatcher::register_peer
//! ```
//!
//! ## Unload
//!
//! `unload()` closes the liveness gate first. Every side effect runs only
//! while the gate is open: sends, table insertion, route registration and
//! renames. Nothing started by the plugin can act after `unload()` returns,
//! even work already in flight on another thread. Sends are non-blocking
//! `try_send` calls made under the gate for the same reason.
//!
//! The neighbour table is cleared on unload along with the peer routes, so a
//! reloaded plugin routes every peer it rediscovers.

use async_trait::async_trait;
use axum::http::{HeaderValue, Method};
use devhub_core::config::{option_bool, option_string, option_u64};
use devhub_core::router::{handler_fn, json_response, not_found};
use devhub_core::{
    ConfigEvents, ConfigOption, Error, MethodFilter, Plugin, PluginContext, PluginDescriptor,
    PluginFactory, PluginRegistry, Result, RouteHandler, RouteKind, RoutePattern, SharedRouter,
};
use devhub_proxy::ProxyDispatcher;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::interfaces::local_ipv4_addrs;
use crate::neighbours::NeighbourTable;
use crate::protocol::{self, ServicePorts};
use crate::transport::{MdnsTransport, UdpMulticastTransport};
use crate::wire::Packet;

/// Default discovery period (30 seconds)
const DEFAULT_TX_DELAY_MS: u64 = 30_000;

/// Pause after a transport receive error
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Header carrying a new device name
const DEVICE_NAME_HEADER: &str = "device-name";

/// Device name used when none is configured, e.g. `my-device80`
pub fn default_device_name(ports: ServicePorts) -> String {
    format!("my-device{}", ports.http)
}

/// Counters of discovery traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub queries_sent: u64,
    pub responses_sent: u64,
    pub responses_accepted: u64,
}

#[derive(Default)]
struct Counters {
    queries_sent: AtomicU64,
    responses_sent: AtomicU64,
    responses_accepted: AtomicU64,
}

/// Periodic discovery query task
///
/// Sleeps `period`, sends a query, repeats. The next sleep starts after the
/// send completes; responses are never awaited.
pub struct DiscoveryTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DiscoveryTimer {
    fn start(
        shared: Arc<Shared>,
        transport: Arc<dyn MdnsTransport>,
        period: Duration,
        token: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run_timer(shared, transport, period, token.clone()));
        Self { token, handle }
    }

    /// Whether the timer has been cancelled or its task has ended
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled() || self.handle.is_finished()
    }

    /// Whether the timer task itself has completed
    ///
    /// An aborted task finishes the next time the runtime polls it, so this
    /// can lag [`is_terminated`](Self::is_terminated) briefly.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn terminate(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// State shared between the plugin, its tasks and its route handlers
struct Shared {
    owner: String,
    router: SharedRouter,
    dispatcher: ProxyDispatcher,
    events: ConfigEvents,
    ports: ServicePorts,
    transmit: bool,
    default_device_name: String,
    device_name: RwLock<String>,
    local_addrs: RwLock<Vec<Ipv4Addr>>,
    neighbours: Mutex<NeighbourTable>,
    live: AtomicBool,
    gate: Mutex<()>,
    counters: Counters,
}

impl Shared {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Run `f` only if the plugin is live, holding off `unload` meanwhile
    fn while_live<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.is_live().then(f)
    }

    fn set_live(&self, live: bool) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.live.store(live, Ordering::Release);
    }

    /// Send `packet` to the group, but only while the plugin is live
    ///
    /// The last liveness check and the send happen together under the gate,
    /// so nothing leaves after `unload()` returns. `None` means not live.
    async fn send_while_live(&self, transport: &dyn MdnsTransport, packet: &[u8]) -> Option<Result<()>> {
        loop {
            if !self.is_live() {
                return None;
            }
            if let Err(e) = transport.writable().await {
                return Some(Err(e));
            }
            match self.while_live(|| transport.try_send(packet)) {
                Some(Err(Error::Io(e))) if e.kind() == io::ErrorKind::WouldBlock => continue,
                outcome => return outcome,
            }
        }
    }

    fn device_name(&self) -> String {
        self.device_name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn local_addrs(&self) -> Vec<Ipv4Addr> {
        self.local_addrs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn neighbours_json(&self) -> axum::response::Response {
        let table = self.neighbours.lock().unwrap_or_else(PoisonError::into_inner);
        json_response(&*table)
    }

    /// Answer a discovery query
    async fn handle_query(&self, packet: &Packet, transport: &dyn MdnsTransport) {
        if !protocol::is_valid_query(packet) {
            trace!("Ignoring foreign query");
            return;
        }

        let response = protocol::build_response(self.ports, &self.device_name(), &self.local_addrs());
        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode discovery response: {}", e);
                return;
            }
        };

        match self.send_while_live(transport, &bytes).await {
            Some(Ok(())) => {
                self.counters.responses_sent.fetch_add(1, Ordering::Relaxed);
                trace!("Discovery response sent");
            }
            Some(Err(e)) => warn!("Failed to send discovery response: {}", e),
            None => {}
        }
    }

    /// Record a peer from a discovery response and expose it through the proxy
    fn handle_response(&self, packet: &Packet) {
        let Some(announcement) = protocol::decode_response(packet) else {
            trace!("Ignoring foreign response");
            return;
        };

        let ip = *announcement.addr.ip();
        let is_self = self.local_addrs().contains(&ip) && announcement.advertised_port == self.ports.https;

        let outcome = self.while_live(|| {
            let inserted = self
                .neighbours
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(&announcement.name, ip, announcement.addr.port(), is_self);
            if !inserted {
                return Ok(false);
            }
            self.counters.responses_accepted.fetch_add(1, Ordering::Relaxed);
            self.dispatcher
                .register_peer(&self.router, announcement.addr, is_self, &self.owner)
                .map(|_| true)
        });

        match outcome {
            Some(Ok(true)) => info!(
                is_self,
                "Discovered '{}' at {}", announcement.name, announcement.addr
            ),
            Some(Ok(false)) => trace!("Already known: {}", announcement.addr),
            Some(Err(e)) => warn!("Failed to route peer {}: {}", announcement.addr, e),
            None => {}
        }
    }
}

async fn run_timer(
    shared: Arc<Shared>,
    transport: Arc<dyn MdnsTransport>,
    period: Duration,
    token: CancellationToken,
) {
    let query = match protocol::build_query().encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode discovery query: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        match shared.send_while_live(transport.as_ref(), &query).await {
            Some(Ok(())) => {
                shared.counters.queries_sent.fetch_add(1, Ordering::Relaxed);
                trace!("Discovery query sent");
            }
            Some(Err(e)) => warn!("Failed to send discovery query: {}", e),
            None => break,
        }
    }

    debug!("Discovery timer stopped");
}

async fn run_listener(shared: Arc<Shared>, transport: Arc<dyn MdnsTransport>, token: CancellationToken) {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = transport.recv() => received,
        };

        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Discovery receive failed: {}", e);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => continue,
                }
            }
        };

        if !shared.is_live() {
            break;
        }

        // Other mDNS traffic shares the group; anything we can't parse is dropped
        let packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Dropping malformed packet: {}", e);
                continue;
            }
        };

        if packet.is_response {
            shared.handle_response(&packet);
        } else if shared.transmit {
            shared.handle_query(&packet, transport.as_ref()).await;
        }
    }

    debug!("Discovery listener stopped");
}

/// Peer discovery plugin
pub struct DiscoveryPlugin {
    name: String,
    receive: bool,
    tx_delay: Duration,
    shared: Arc<Shared>,
    transport: Option<Arc<dyn MdnsTransport>>,
    local_addrs: Option<Vec<Ipv4Addr>>,
    token: Option<CancellationToken>,
    timer: Option<DiscoveryTimer>,
    listener: Option<JoinHandle<()>>,
    loaded: bool,
}

impl DiscoveryPlugin {
    /// Create the plugin from its context
    ///
    /// Reads `transmit`, `receive`, `deviceName` and `txDelay` (milliseconds).
    pub fn new(ctx: PluginContext, dispatcher: ProxyDispatcher, ports: ServicePorts) -> Result<Self> {
        let default_name = default_device_name(ports);
        let transmit = option_bool(&ctx.config, "transmit", true);
        let receive = option_bool(&ctx.config, "receive", true);
        let tx_delay = option_u64(&ctx.config, "txDelay", DEFAULT_TX_DELAY_MS);
        let mut device_name = option_string(&ctx.config, "deviceName", &default_name);

        if tx_delay == 0 {
            return Err(Error::plugin(&ctx.name, "txDelay must be greater than zero"));
        }
        if device_name.is_empty() {
            device_name = default_name.clone();
        }

        let shared = Arc::new(Shared {
            owner: ctx.name.clone(),
            router: ctx.router,
            dispatcher,
            events: ctx.events,
            ports,
            transmit,
            default_device_name: default_name,
            device_name: RwLock::new(device_name),
            local_addrs: RwLock::new(Vec::new()),
            neighbours: Mutex::new(NeighbourTable::new()),
            live: AtomicBool::new(false),
            gate: Mutex::new(()),
            counters: Counters::default(),
        });

        Ok(Self {
            name: ctx.name,
            receive,
            tx_delay: Duration::from_millis(tx_delay),
            shared,
            transport: None,
            local_addrs: None,
            token: None,
            timer: None,
            listener: None,
            loaded: false,
        })
    }

    /// Use `transport` instead of joining the UDP multicast group on load
    pub fn with_transport(mut self, transport: Arc<dyn MdnsTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Advertise these addresses instead of enumerating interfaces
    pub fn with_local_addrs(mut self, addrs: Vec<Ipv4Addr>) -> Self {
        self.local_addrs = Some(addrs);
        self
    }

    /// Snapshot of the neighbour table
    pub fn neighbours(&self) -> NeighbourTable {
        self.shared.neighbours.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current device name
    pub fn device_name(&self) -> String {
        self.shared.device_name()
    }

    /// Traffic counters
    pub fn stats(&self) -> DiscoveryStats {
        let c = &self.shared.counters;
        DiscoveryStats {
            queries_sent: c.queries_sent.load(Ordering::Relaxed),
            responses_sent: c.responses_sent.load(Ordering::Relaxed),
            responses_accepted: c.responses_accepted.load(Ordering::Relaxed),
        }
    }

    /// The periodic query timer, if `receive` is enabled and the plugin was loaded
    pub fn timer(&self) -> Option<&DiscoveryTimer> {
        self.timer.as_ref()
    }

    /// Handler behind `GET /neighbours`, callable without the router
    pub fn neighbours_handler(&self) -> Arc<dyn RouteHandler> {
        let shared = self.shared.clone();
        handler_fn(move |_req| {
            let response = shared.neighbours_json();
            async move { response }
        })
    }

    fn device_name_get_handler(&self) -> Arc<dyn RouteHandler> {
        let shared = self.shared.clone();
        handler_fn(move |_req| {
            let response = json_response(&shared.device_name());
            async move { response }
        })
    }

    /// Handler behind `POST /device-name`, callable without the router
    ///
    /// Once the plugin is unloaded it answers `404` and changes nothing.
    pub fn device_name_update_handler(&self) -> Arc<dyn RouteHandler> {
        let shared = self.shared.clone();
        handler_fn(move |req| {
            let requested = req
                .request
                .headers()
                .get(DEVICE_NAME_HEADER)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
                .to_string();

            let name = if requested.is_empty() {
                shared.default_device_name.clone()
            } else {
                requested
            };

            let updated = shared.while_live(|| {
                *shared.device_name.write().unwrap_or_else(PoisonError::into_inner) = name.clone();
                shared.events.config_updated("deviceName", name.clone());
            });

            let response = match updated {
                Some(()) => {
                    info!("Device name set to '{}'", name);
                    json_response(&name)
                }
                None => not_found(req.request.method(), req.request.uri().path()),
            };
            async move { response }
        })
    }

    fn register_routes(&self) -> Result<()> {
        let router = &self.shared.router;
        router.register(
            RoutePattern::exact("/neighbours"),
            MethodFilter::Only(Method::GET),
            RouteKind::Static,
            &self.name,
            self.neighbours_handler(),
        )?;
        router.register(
            RoutePattern::prefix("/device-name"),
            MethodFilter::Only(Method::GET),
            RouteKind::Static,
            &self.name,
            self.device_name_get_handler(),
        )?;
        router.register(
            RoutePattern::prefix("/device-name"),
            MethodFilter::Only(Method::POST),
            RouteKind::Static,
            &self.name,
            self.device_name_update_handler(),
        )?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for DiscoveryPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(Error::lifecycle(format!("Plugin '{}' is already loaded", self.name)));
        }

        let transport: Arc<dyn MdnsTransport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(UdpMulticastTransport::bind()?),
        };

        let local_addrs = self.local_addrs.clone().unwrap_or_else(local_ipv4_addrs);
        debug!("Advertising {} local address(es)", local_addrs.len());
        *self.shared.local_addrs.write().unwrap_or_else(PoisonError::into_inner) = local_addrs;

        if let Err(e) = self.register_routes() {
            self.shared.router.remove_owned_by(&self.name);
            return Err(e);
        }

        self.shared.set_live(true);

        let token = CancellationToken::new();
        self.listener = Some(tokio::spawn(run_listener(
            self.shared.clone(),
            transport.clone(),
            token.child_token(),
        )));

        if self.receive {
            self.timer = Some(DiscoveryTimer::start(
                self.shared.clone(),
                transport,
                self.tx_delay,
                token.child_token(),
            ));
        }

        self.token = Some(token);
        self.loaded = true;

        info!(
            transmit = self.shared.transmit,
            receive = self.receive,
            "Discovery started as '{}' every {:?}",
            self.shared.device_name(),
            self.tx_delay
        );
        Ok(())
    }

    fn unload(&mut self) {
        if !self.loaded {
            return;
        }

        // Close the gate first: in-flight work checks it before acting
        self.shared.set_live(false);

        // Peers are rediscovered, and routed again, after the next load
        self.shared
            .neighbours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(timer) = &self.timer {
            timer.terminate();
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let removed = self
            .shared
            .dispatcher
            .remove_owned_by(&self.shared.router, &self.name);
        self.loaded = false;

        info!("Discovery stopped, {} route(s) removed", removed);
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl Drop for DiscoveryPlugin {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Factory for [`DiscoveryPlugin`]
pub struct DiscoveryFactory {
    dispatcher: ProxyDispatcher,
    ports: ServicePorts,
    transport: Option<Arc<dyn MdnsTransport>>,
}

impl DiscoveryFactory {
    pub fn new(dispatcher: ProxyDispatcher, ports: ServicePorts) -> Self {
        Self {
            dispatcher,
            ports,
            transport: None,
        }
    }

    /// Plugins created by this factory use `transport`
    pub fn with_transport(mut self, transport: Arc<dyn MdnsTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl PluginFactory for DiscoveryFactory {
    fn create(&self, ctx: PluginContext) -> Result<Box<dyn Plugin>> {
        let mut plugin = DiscoveryPlugin::new(ctx, self.dispatcher.clone(), self.ports)?;
        if let Some(transport) = &self.transport {
            plugin = plugin.with_transport(transport.clone());
        }
        Ok(Box::new(plugin))
    }

    fn default_descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("mdns")
            .with_option("transmit", ConfigOption::boolean(1, "Transmit", true))
            .with_option("receive", ConfigOption::boolean(1, "Receive", true))
            .with_option(
                "deviceName",
                ConfigOption::string(1, "Device Name", default_device_name(self.ports)),
            )
            .with_option("txDelay", ConfigOption::number(1, "Discovery Period", DEFAULT_TX_DELAY_MS))
    }
}

/// Register the discovery plugin with a registry
pub fn register(registry: &PluginRegistry, dispatcher: ProxyDispatcher, ports: ServicePorts) {
    registry.register_plugin("mdns", Box::new(DiscoveryFactory::new(dispatcher, ports)));
}
