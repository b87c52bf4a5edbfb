//! Test doubles and helpers for discovery contract tests
//!
//! Devices talk over a `MemoryBus` so tests never touch the real multicast
//! group and can run concurrently.

#![allow(dead_code)]

use devhub_core::{ConfigOption, ConfigUpdate, PluginContext, PluginOptions, SharedRouter};
use devhub_mdns::protocol::build_response;
use devhub_mdns::{DiscoveryPlugin, MemoryBus, SentLog, ServicePorts};
use devhub_proxy::{Forwarder, ProxyDispatcher};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Plugin options as stored in a descriptor
pub fn options(transmit: bool, receive: bool, device_name: &str, tx_delay_ms: u64) -> PluginOptions {
    let mut config = PluginOptions::new();
    config.insert("transmit".into(), ConfigOption::boolean(1, "Transmit", transmit));
    config.insert("receive".into(), ConfigOption::boolean(1, "Receive", receive));
    config.insert("deviceName".into(), ConfigOption::string(1, "Device Name", device_name));
    config.insert("txDelay".into(), ConfigOption::number(1, "Discovery Period", tx_delay_ms));
    config
}

/// A discovery plugin on a bus, with handles for inspection
pub struct Device {
    pub plugin: DiscoveryPlugin,
    pub router: SharedRouter,
    pub dispatcher: ProxyDispatcher,
    pub sent: SentLog,
    pub updates: mpsc::UnboundedReceiver<ConfigUpdate>,
}

/// Build an unloaded device advertising `local` on `bus`
pub fn device(bus: &MemoryBus, local: Ipv4Addr, config: PluginOptions) -> Device {
    let router = SharedRouter::new();
    let dispatcher = ProxyDispatcher::new(Forwarder::new().unwrap());
    let (ctx, updates) = PluginContext::standalone("mdns", router.clone(), config);

    let transport = bus.transport();
    let sent = transport.sent_log();

    let plugin = DiscoveryPlugin::new(ctx, dispatcher.clone(), ServicePorts::default())
        .unwrap()
        .with_transport(Arc::new(transport))
        .with_local_addrs(vec![local]);

    Device {
        plugin,
        router,
        dispatcher,
        sent,
        updates,
    }
}

/// Encoded response announcing a peer
pub fn peer_response(name: &str, ip: Ipv4Addr, http_port: u16) -> Vec<u8> {
    build_response(ServicePorts { http: http_port, https: 443 }, name, &[ip])
        .encode()
        .unwrap()
}

/// Serve `app` on an ephemeral loopback port
pub async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll `condition` every 10ms for up to two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
