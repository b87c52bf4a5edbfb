//! Contract Test: Database Proxy
//!
//! Constraints verified:
//! - `/influx/<rest>` is forwarded to the configured origin with `<rest>` kept
//! - Paths outside any registered prefix are 404 with no proxy attempt
//! - An unreachable database becomes a 502, never a crash
//! - Unloading removes the route

mod common;

use common::*;
use devhub_core::{ConfigOption, Plugin, PluginContext, PluginOptions, SharedRouter};
use devhub_proxy::{Forwarder, InfluxPlugin, ProxyDispatcher};

fn options(port: u16) -> PluginOptions {
    let mut config = PluginOptions::new();
    config.insert("INFLUX_PORT".into(), ConfigOption::number(1, "Influx Port", port.into()));
    config.insert("INFLUX_DOMAIN".into(), ConfigOption::string(1, "Influx Domain", "127.0.0.1"));
    config.insert("INFLUX_SCHEME".into(), ConfigOption::string(2, "Influx Scheme", "http"));
    config
}

fn plugin(router: &SharedRouter, port: u16) -> InfluxPlugin {
    let (ctx, _rx) = PluginContext::standalone("influx", router.clone(), options(port));
    InfluxPlugin::new(ctx, ProxyDispatcher::new(Forwarder::new().unwrap())).unwrap()
}

#[tokio::test]
async fn proxies_request_to_target_server() {
    let target = spawn_target().await;
    let router = SharedRouter::new();
    let mut influx = plugin(&router, target.port());
    influx.load().await.unwrap();
    let addr = serve_router(router).await;

    let response = reqwest::get(format!("http://{}/influx/target", addr)).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Target endpoint");
}

#[tokio::test]
async fn preserves_method_path_query_and_body() {
    let target = spawn_target().await;
    let router = SharedRouter::new();
    let mut influx = plugin(&router, target.port());
    influx.load().await.unwrap();
    let addr = serve_router(router).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/influx/echo/api/v2/write?bucket=b1", addr))
        .body("cpu value=1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        "POST /echo/api/v2/write?bucket=b1|cpu value=1"
    );
}

#[tokio::test]
async fn non_proxied_path_is_not_found() {
    let target = spawn_target().await;
    let router = SharedRouter::new();
    let mut influx = plugin(&router, target.port());
    influx.load().await.unwrap();
    let addr = serve_router(router).await;

    let response = reqwest::get(format!("http://{}/target", addr)).await.unwrap();

    assert_eq!(response.status(), 404);
    assert!(response.text().await.unwrap().contains("Cannot GET"));
}

#[tokio::test]
async fn unreachable_database_is_bad_gateway() {
    let router = SharedRouter::new();
    let mut influx = plugin(&router, closed_port().await);
    influx.load().await.unwrap();
    let addr = serve_router(router).await;

    let response = reqwest::get(format!("http://{}/influx/ping", addr)).await.unwrap();

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn unload_removes_route() {
    let target = spawn_target().await;
    let router = SharedRouter::new();
    let mut influx = plugin(&router, target.port());
    influx.load().await.unwrap();
    let addr = serve_router(router.clone()).await;

    influx.unload();

    let response = reqwest::get(format!("http://{}/influx/target", addr)).await.unwrap();
    assert_eq!(response.status(), 404);
    assert!(router.is_empty());
}
