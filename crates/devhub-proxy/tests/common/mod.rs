//! Shared servers for proxy contract tests

#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::Request;
use axum::http::Method;
use axum::routing::{any, get};
use devhub_core::SharedRouter;
use std::net::SocketAddr;

/// Serve `app` on an ephemeral loopback port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serve the shared router the way the daemon does
pub async fn serve_router(router: SharedRouter) -> SocketAddr {
    serve(router.into_axum()).await
}

/// Upstream with a fixed `/target` and an echo endpoint
///
/// `ANY /echo/*` answers `METHOD path?query|body`.
pub async fn spawn_target() -> SocketAddr {
    let app = Router::new()
        .route("/target", get(|| async { "Target endpoint" }))
        .route("/echo/{*rest}", any(echo));
    serve(app).await
}

async fn echo(method: Method, request: Request) -> String {
    let uri = request.uri().clone();
    let body: Bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let path_and_query = uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default();
    format!("{} {}|{}", method, path_and_query, String::from_utf8_lossy(&body))
}

/// A loopback port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
