//! Architectural Contract Test: Shared Router over HTTP
//!
//! Constraints verified:
//! - Routes registered at runtime are served without restarting the server
//! - Removed routes answer `404 Cannot METHOD path`
//! - Exact routes win over prefix routes, longer prefixes win over shorter
//! - Cross-origin browsers get preflights answered and responses readable

use axum::response::IntoResponse;
use devhub_core::router::{cors, handler_fn};
use devhub_core::{MethodFilter, RouteKind, RoutePattern, SharedRouter};
use std::net::SocketAddr;

async fn serve(router: SharedRouter) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_axum()).await.unwrap();
    });
    addr
}

fn text(router: &SharedRouter, pattern: RoutePattern, owner: &str, body: &'static str) {
    router
        .register(
            pattern,
            MethodFilter::Any,
            RouteKind::Static,
            owner,
            handler_fn(move |req| async move { format!("{} {}", body, req.rest_with_query()).into_response() }),
        )
        .unwrap();
}

#[tokio::test]
async fn runtime_registration_and_removal() {
    let router = SharedRouter::new();
    let addr = serve(router.clone()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("http://{}/late", addr)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "Cannot GET /late");

    text(&router, RoutePattern::prefix("/late"), "late-owner", "late");

    let resp = client.get(format!("http://{}/late/x?y=1", addr)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "late /x?y=1");

    assert_eq!(router.remove_owned_by("late-owner"), 1);

    let resp = client.post(format!("http://{}/late/x", addr)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "Cannot POST /late/x");
}

#[tokio::test]
async fn most_specific_route_wins() {
    let router = SharedRouter::new();
    text(&router, RoutePattern::prefix("/a"), "t", "short");
    text(&router, RoutePattern::prefix("/a/b"), "t", "long");
    text(&router, RoutePattern::exact("/a/b/c"), "t", "exact");
    let addr = serve(router).await;
    let client = reqwest::Client::new();

    let get = |path: &'static str| {
        let client = client.clone();
        async move {
            client
                .get(format!("http://{}{}", addr, path))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        }
    };

    assert_eq!(get("/a/z").await, "short /z");
    assert_eq!(get("/a/b/z").await, "long /z");
    assert_eq!(get("/a/b/c").await, "exact /");
    assert_eq!(get("/a/b").await, "long /");
}

#[tokio::test]
async fn cross_origin_requests_allowed() {
    let router = SharedRouter::new();
    text(&router, RoutePattern::prefix("/device-name"), "t", "name");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router.into_axum().layer(cors());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = reqwest::Client::new();
    let url = format!("http://{}/device-name", addr);

    let preflight = client
        .request(reqwest::Method::OPTIONS, &url)
        .header("origin", "http://dashboard.local")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "device-name,content-type")
        .send()
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");
    let allowed = preflight.headers()["access-control-allow-headers"].to_str().unwrap().to_lowercase();
    assert!(allowed.contains("device-name"));
    assert!(allowed.contains("content-type"));

    let resp = client
        .post(&url)
        .header("origin", "http://dashboard.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.text().await.unwrap(), "name /");

    // Unrouted paths still answer 404, with the CORS header
    let resp = client
        .get(format!("http://{}/missing", addr))
        .header("origin", "http://dashboard.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}
