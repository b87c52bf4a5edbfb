//! Shared, runtime-mutable route table
//!
//! Every plugin receives a clone of the same [`SharedRouter`]. Plugins add
//! routes while loading (and at any later time, e.g. when a peer is
//! discovered) and remove them on unload. The table is served through axum by
//! mounting it as the fallback service, so no route is fixed at startup.
//!
//! ## Matching
//!
//! - [`RoutePattern::Exact`] matches one path
//! - [`RoutePattern::Prefix`] matches `prefix` and everything below `prefix/`
//! - Exact matches win over prefixes, longer prefixes win over shorter ones
//! - Nothing matched: `404` with body `Cannot <METHOD> <path>`
//!
//! Browser clients on other origins are allowed through [`cors`].
//!
//! Overlapping registrations are rejected with [`Error::RouteConflict`] so two
//! plugins can never silently clobber the same path.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Error, Result};

/// Path pattern of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// Match exactly this path
    Exact(String),
    /// Match this path and every path below it
    Prefix(String),
}

impl RoutePattern {
    /// Exact pattern
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    /// Prefix pattern; a trailing `/` or `/*` is stripped
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('*').trim_end_matches('/');
        Self::Prefix(trimmed.to_string())
    }

    /// Return the remainder of `path` after this pattern, if it matches
    fn remainder<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            RoutePattern::Exact(p) => (path == p).then_some(""),
            RoutePattern::Prefix(p) => {
                let rest = path.strip_prefix(p.as_str())?;
                (rest.is_empty() || rest.starts_with('/')).then_some(rest)
            }
        }
    }

    /// Matched base path
    pub fn base(&self) -> &str {
        match self {
            RoutePattern::Exact(p) | RoutePattern::Prefix(p) => p,
        }
    }

    fn specificity(&self) -> (u8, usize) {
        match self {
            RoutePattern::Exact(p) => (1, p.len()),
            RoutePattern::Prefix(p) => (0, p.len()),
        }
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePattern::Exact(p) => write!(f, "{}", p),
            RoutePattern::Prefix(p) => write!(f, "{}/*", p),
        }
    }
}

/// Methods a route accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Any method
    Any,
    /// A single method
    Only(Method),
}

impl MethodFilter {
    fn allows(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(m) => m == method,
        }
    }

    fn overlaps(&self, other: &MethodFilter) -> bool {
        match (self, other) {
            (MethodFilter::Only(a), MethodFilter::Only(b)) => a == b,
            _ => true,
        }
    }
}

/// Whether a route was registered at load time or at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Registered once while a plugin loads
    Static,
    /// Registered at runtime (e.g. one per discovered peer)
    Dynamic,
}

/// A request matched to a route
pub struct RoutedRequest {
    /// The original request
    pub request: Request,

    /// Base path of the matched pattern
    pub base: String,

    /// Path remainder after the base (empty or starting with `/`)
    pub rest: String,
}

impl RoutedRequest {
    /// Build a routed request by hand (for invoking a handler directly)
    pub fn new(request: Request, base: impl Into<String>, rest: impl Into<String>) -> Self {
        Self {
            request,
            base: base.into(),
            rest: rest.into(),
        }
    }

    /// Remainder path plus the original query string
    pub fn rest_with_query(&self) -> String {
        let rest = if self.rest.is_empty() { "/" } else { self.rest.as_str() };
        match self.request.uri().query() {
            Some(q) => format!("{}?{}", rest, q),
            None => rest.to_string(),
        }
    }
}

/// Trait for route handlers
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle a matched request
    async fn call(&self, request: RoutedRequest) -> Response;
}

/// Route handler built from an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(RoutedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send,
{
    async fn call(&self, request: RoutedRequest) -> Response {
        (self.f)(request).await
    }
}

/// Wrap an async closure as a shareable route handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(RoutedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Public description of a registered route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Path pattern
    pub pattern: RoutePattern,
    /// Accepted methods
    pub methods: MethodFilter,
    /// Static or dynamic
    pub kind: RouteKind,
    /// Owning plugin
    pub owner: String,
}

struct RouteEntry {
    info: RouteInfo,
    handler: Arc<dyn RouteHandler>,
}

/// Route table shared by every plugin
///
/// Cloning is cheap; all clones see the same table.
#[derive(Clone, Default)]
pub struct SharedRouter {
    routes: Arc<RwLock<Vec<RouteEntry>>>,
}

impl SharedRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route
    ///
    /// Fails with [`Error::RouteConflict`] if a route with the same pattern and
    /// an overlapping method filter already exists.
    pub fn register(
        &self,
        pattern: RoutePattern,
        methods: MethodFilter,
        kind: RouteKind,
        owner: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<()> {
        let owner = owner.into();
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = routes
            .iter()
            .find(|r| r.info.pattern == pattern && r.info.methods.overlaps(&methods))
        {
            return Err(Error::route_conflict(format!(
                "{} already registered by '{}'",
                pattern, existing.info.owner
            )));
        }

        tracing::debug!(route = %pattern, owner = %owner, ?kind, "Route registered");
        routes.push(RouteEntry {
            info: RouteInfo {
                pattern,
                methods,
                kind,
                owner,
            },
            handler,
        });
        Ok(())
    }

    /// Remove every route registered by `owner`, returning how many were removed
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let before = routes.len();
        routes.retain(|r| r.info.owner != owner);
        let removed = before - routes.len();
        if removed > 0 {
            tracing::debug!(owner = %owner, removed, "Routes removed");
        }
        removed
    }

    /// Check whether a pattern is registered (for any method)
    pub fn contains(&self, pattern: &RoutePattern) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.iter().any(|r| r.info.pattern == *pattern)
    }

    /// Snapshot of all registered routes
    pub fn routes(&self) -> Vec<RouteInfo> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.iter().map(|r| r.info.clone()).collect()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no routes are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch a request through the table
    pub async fn dispatch(&self, request: Request) -> Response {
        let path = request.uri().path().to_string();
        let method = request.method().clone();

        // Resolve under the lock, call the handler outside of it
        let matched = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter()
                .filter(|r| r.info.methods.allows(&method))
                .filter_map(|r| {
                    r.info
                        .pattern
                        .remainder(&path)
                        .map(|rest| (r.info.pattern.specificity(), r, rest.to_string()))
                })
                .max_by_key(|(specificity, _, _)| *specificity)
                .map(|(_, r, rest)| (r.handler.clone(), r.info.pattern.base().to_string(), rest))
        };

        match matched {
            Some((handler, base, rest)) => handler.call(RoutedRequest::new(request, base, rest)).await,
            None => not_found(&method, &path),
        }
    }

    /// Build the axum application serving this table
    pub fn into_axum(self) -> axum::Router {
        axum::Router::new().fallback(dispatch).with_state(self)
    }
}

async fn dispatch(State(router): State<SharedRouter>, request: Request) -> Response {
    router.dispatch(request).await
}

/// CORS policy for the device API
///
/// Any origin and method; requests may carry `Content-Type` and the
/// `device-name` rename header. Preflights are answered by the layer.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("device-name")])
}

/// Plain-text `404` in the shape `Cannot GET /path`
pub fn not_found(method: &Method, path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Cannot {} {}", method, path),
    )
        .into_response()
}

/// JSON response with `Content-Type: application/json`
pub fn json_response<T: serde::Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => axum::http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_handler(text: &'static str) -> Arc<dyn RouteHandler> {
        handler_fn(move |req: RoutedRequest| async move {
            format!("{}:{}", text, req.rest).into_response()
        })
    }

    fn request(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_prefix_pattern_normalization() {
        assert_eq!(RoutePattern::prefix("/influx/*"), RoutePattern::Prefix("/influx".into()));
        assert_eq!(RoutePattern::prefix("/influx/"), RoutePattern::Prefix("/influx".into()));
        assert_eq!(RoutePattern::prefix("/influx").to_string(), "/influx/*");
    }

    #[test]
    fn test_prefix_does_not_match_sibling_paths() {
        let pattern = RoutePattern::prefix("/influx");
        assert_eq!(pattern.remainder("/influx/a/b"), Some("/a/b"));
        assert_eq!(pattern.remainder("/influx"), Some(""));
        assert_eq!(pattern.remainder("/influxdb"), None);
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let router = SharedRouter::new();
        router
            .register(RoutePattern::prefix("/a"), MethodFilter::Any, RouteKind::Static, "one", text_handler("one"))
            .unwrap();

        let err = router
            .register(
                RoutePattern::prefix("/a"),
                MethodFilter::Only(Method::GET),
                RouteKind::Dynamic,
                "two",
                text_handler("two"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::RouteConflict(_)));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_distinct_methods_share_a_pattern() {
        let router = SharedRouter::new();
        router
            .register(RoutePattern::exact("/x"), MethodFilter::Only(Method::GET), RouteKind::Static, "p", text_handler("get"))
            .unwrap();
        router
            .register(RoutePattern::exact("/x"), MethodFilter::Only(Method::POST), RouteKind::Static, "p", text_handler("post"))
            .unwrap();
        assert_eq!(router.len(), 2);
        assert_eq!(router.remove_owned_by("p"), 2);
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let router = SharedRouter::new();
        router
            .register(RoutePattern::prefix("/a"), MethodFilter::Any, RouteKind::Static, "p", text_handler("short"))
            .unwrap();
        router
            .register(RoutePattern::prefix("/a/b"), MethodFilter::Any, RouteKind::Dynamic, "p", text_handler("long"))
            .unwrap();

        let response = router.dispatch(request(Method::GET, "/a/b/c")).await;
        assert_eq!(body_text(response).await, "long:/c");

        let response = router.dispatch(request(Method::GET, "/a/x")).await;
        assert_eq!(body_text(response).await, "short:/x");
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let router = SharedRouter::new();
        router
            .register(RoutePattern::exact("/only-get"), MethodFilter::Only(Method::GET), RouteKind::Static, "p", text_handler("x"))
            .unwrap();

        let response = router.dispatch(request(Method::POST, "/only-get")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Cannot POST /only-get");
    }
}
