//! Proxy route bookkeeping and registration
//!
//! The dispatcher turns proxy targets into routes on the shared router:
//!
//! - **Static**: a fixed prefix forwarded to a fixed origin (`/influx/*`)
//! - **Peer**: `/<ip>/<port>/*` per discovered peer, forwarded to
//!   `http://<ip>:<port>/*`
//!
//! Clones share the same route list, so the discovery and database plugins
//! can hold their own handle.

use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use devhub_core::router::{handler_fn, not_found};
use devhub_core::{Error, MethodFilter, Result, RouteKind, RoutePattern, SharedRouter};
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use url::Url;

use crate::forwarder::Forwarder;
use crate::peer_path::PeerPath;

/// An active proxy route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Route base on the shared router
    pub path_prefix: String,
    /// Origin requests are forwarded to
    pub target_origin: Url,
    /// `true` for fixed routes, `false` for per-peer routes
    pub is_static: bool,
}

struct Entry {
    owner: String,
    route: ProxyRoute,
}

/// Registers and tracks proxy routes
#[derive(Clone)]
pub struct ProxyDispatcher {
    peer_forwarder: Arc<Forwarder>,
    routes: Arc<Mutex<Vec<Entry>>>,
}

impl ProxyDispatcher {
    /// Create a dispatcher forwarding peer traffic through `peer_forwarder`
    pub fn new(peer_forwarder: Forwarder) -> Self {
        Self {
            peer_forwarder: Arc::new(peer_forwarder),
            routes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Forward every request under `prefix` to `origin`
    ///
    /// The remainder of the path and the query string are appended to the
    /// origin: `/influx/target?x=1` -> `https://localhost:8086/target?x=1`.
    pub fn register_static(
        &self,
        router: &SharedRouter,
        prefix: &str,
        origin: Url,
        forwarder: Arc<Forwarder>,
        owner: &str,
    ) -> Result<()> {
        if !matches!(origin.scheme(), "http" | "https") || origin.host().is_none() {
            return Err(Error::invalid_input(format!("Not an HTTP origin: {}", origin)));
        }

        let pattern = RoutePattern::prefix(prefix);
        let base = origin.origin().ascii_serialization();
        let handler_base = base.clone();

        router.register(
            pattern.clone(),
            MethodFilter::Any,
            RouteKind::Static,
            owner,
            handler_fn(move |req| {
                let forwarder = forwarder.clone();
                let target = Url::parse(&format!("{}{}", handler_base, req.rest_with_query()));
                async move {
                    match target {
                        Ok(target) => forwarder.forward(req.request, target).await,
                        Err(_) => (StatusCode::BAD_REQUEST, "Bad request path").into_response(),
                    }
                }
            }),
        )?;

        info!("Proxying {} to {}", pattern, base);
        self.push(owner, pattern.base(), origin, true);
        Ok(())
    }

    /// Expose a discovered peer under its encoded path
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Route registered
    /// - `Ok(false)`: The peer already has a route
    pub fn register_peer(
        &self,
        router: &SharedRouter,
        addr: SocketAddrV4,
        is_self: bool,
        owner: &str,
    ) -> Result<bool> {
        let path = PeerPath::encode(addr);
        let pattern = RoutePattern::prefix(path.as_str());
        if router.contains(&pattern) {
            debug!("Peer {} already routed", addr);
            return Ok(false);
        }

        let forwarder = self.peer_forwarder.clone();
        let registered = router.register(
            pattern,
            MethodFilter::Any,
            RouteKind::Dynamic,
            owner,
            handler_fn(move |req| {
                let forwarder = forwarder.clone();
                async move {
                    match peer_target(req.request.uri()) {
                        Some(target) => forwarder.forward(req.request, target).await,
                        None => not_found(req.request.method(), req.request.uri().path()),
                    }
                }
            }),
        );

        match registered {
            Ok(()) => {}
            // Lost a race with a concurrent registration of the same peer
            Err(Error::RouteConflict(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        let origin = Url::parse(&format!("http://{}", addr))
            .map_err(|e| Error::invalid_input(format!("Bad peer address {}: {}", addr, e)))?;
        info!(is_self, "Proxying {}/* to {}", path, addr);
        self.push(owner, &path, origin, false);
        Ok(true)
    }

    /// Forget every route registered by `owner` and remove it from `router`
    pub fn remove_owned_by(&self, router: &SharedRouter, owner: &str) -> usize {
        self.lock().retain(|e| e.owner != owner);
        router.remove_owned_by(owner)
    }

    /// Snapshot of active proxy routes
    pub fn routes(&self) -> Vec<ProxyRoute> {
        self.lock().iter().map(|e| e.route.clone()).collect()
    }

    fn push(&self, owner: &str, path_prefix: &str, target_origin: Url, is_static: bool) {
        self.lock().push(Entry {
            owner: owner.to_string(),
            route: ProxyRoute {
                path_prefix: path_prefix.to_string(),
                target_origin,
                is_static,
            },
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Target URL for a request on a peer route
///
/// Decodes the peer address from the path itself, so the target never
/// depends on anything but the request.
pub fn peer_target(uri: &Uri) -> Option<Url> {
    let (addr, rest) = PeerPath::decode(uri.path())?;
    let rest = if rest.is_empty() { "/" } else { rest };
    let target = match uri.query() {
        Some(q) => format!("http://{}{}?{}", addr, rest, q),
        None => format!("http://{}{}", addr, rest),
    };
    Url::parse(&target).ok()
}
