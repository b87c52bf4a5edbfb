// # devhub-proxy
//
// Reverse proxy routes for the DevHub device web service.
//
// ## Components
//
// - **Forwarder**: forwards one HTTP request to a target origin over reqwest
// - **PeerPath**: bijective `ip:port` <-> `/ip/port` path encoding
// - **ProxyDispatcher**: registers static and per-peer proxy routes on the
//   shared router and keeps the list of active proxy routes
// - **InfluxPlugin**: proxies `/influx/*` to the co-located database
//
// ## Failure Handling
//
// Transport failures never propagate: the client receives a `502`/`504`
// and the log line names the target origin only (no bodies, no paths).

pub mod dispatcher;
pub mod forwarder;
pub mod influx;
pub mod peer_path;

pub use dispatcher::{ProxyDispatcher, ProxyRoute};
pub use forwarder::Forwarder;
pub use influx::{InfluxFactory, InfluxPlugin, register};
pub use peer_path::PeerPath;
