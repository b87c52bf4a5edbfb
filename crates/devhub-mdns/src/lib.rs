// # devhub-mdns
//
// Peer discovery for the DevHub device web service.
//
// Devices find each other by multicast: each one periodically queries the
// group and every device answers with its HTTP/HTTPS service records and its
// IPv4 addresses. Every newly seen address is added to the neighbour table
// and exposed through the proxy under `/<ip>/<port>/*`.
//
// ## Modules
//
// - `wire`: DNS message codec
// - `protocol`: fixed packet layout shared with other devices
// - `transport`: UDP multicast socket and an in-memory bus
// - `interfaces`: local address enumeration
// - `neighbours`: neighbour table
// - `plugin`: the discovery plugin tying it together

pub mod interfaces;
pub mod neighbours;
pub mod plugin;
pub mod protocol;
pub mod transport;
pub mod wire;

pub use neighbours::{Address, Neighbour, NeighbourTable};
pub use plugin::{DiscoveryFactory, DiscoveryPlugin, DiscoveryStats, DiscoveryTimer, register};
pub use protocol::ServicePorts;
pub use transport::{MdnsTransport, MemoryBus, MemoryTransport, SentLog, UdpMulticastTransport};
pub use wire::{Packet, WireError};
