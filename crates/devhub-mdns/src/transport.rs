// # Multicast Transport
//
// The discovery engine only needs "send to the group" and "receive the next
// datagram from the group". Two implementations:
//
// - `UdpMulticastTransport`: the real mDNS group, 224.0.0.251:5353
// - `MemoryBus` / `MemoryTransport`: an in-process group for tests; every
//   transport on a bus (the sender included) receives every packet, like a
//   multicast socket with loopback enabled

use async_trait::async_trait;
use devhub_core::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::wire::Packet;

/// mDNS IPv4 multicast group
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// mDNS port
pub const MDNS_PORT: u16 = 5353;

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 9000;

/// Datagram transport to a multicast group
#[async_trait]
pub trait MdnsTransport: Send + Sync {
    /// Wait until a datagram can likely be sent without blocking
    async fn writable(&self) -> Result<()>;

    /// Send one datagram to the group without waiting
    ///
    /// Fails with an `io::ErrorKind::WouldBlock` error when the send buffer
    /// is full; callers wait on [`writable`](Self::writable) and retry.
    fn try_send(&self, packet: &[u8]) -> Result<()>;

    /// Wait for the next datagram from the group
    async fn recv(&self) -> Result<Vec<u8>>;
}

/// UDP socket joined to the mDNS group
#[derive(Debug)]
pub struct UdpMulticastTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl UdpMulticastTransport {
    /// Join the mDNS group on the standard port
    pub fn bind() -> Result<Self> {
        Self::bind_on(MDNS_GROUP, MDNS_PORT)
    }

    /// Join `group` on `port`
    ///
    /// The socket shares the port with other responders on the host and
    /// keeps multicast loopback on, so the device hears its own packets.
    pub fn bind_on(group: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        // Some platforms reject a multicast TTL; the default still works
        let _ = socket.set_multicast_ttl_v4(255);
        socket.set_nonblocking(true)?;

        let socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(socket)?;

        tracing::debug!("Joined multicast group {}:{}", group, port);
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, port),
        })
    }
}

#[async_trait]
impl MdnsTransport for UdpMulticastTransport {
    async fn writable(&self) -> Result<()> {
        self.socket.writable().await?;
        Ok(())
    }

    fn try_send(&self, packet: &[u8]) -> Result<()> {
        self.socket.try_send_to(packet, SocketAddr::V4(self.group))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }
}

/// In-process multicast group
#[derive(Debug, Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Attach a new member to the group
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            tx: self.tx.clone(),
            rx: tokio::sync::Mutex::new(self.tx.subscribe()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deliver a datagram to every member, as if sent by an outside host
    pub fn inject(&self, packet: Vec<u8>) {
        // No members is fine
        let _ = self.tx.send(packet);
    }
}

/// Member of a [`MemoryBus`] that records what it sends
#[derive(Debug)]
pub struct MemoryTransport {
    tx: broadcast::Sender<Vec<u8>>,
    rx: tokio::sync::Mutex<broadcast::Receiver<Vec<u8>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    /// Handle on the sent-packet log, usable after the transport is moved
    pub fn sent_log(&self) -> SentLog {
        SentLog {
            sent: self.sent.clone(),
        }
    }
}

#[async_trait]
impl MdnsTransport for MemoryTransport {
    async fn writable(&self) -> Result<()> {
        Ok(())
    }

    fn try_send(&self, packet: &[u8]) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet.to_vec());
        let _ = self.tx.send(packet.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(packet) => return Ok(packet),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Memory transport lagged, {} packets skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::protocol("memory bus closed"));
                }
            }
        }
    }
}

/// Packets sent by one [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct SentLog {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    /// Everything sent so far, decoded
    pub fn packets(&self) -> Vec<Packet> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|bytes| Packet::decode(bytes).ok())
            .collect()
    }

    /// Number of queries sent
    pub fn queries(&self) -> usize {
        self.packets().iter().filter(|p| !p.is_response).count()
    }

    /// Number of responses sent
    pub fn responses(&self) -> usize {
        self.packets().iter().filter(|p| p.is_response).count()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}
