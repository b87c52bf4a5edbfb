//! Discovery packet layout
//!
//! The positions below are shared with every other device speaking this
//! protocol and must not change:
//!
//! ```text
//! query:     questions[0] = DCA / SRV
//! response:  answers[0]   = SRV https-my-service (port = HTTPS port)
//!            answers[1]   = SRV http-my-service  (port = HTTP port, authoritative)
//!            answers[2..] = A <deviceName>.local, one per local IPv4 address
//! ```
//!
//! Decoding reads `answers[0]` only to check the service name, the port from
//! `answers[1]` and the address from `answers[2]`; further A records are
//! ignored.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::wire::{CLASS_IN, Packet, Question, Record, RecordData, TYPE_SRV};

pub const HTTP_SERVICE_NAME: &str = "http-my-service";
pub const HTTPS_SERVICE_NAME: &str = "https-my-service";
pub const MDNS_DOMAIN: &str = ".local";
pub const QUERY_NAME: &str = "DCA";

const SRV_WEIGHT: u16 = 0;
const SRV_PRIORITY: u16 = 10;
const RECORD_TTL: u32 = 120;

/// Ports this device serves HTTP and HTTPS on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePorts {
    pub http: u16,
    pub https: u16,
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self { http: 80, https: 443 }
    }
}

/// What a valid response announces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Device name with the `.local` suffix removed
    pub name: String,
    /// Address from `answers[2]`, port from `answers[1]`
    pub addr: SocketAddrV4,
    /// Port of `answers[0]`, the HTTPS service of the sender
    pub advertised_port: u16,
}

/// A section is valid when its first record is present and is SRV
pub fn is_valid_section(types: impl IntoIterator<Item = u16>) -> bool {
    types.into_iter().next() == Some(TYPE_SRV)
}

/// Whether `packet` is a discovery query we should answer
pub fn is_valid_query(packet: &Packet) -> bool {
    !packet.is_response && is_valid_section(packet.questions.iter().map(|q| q.qtype))
}

/// The periodic discovery query
pub fn build_query() -> Packet {
    Packet::query(vec![Question {
        name: QUERY_NAME.to_string(),
        qtype: TYPE_SRV,
        qclass: CLASS_IN,
    }])
}

/// Response advertising both services and every local address
pub fn build_response(ports: ServicePorts, device_name: &str, addrs: &[Ipv4Addr]) -> Packet {
    let mut answers = vec![
        service_record(HTTPS_SERVICE_NAME, ports.https),
        service_record(HTTP_SERVICE_NAME, ports.http),
    ];

    let host = format!("{}{}", device_name, MDNS_DOMAIN);
    answers.extend(addrs.iter().map(|ip| Record {
        name: host.clone(),
        class: CLASS_IN,
        ttl: RECORD_TTL,
        data: RecordData::A(*ip),
    }));

    Packet::response(answers)
}

fn service_record(name: &str, port: u16) -> Record {
    Record {
        name: name.to_string(),
        class: CLASS_IN,
        ttl: RECORD_TTL,
        data: RecordData::Srv {
            priority: SRV_PRIORITY,
            weight: SRV_WEIGHT,
            port,
            target: format!("{}{}", name, MDNS_DOMAIN),
        },
    }
}

/// Extract the announcement from a response, `None` if it is not one of ours
pub fn decode_response(packet: &Packet) -> Option<Announcement> {
    if !packet.is_response || !is_valid_section(packet.answers.iter().map(Record::rtype)) {
        return None;
    }

    let service = &packet.answers[0];
    if service.name != HTTP_SERVICE_NAME && service.name != HTTPS_SERVICE_NAME {
        return None;
    }
    let advertised_port = service.srv_port()?;

    let port = packet.answers.get(1)?.srv_port()?;
    let host = packet.answers.get(2)?;
    let ip = host.a_addr()?;

    let name = host
        .name
        .strip_suffix(MDNS_DOMAIN)
        .unwrap_or(&host.name)
        .to_string();

    Some(Announcement {
        name,
        addr: SocketAddrV4::new(ip, port),
        advertised_port,
    })
}
