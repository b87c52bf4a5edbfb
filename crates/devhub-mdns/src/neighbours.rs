//! Neighbour table
//!
//! Peers are grouped by announced device name. An address is identified by
//! `(ip, port, is_self)`; seeing it again is a no-op, whatever name it comes
//! with. Entries live as long as the table: there is no eviction, and
//! `firstSeen` makes stale entries visible to the dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::Ipv4Addr;

/// One announced address of a neighbour
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Announced by this device
    pub is_self: bool,
    pub first_seen: DateTime<Utc>,
}

/// A discovered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbour {
    pub name: String,
    pub addresses: Vec<Address>,
}

/// Every device discovered so far
///
/// Serializes as a JSON array of neighbours. Addresses of this device sort
/// after foreign ones, and a neighbour made only of our own addresses sorts
/// after every other neighbour.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct NeighbourTable {
    neighbours: Vec<Neighbour>,
}

impl NeighbourTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an address, returning `false` if it was already known
    pub fn insert(&mut self, name: &str, ip: Ipv4Addr, port: u16, is_self: bool) -> bool {
        if self.contains(ip, port, is_self) {
            return false;
        }

        let address = Address {
            ip,
            port,
            is_self,
            first_seen: Utc::now(),
        };

        match self.neighbours.iter_mut().find(|n| n.name == name) {
            Some(neighbour) => {
                neighbour.addresses.push(address);
                neighbour.addresses.sort_by_key(|a| a.is_self);
            }
            None => self.neighbours.push(Neighbour {
                name: name.to_string(),
                addresses: vec![address],
            }),
        }

        self.neighbours
            .sort_by_key(|n| n.addresses.iter().all(|a| a.is_self));
        true
    }

    /// Whether the address is already recorded
    pub fn contains(&self, ip: Ipv4Addr, port: u16, is_self: bool) -> bool {
        self.addresses()
            .any(|a| a.ip == ip && a.port == port && a.is_self == is_self)
    }

    /// All recorded addresses
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.neighbours.iter().flat_map(|n| n.addresses.iter())
    }

    pub fn neighbours(&self) -> &[Neighbour] {
        &self.neighbours
    }

    /// Number of neighbours (not addresses)
    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    /// Forget every neighbour
    pub fn clear(&mut self) {
        self.neighbours.clear();
    }
}
