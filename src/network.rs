pub mod manager;
pub mod topology;

use serde::{Deserialize, Serialize};

use crate::address::Address;

pub use manager::NetworkManager;

/// How truth connections are generated when members join or leave.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkKind {
    #[default]
    Mesh,
    Star {
        hub: Address,
    },
    Ring,
    PointToPoint,
    Generic,
}

/// A named grouping of addresses sharing a subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    name: String,
    address: Address,
    kind: NetworkKind,
    members: Vec<Address>,
    links: Vec<(Address, Address)>,
}

impl Network {
    pub fn new(name: impl Into<String>, address: Address, kind: NetworkKind) -> Self {
        Self {
            name: name.into(),
            address: address.routing_prefix(),
            kind,
            members: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn broadcast(&self) -> Address {
        self.address.broadcast()
    }

    pub fn kind(&self) -> &NetworkKind {
        &self.kind
    }

    /// Members in join order.
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn links(&self) -> &[(Address, Address)] {
        &self.links
    }

    pub fn has_member(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.address.contains(address)
    }

    pub fn add_member(&mut self, address: Address) -> bool {
        if self.members.contains(&address) {
            return false;
        }
        if self.kind == NetworkKind::PointToPoint && self.members.len() >= 2 {
            return false;
        }
        self.members.push(address);
        true
    }

    pub fn remove_member(&mut self, address: &Address) -> bool {
        let before = self.members.len();
        self.members.retain(|member| member != address);
        self.links
            .retain(|(source, destination)| source != address && destination != address);
        before != self.members.len()
    }

    pub fn add_link(&mut self, source: Address, destination: Address) -> bool {
        if self.links.contains(&(source, destination)) {
            return false;
        }
        self.links.push((source, destination));
        true
    }

    pub fn remove_link(&mut self, source: &Address, destination: &Address) -> bool {
        let before = self.links.len();
        self.links
            .retain(|(s, d)| !(s == source && d == destination));
        before != self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn membership_dedupes() {
        let mut network = Network::new("lan", addr("10.0.0.7/24"), NetworkKind::Mesh);
        assert_eq!(network.address().address_string(), "10.0.0.0");
        assert!(network.add_member(addr("10.0.0.1")));
        assert!(!network.add_member(addr("10.0.0.1")));
        assert!(network.add_link(addr("10.0.0.1"), addr("10.0.0.2")));
        assert!(!network.add_link(addr("10.0.0.1"), addr("10.0.0.2")));

        assert!(network.remove_member(&addr("10.0.0.1")));
        assert!(network.links().is_empty());
        assert!(!network.remove_member(&addr("10.0.0.1")));
    }

    #[test]
    fn point_to_point_caps_membership() {
        let mut network = Network::new("p2p", addr("10.0.1.0/30"), NetworkKind::PointToPoint);
        assert!(network.add_member(addr("10.0.1.1")));
        assert!(network.add_member(addr("10.0.1.2")));
        assert!(!network.add_member(addr("10.0.1.3")));
    }

    #[test]
    fn kind_uses_tagged_json() {
        let kind: NetworkKind = serde_json::from_str(r#"{"type":"star","hub":"10.0.0.1"}"#).unwrap();
        assert_eq!(kind, NetworkKind::Star { hub: addr("10.0.0.1") });
        let mesh: NetworkKind = serde_json::from_str(r#"{"type":"mesh"}"#).unwrap();
        assert_eq!(mesh, NetworkKind::Mesh);
    }
}
