use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use crate::address::Address;
use crate::graph::Graph;
use crate::network::topology::{self, TopologyChange};
use crate::network::{Network, NetworkKind};
use crate::observer::Notification;
use crate::reserved::ReservedAddressing;
use crate::CommId;

/// Default prefix length for networks created on demand.
pub const DEFAULT_NETWORK_MASK: u8 = 24;

const MAX_GENERATION_ATTEMPTS: u32 = 256;

/// The truth registry: which comm holds which address, which network owns
/// which address, and what connectivity really exists.
///
/// Every successful mutation queues a notification; the simulation drains
/// them in invocation order.
#[derive(Debug, Default)]
pub struct NetworkManager {
    comm_addresses: BTreeMap<CommId, Address>,
    address_comms: BTreeMap<Address, CommId>,
    networks: BTreeMap<String, Network>,
    address_networks: BTreeMap<Address, String>,
    multicast: BTreeMap<Address, BTreeSet<Address>>,
    graph: Graph,
    reserved: ReservedAddressing,
    pending: Vec<(f64, Notification)>,
}

impl NetworkManager {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        graph.set_user_modifiable(false);
        Self {
            graph,
            ..Self::default()
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn reserved(&self) -> &ReservedAddressing {
        &self.reserved
    }

    pub fn reserved_mut(&mut self) -> &mut ReservedAddressing {
        &mut self.reserved
    }

    pub fn queue_notification(&mut self, time: f64, notification: Notification) {
        self.pending.push((time, notification));
    }

    pub fn drain_notifications(&mut self) -> Vec<(f64, Notification)> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending_notifications(&self) -> bool {
        !self.pending.is_empty()
    }

    // --- comms -----------------------------------------------------------

    /// Binds `comm` to the next free address of `network`, creating a mesh
    /// network when it does not exist. Returns the null address on failure.
    pub fn add_comm(&mut self, time: f64, comm: CommId, comm_name: &str, network: Option<&str>) -> Address {
        if self.comm_addresses.contains_key(&comm) {
            warn!("{} already holds address {}", comm, self.comm_addresses[&comm]);
            return Address::NULL;
        }

        let network_name = match network {
            Some(name) => name.to_string(),
            None => self.next_network_name(comm_name),
        };

        if !self.networks.contains_key(&network_name)
            && !self.add_network(time, &network_name, Address::NULL, NetworkKind::Mesh, false)
        {
            warn!("Could not create network {} for {}", network_name, comm_name);
            return Address::NULL;
        }

        let Some(address) = self.next_free_address(&network_name) else {
            warn!("Address space of network {} is exhausted", network_name);
            return Address::NULL;
        };

        if self.bind(time, comm, address, &network_name) {
            address
        } else {
            Address::NULL
        }
    }

    /// Binds `comm` to an explicit address. Returns the owning network name.
    pub fn add_comm_with_address(
        &mut self,
        time: f64,
        comm: CommId,
        comm_name: &str,
        address: Address,
    ) -> Option<String> {
        if address.is_null() {
            warn!("Refusing null address for {}", comm_name);
            return None;
        }
        if self.comm_addresses.contains_key(&comm) || self.address_comms.contains_key(&address) {
            warn!("Address {} or {} is already bound", address, comm_name);
            return None;
        }
        if self.reserved.is_reserved(&address) {
            warn!("Address {} for {} is reserved", address, comm_name);
            return None;
        }

        let existing = self
            .networks
            .values()
            .find(|network| {
                network.address().mask() == address.mask() && network.contains(&address)
            })
            .map(|network| network.name().to_string());

        let network_name = match existing {
            Some(name) => name,
            None => {
                let name = self.next_network_name(comm_name);
                if !self.add_network(time, &name, address.routing_prefix(), NetworkKind::Mesh, false) {
                    return None;
                }
                name
            }
        };

        if self.bind(time, comm, address, &network_name) {
            Some(network_name)
        } else {
            None
        }
    }

    fn bind(&mut self, time: f64, comm: CommId, address: Address, network_name: &str) -> bool {
        let Some(network) = self.networks.get_mut(network_name) else {
            return false;
        };
        let members = network.members().to_vec();
        let kind = network.kind().clone();
        if !network.add_member(address) {
            warn!("Network {} refused member {}", network_name, address);
            return false;
        }

        self.comm_addresses.insert(comm, address);
        self.address_comms.insert(address, comm);
        self.address_networks.insert(address, network_name.to_string());
        self.graph.create_node(address);

        debug!("{} bound to {} in {}", comm, address, network_name);
        self.queue_notification(
            time,
            Notification::CommAdded {
                comm,
                address,
                network: network_name.to_string(),
            },
        );

        let change = topology::on_join(&kind, &members, address);
        self.apply_topology(time, change);
        true
    }

    pub fn remove_comm(&mut self, time: f64, comm: CommId) -> bool {
        let Some(address) = self.comm_addresses.get(&comm).copied() else {
            return false;
        };

        for (source, destination) in self.graph.remove_node_edges(&address) {
            self.queue_notification(time, Notification::ConnectionRemoved { source, destination });
        }
        self.graph.remove_node(&address);

        if let Some(name) = self.address_networks.remove(&address) {
            if let Some(network) = self.networks.get_mut(&name) {
                let members = network.members().to_vec();
                let kind = network.kind().clone();
                network.remove_member(&address);
                self.apply_topology(time, topology::on_leave(&kind, &members, address));
            }
        }

        let groups: Vec<Address> = self
            .multicast
            .iter()
            .filter(|(_, members)| members.contains(&address))
            .map(|(group, _)| *group)
            .collect();
        for group in groups {
            self.remove_multicast_member(time, group, address);
        }

        self.comm_addresses.remove(&comm);
        self.address_comms.remove(&address);
        self.queue_notification(time, Notification::CommRemoved { comm, address });
        true
    }

    pub fn enable_comm(&mut self, time: f64, comm: CommId) -> bool {
        self.set_comm_enabled(time, comm, true)
    }

    pub fn disable_comm(&mut self, time: f64, comm: CommId) -> bool {
        self.set_comm_enabled(time, comm, false)
    }

    fn set_comm_enabled(&mut self, time: f64, comm: CommId, enabled: bool) -> bool {
        let Some(address) = self.comm_addresses.get(&comm).copied() else {
            return false;
        };
        let changed = self
            .graph
            .find_node(&address)
            .is_some_and(|node| node.enabled != enabled);
        if changed {
            if enabled {
                self.graph.enable_node(&address);
                self.queue_notification(time, Notification::CommEnabled { comm, address });
            } else {
                self.graph.disable_node(&address);
                self.queue_notification(time, Notification::CommDisabled { comm, address });
            }
        }
        true
    }

    // --- networks --------------------------------------------------------

    pub fn add_network(
        &mut self,
        time: f64,
        name: &str,
        address: Address,
        kind: NetworkKind,
        suppress_reserved_check: bool,
    ) -> bool {
        if self.networks.contains_key(name) {
            warn!("Network {} already exists", name);
            return false;
        }

        let address = if address.is_null() {
            match self.generate_network_address(name, DEFAULT_NETWORK_MASK) {
                Some(address) => address,
                None => {
                    warn!("Could not generate an address for network {}", name);
                    return false;
                }
            }
        } else {
            address.routing_prefix()
        };

        if !suppress_reserved_check
            && (self.is_network_managed(&address) || self.reserved.is_network_reserved(&address))
        {
            warn!("Network {} at {} collides with a managed or reserved subnet", name, address);
            return false;
        }

        info!("Network {} created at {}", name, address);
        self.networks
            .insert(name.to_string(), Network::new(name, address, kind));
        self.queue_notification(
            time,
            Notification::NetworkAdded {
                name: name.to_string(),
                address,
            },
        );
        true
    }

    /// Notifies, then removes every member comm.
    pub fn remove_network(&mut self, time: f64, name: &str) -> bool {
        let Some(network) = self.networks.get(name) else {
            return false;
        };
        let address = network.address();
        let members = network.members().to_vec();

        self.queue_notification(
            time,
            Notification::NetworkRemoved {
                name: name.to_string(),
                address,
            },
        );
        for member in members {
            if let Some(comm) = self.address_comms.get(&member).copied() {
                self.remove_comm(time, comm);
            }
        }
        self.networks.remove(name);
        true
    }

    /// Erases every truth connection between two members of the network.
    pub fn remove_network_connections(&mut self, time: f64, name: &str) -> bool {
        let Some(network) = self.networks.get(name) else {
            return false;
        };
        let members: BTreeSet<Address> = network.members().iter().copied().collect();
        let pairs: Vec<(Address, Address)> = self
            .graph
            .edges()
            .filter(|edge| members.contains(&edge.source) && members.contains(&edge.destination))
            .map(|edge| (edge.source, edge.destination))
            .collect();
        for (source, destination) in pairs {
            self.remove_connection(time, source, destination);
        }
        true
    }

    fn next_network_name(&self, comm_name: &str) -> String {
        let mut index = 1;
        loop {
            let name = format!("{}.{}", comm_name, index);
            if !self.networks.contains_key(&name) {
                return name;
            }
            index += 1;
        }
    }

    fn generate_network_address(&self, name: &str, mask: u8) -> Option<Address> {
        (0..MAX_GENERATION_ATTEMPTS)
            .map(|salt| {
                if salt == 0 {
                    Address::generate(name, mask)
                } else {
                    Address::generate(&format!("{}#{}", name, salt), mask)
                }
            })
            .find(|candidate| {
                !candidate.is_null()
                    && !self.is_network_managed(candidate)
                    && !self.reserved.is_network_reserved(candidate)
            })
    }

    fn next_free_address(&self, network_name: &str) -> Option<Address> {
        let network = self.networks.get(network_name)?;
        let prefix = network.address();
        let broadcast = prefix.broadcast();
        let mut candidate = prefix.increment();

        for _ in 0..prefix.host_count() {
            if candidate.routing_prefix() != prefix {
                return None;
            }
            if candidate != broadcast
                && !self.address_comms.contains_key(&candidate)
                && !self.reserved.is_reserved(&candidate)
            {
                return Some(candidate);
            }
            candidate = candidate.increment();
        }
        None
    }

    // --- connections -----------------------------------------------------

    pub fn add_connection(&mut self, time: f64, source: Address, destination: Address) -> bool {
        if !self.graph.contains_node(&source) || !self.graph.contains_node(&destination) {
            debug!("Cannot connect unmanaged {} -> {}", source, destination);
            return false;
        }
        if source == destination || self.graph.find_edge(&source, &destination).is_some() {
            return true;
        }
        self.graph.insert_edge(source, destination, false);
        self.queue_notification(time, Notification::ConnectionAdded { source, destination });
        true
    }

    pub fn remove_connection(&mut self, time: f64, source: Address, destination: Address) -> bool {
        let mut found = false;
        while self.graph.erase_edge(&source, &destination) {
            found = true;
        }
        if found {
            self.queue_notification(time, Notification::ConnectionRemoved { source, destination });
        }
        found
    }

    pub fn enable_connection(&mut self, time: f64, source: Address, destination: Address) -> bool {
        self.set_connection_enabled(time, source, destination, true)
    }

    pub fn disable_connection(&mut self, time: f64, source: Address, destination: Address) -> bool {
        self.set_connection_enabled(time, source, destination, false)
    }

    fn set_connection_enabled(
        &mut self,
        time: f64,
        source: Address,
        destination: Address,
        enabled: bool,
    ) -> bool {
        let Some(edge) = self.graph.find_edge(&source, &destination) else {
            return false;
        };
        if edge.enabled == enabled {
            return true;
        }
        if enabled {
            self.graph.enable_edge(&source, &destination);
            self.queue_notification(time, Notification::ConnectionEnabled { source, destination });
        } else {
            self.graph.disable_edge(&source, &destination);
            self.queue_notification(time, Notification::ConnectionDisabled { source, destination });
        }
        true
    }

    fn comm_pair(&self, source: CommId, destination: CommId) -> Option<(Address, Address)> {
        Some((self.address_of(source)?, self.address_of(destination)?))
    }

    pub fn add_connection_between(&mut self, time: f64, source: CommId, destination: CommId) -> bool {
        self.comm_pair(source, destination)
            .is_some_and(|(s, d)| self.add_connection(time, s, d))
    }

    pub fn remove_connection_between(&mut self, time: f64, source: CommId, destination: CommId) -> bool {
        self.comm_pair(source, destination)
            .is_some_and(|(s, d)| self.remove_connection(time, s, d))
    }

    pub fn enable_connection_between(&mut self, time: f64, source: CommId, destination: CommId) -> bool {
        self.comm_pair(source, destination)
            .is_some_and(|(s, d)| self.enable_connection(time, s, d))
    }

    pub fn disable_connection_between(&mut self, time: f64, source: CommId, destination: CommId) -> bool {
        self.comm_pair(source, destination)
            .is_some_and(|(s, d)| self.disable_connection(time, s, d))
    }

    fn apply_topology(&mut self, time: f64, change: TopologyChange) {
        for (source, destination) in change.remove {
            self.remove_connection(time, source, destination);
        }
        for (source, destination) in change.add {
            self.add_connection(time, source, destination);
        }
    }

    /// Records an explicit directed link of a network and creates it in the
    /// truth graph. Unknown endpoints are skipped.
    pub fn add_network_link(&mut self, time: f64, name: &str, source: Address, destination: Address) -> bool {
        if !self.is_address_managed(&source) || !self.is_address_managed(&destination) {
            warn!("Skipping link {} -> {} in {}: unknown member", source, destination, name);
            return false;
        }
        match self.networks.get_mut(name) {
            Some(network) => {
                network.add_link(source, destination);
            }
            None => {
                warn!("Skipping link {} -> {}: unknown network {}", source, destination, name);
                return false;
            }
        }
        self.add_connection(time, source, destination)
    }

    // --- multicast -------------------------------------------------------

    pub fn add_multicast_member(&mut self, time: f64, group: Address, member: Address) -> bool {
        if group.is_null() || member.is_null() {
            return false;
        }
        if !self.multicast.entry(group).or_default().insert(member) {
            return false;
        }
        debug!("{} joined multicast group {}", member, group);
        self.queue_notification(time, Notification::MulticastMemberAdded { group, member });
        true
    }

    pub fn remove_multicast_member(&mut self, time: f64, group: Address, member: Address) -> bool {
        if group.is_null() || member.is_null() {
            return false;
        }
        let Some(members) = self.multicast.get_mut(&group) else {
            return false;
        };
        if !members.remove(&member) {
            return false;
        }
        if members.is_empty() {
            self.multicast.remove(&group);
        }
        self.queue_notification(time, Notification::MulticastMemberRemoved { group, member });
        true
    }

    pub fn multicast_members(&self, group: &Address) -> Vec<Address> {
        self.multicast
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn multicast_members_in_network(&self, group: &Address, network: &str) -> Vec<Address> {
        self.multicast_members(group)
            .into_iter()
            .filter(|member| self.address_networks.get(member).is_some_and(|name| name == network))
            .collect()
    }

    pub fn has_multicast_member(&self, group: &Address, member: &Address) -> bool {
        self.multicast
            .get(group)
            .is_some_and(|members| members.contains(member))
    }

    pub fn is_multicast_managed(&self, group: &Address) -> bool {
        self.multicast.contains_key(group)
    }

    // --- queries ---------------------------------------------------------

    /// Reachability on the truth graph, ignoring weights.
    pub fn path_exists(&self, source: &Address, destination: &Address) -> bool {
        self.graph.find_any_path(source, destination).is_some()
    }

    pub fn address_of(&self, comm: CommId) -> Option<Address> {
        self.comm_addresses.get(&comm).copied()
    }

    pub fn comm_at(&self, address: &Address) -> Option<CommId> {
        self.address_comms.get(address).copied()
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    pub fn network_of(&self, address: &Address) -> Option<&Network> {
        self.address_networks
            .get(address)
            .and_then(|name| self.networks.get(name))
    }

    pub fn is_address_managed(&self, address: &Address) -> bool {
        self.address_comms.contains_key(address)
    }

    /// True when the subnet overlaps any managed network.
    pub fn is_network_managed(&self, address: &Address) -> bool {
        self.networks
            .values()
            .any(|network| network.address().overlaps(address))
    }

    pub fn addresses_in_network(&self, name: &str) -> Vec<Address> {
        self.networks
            .get(name)
            .map(|network| network.members().to_vec())
            .unwrap_or_default()
    }

    /// Routing prefix of the network owning `address`.
    pub fn managing_network_address(&self, address: &Address) -> Option<Address> {
        self.network_of(address).map(Network::address)
    }

    pub fn managed_networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    pub fn comms(&self) -> impl Iterator<Item = (CommId, Address)> + '_ {
        self.comm_addresses.iter().map(|(comm, address)| (*comm, *address))
    }

    /// Members of every network sharing `address`'s broadcast address,
    /// `address` itself excluded.
    pub fn link_local_peers(&self, address: &Address) -> Vec<Address> {
        let Some(own) = self.network_of(address) else {
            return Vec::new();
        };
        let broadcast = own.broadcast();
        let mut peers: Vec<Address> = self
            .networks
            .values()
            .filter(|network| network.broadcast() == broadcast)
            .flat_map(|network| network.members().iter().copied())
            .filter(|member| member != address)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    fn kinds(manager: &mut NetworkManager) -> Vec<&'static str> {
        manager
            .drain_notifications()
            .iter()
            .map(|(_, notification)| notification.kind_name())
            .collect()
    }

    #[test]
    fn add_comm_allocates_sequential_hosts() {
        let mut manager = NetworkManager::new();
        assert!(manager.add_network(0.0, "lan", addr("10.1.0.0/24"), NetworkKind::Mesh, false));

        let first = manager.add_comm(0.0, CommId(1), "alpha", Some("lan"));
        let second = manager.add_comm(0.0, CommId(2), "bravo", Some("lan"));
        assert_eq!(first.address_string(), "10.1.0.1");
        assert_eq!(second.address_string(), "10.1.0.2");
        assert_eq!(first.mask(), 24);

        // mesh links both ways
        assert!(manager.graph().find_edge(&first, &second).is_some());
        assert!(manager.graph().find_edge(&second, &first).is_some());
    }

    #[test]
    fn address_and_comm_lookups_are_inverse() {
        let mut manager = NetworkManager::new();
        for index in 0..5 {
            manager.add_comm(0.0, CommId(index), &format!("comm{}", index), None);
        }
        for (comm, address) in manager.comms().collect::<Vec<_>>() {
            assert_eq!(manager.comm_at(&address), Some(comm));
            assert_eq!(manager.address_of(comm), Some(address));
        }
        assert!(manager.network("comm0.1").is_some());
    }

    #[test]
    fn reserved_collisions_are_refused() {
        let mut manager = NetworkManager::new();
        assert!(!manager.add_network(0.0, "loop", addr("127.0.0.0/24"), NetworkKind::Mesh, false));
        assert!(manager.add_network(0.0, "forced", addr("127.0.0.0/24"), NetworkKind::Mesh, true));
        assert!(manager
            .add_comm_with_address(0.0, CommId(1), "x", addr("224.0.0.5"))
            .is_none());
        assert!(manager
            .add_comm_with_address(0.0, CommId(1), "x", Address::NULL)
            .is_none());
    }

    #[test]
    fn explicit_address_joins_matching_network() {
        let mut manager = NetworkManager::new();
        manager.add_network(0.0, "lan", addr("10.2.0.0/24"), NetworkKind::Mesh, false);
        let joined = manager.add_comm_with_address(0.0, CommId(1), "a", addr("10.2.0.9/24"));
        assert_eq!(joined.as_deref(), Some("lan"));

        let created = manager.add_comm_with_address(0.0, CommId(2), "b", addr("10.3.0.9/24"));
        assert_eq!(created.as_deref(), Some("b.1"));
        assert!(manager
            .add_comm_with_address(0.0, CommId(3), "c", addr("10.2.0.9/24"))
            .is_none());
    }

    #[test]
    fn remove_network_cascades_to_members() {
        let mut manager = NetworkManager::new();
        manager.add_network(0.0, "lan", addr("10.4.0.0/24"), NetworkKind::Mesh, false);
        let a = manager.add_comm(0.0, CommId(1), "a", Some("lan"));
        let b = manager.add_comm(0.0, CommId(2), "b", Some("lan"));
        manager.add_multicast_member(0.0, addr("224.1.1.1"), a);

        assert!(manager.remove_network(1.0, "lan"));
        assert!(!manager.is_address_managed(&a));
        assert!(!manager.is_address_managed(&b));
        assert!(!manager.is_multicast_managed(&addr("224.1.1.1")));
        assert_eq!(manager.graph().edge_count(), 0);
        assert!(manager.network("lan").is_none());
    }

    #[test]
    fn disable_comm_is_idempotent() {
        let mut manager = NetworkManager::new();
        manager.add_comm(0.0, CommId(1), "a", None);
        manager.drain_notifications();

        assert!(manager.disable_comm(1.0, CommId(1)));
        assert!(manager.disable_comm(1.0, CommId(1)));
        assert_eq!(kinds(&mut manager), vec!["CommDisabled"]);
        assert!(!manager.disable_comm(1.0, CommId(9)));
    }

    #[test]
    fn self_links_and_duplicates_succeed_quietly() {
        let mut manager = NetworkManager::new();
        manager.add_network(0.0, "g", addr("10.5.0.0/24"), NetworkKind::Generic, false);
        let a = manager.add_comm(0.0, CommId(1), "a", Some("g"));
        let b = manager.add_comm(0.0, CommId(2), "b", Some("g"));
        manager.drain_notifications();

        assert!(manager.add_connection(0.0, a, a));
        assert!(manager.add_connection(0.0, a, b));
        assert!(manager.add_connection(0.0, a, b));
        assert_eq!(kinds(&mut manager), vec!["ConnectionAdded"]);
        assert!(manager.path_exists(&a, &b));
        assert!(!manager.path_exists(&b, &a));
    }

    #[test]
    fn multicast_membership_rejects_duplicates() {
        let mut manager = NetworkManager::new();
        let group = addr("224.2.2.2");
        let member = manager.add_comm(0.0, CommId(1), "a", None);
        assert!(manager.add_multicast_member(0.0, group, member));
        assert!(!manager.add_multicast_member(0.0, group, member));
        assert!(!manager.add_multicast_member(0.0, group, Address::NULL));
        assert_eq!(manager.multicast_members_in_network(&group, "a.1"), vec![member]);
        assert!(manager.remove_multicast_member(0.0, group, member));
        assert!(!manager.remove_multicast_member(0.0, group, member));
    }
}
