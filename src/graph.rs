use std::collections::{BTreeMap, BTreeSet};

use crate::address::Address;
use crate::algorithms::dijkstra::{self, CostFunction, PathResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub address: Address,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: Address,
    pub destination: Address,
    pub weight: f64,
    pub enabled: bool,
    pub is_static: bool,
}

/// Directed connectivity graph keyed by address.
///
/// Adjacency is kept in ordered maps so iteration, and therefore tie
/// breaking during search, is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<Address, Node>,
    outgoing: BTreeMap<Address, BTreeMap<Address, Edge>>,
    incoming: BTreeMap<Address, BTreeSet<Address>>,
    user_modifiable: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            user_modifiable: true,
        }
    }

    pub fn is_user_modifiable(&self) -> bool {
        self.user_modifiable
    }

    pub fn set_user_modifiable(&mut self, modifiable: bool) {
        self.user_modifiable = modifiable;
    }

    pub fn create_node(&mut self, address: Address) -> bool {
        if address.is_null() || self.nodes.contains_key(&address) {
            return false;
        }
        self.nodes.insert(
            address,
            Node {
                address,
                enabled: true,
            },
        );
        true
    }

    pub fn remove_node(&mut self, address: &Address) -> bool {
        if self.nodes.remove(address).is_none() {
            return false;
        }
        self.remove_node_edges(address);
        self.outgoing.remove(address);
        self.incoming.remove(address);
        true
    }

    pub fn find_node(&self, address: &Address) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn contains_node(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flat_map(|edges| edges.values())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeMap::len).sum()
    }

    pub fn insert_edge(&mut self, source: Address, destination: Address, is_static: bool) -> bool {
        if !self.nodes.contains_key(&source) || !self.nodes.contains_key(&destination) {
            return false;
        }
        let edges = self.outgoing.entry(source).or_default();
        if edges.contains_key(&destination) {
            return false;
        }
        edges.insert(
            destination,
            Edge {
                source,
                destination,
                weight: 1.0,
                enabled: true,
                is_static,
            },
        );
        self.incoming.entry(destination).or_default().insert(source);
        true
    }

    pub fn erase_edge(&mut self, source: &Address, destination: &Address) -> bool {
        let removed = self
            .outgoing
            .get_mut(source)
            .and_then(|edges| edges.remove(destination))
            .is_some();
        if removed {
            if let Some(sources) = self.incoming.get_mut(destination) {
                sources.remove(source);
            }
        }
        removed
    }

    pub fn find_edge(&self, source: &Address, destination: &Address) -> Option<&Edge> {
        self.outgoing.get(source)?.get(destination)
    }

    fn find_edge_mut(&mut self, source: &Address, destination: &Address) -> Option<&mut Edge> {
        self.outgoing.get_mut(source)?.get_mut(destination)
    }

    pub fn set_edge_weight(&mut self, source: &Address, destination: &Address, weight: f64) -> bool {
        match self.find_edge_mut(source, destination) {
            Some(edge) => {
                edge.weight = weight;
                true
            }
            None => false,
        }
    }

    pub fn enable_node(&mut self, address: &Address) -> bool {
        self.set_node_enabled(address, true)
    }

    pub fn disable_node(&mut self, address: &Address) -> bool {
        self.set_node_enabled(address, false)
    }

    fn set_node_enabled(&mut self, address: &Address, enabled: bool) -> bool {
        match self.nodes.get_mut(address) {
            Some(node) => {
                node.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable_edge(&mut self, source: &Address, destination: &Address) -> bool {
        self.set_edge_enabled(source, destination, true)
    }

    pub fn disable_edge(&mut self, source: &Address, destination: &Address) -> bool {
        self.set_edge_enabled(source, destination, false)
    }

    fn set_edge_enabled(&mut self, source: &Address, destination: &Address, enabled: bool) -> bool {
        match self.find_edge_mut(source, destination) {
            Some(edge) => {
                edge.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn outgoing_edges(&self, address: &Address) -> Vec<&Edge> {
        self.outgoing
            .get(address)
            .map(|edges| edges.values().collect())
            .unwrap_or_default()
    }

    pub fn incoming_edges(&self, address: &Address) -> Vec<&Edge> {
        self.incoming
            .get(address)
            .map(|sources| {
                sources
                    .iter()
                    .filter_map(|source| self.find_edge(source, address))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every edge touching `address`, outgoing first.
    pub fn node_edges(&self, address: &Address) -> Vec<&Edge> {
        let mut edges = self.outgoing_edges(address);
        edges.extend(self.incoming_edges(address));
        edges
    }

    /// Erases every edge incident to `address` and returns the removed pairs.
    pub fn remove_node_edges(&mut self, address: &Address) -> Vec<(Address, Address)> {
        let pairs: Vec<(Address, Address)> = self
            .node_edges(address)
            .into_iter()
            .map(|edge| (edge.source, edge.destination))
            .collect();
        for (source, destination) in &pairs {
            self.erase_edge(source, destination);
        }
        pairs
    }

    /// True when a message could cross the edge right now.
    pub fn is_link_usable(&self, source: &Address, destination: &Address) -> bool {
        let enabled = |address: &Address| self.nodes.get(address).is_some_and(|node| node.enabled);
        enabled(source)
            && enabled(destination)
            && self
                .find_edge(source, destination)
                .is_some_and(|edge| edge.enabled)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.outgoing.clear();
        self.incoming.clear();
    }

    pub fn find_path(
        &self,
        source: &Address,
        destination: &Address,
        cost_fn: &dyn CostFunction,
    ) -> Option<PathResult> {
        dijkstra::shortest_path(self, source, destination, cost_fn)
    }

    pub fn find_any_path(&self, source: &Address, destination: &Address) -> Option<PathResult> {
        dijkstra::any_path(self, source, destination)
    }

    /// Adds every node and edge along `path`, creating missing nodes.
    pub fn add_path(&mut self, path: &[Address]) {
        for address in path {
            self.create_node(*address);
        }
        for pair in path.windows(2) {
            self.insert_edge(pair[0], pair[1], false);
        }
    }
}
