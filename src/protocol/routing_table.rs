use std::collections::BTreeMap;

use serde::Serialize;

use crate::address::Address;

/// A distance-vector route as kept by RIP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingEntry {
    pub destination: Address,
    pub subnet_mask: u8,
    pub gateway: Address,
    pub metric: u32,
    pub last_seen: f64,
    pub changed: bool,
    pub valid: bool,
    /// Stamp of the latest invalidation; a pending collection only removes
    /// the entry while the stamp still matches.
    pub invalidation: u64,
}

impl RoutingEntry {
    pub fn new(destination: Address, gateway: Address, metric: u32, now: f64) -> Self {
        Self {
            destination,
            subnet_mask: destination.mask(),
            gateway,
            metric,
            last_seen: now,
            changed: true,
            valid: true,
            invalidation: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingTable {
    entries: BTreeMap<Address, RoutingEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn add_route(&mut self, entry: RoutingEntry) {
        self.entries.insert(entry.destination, entry);
    }

    pub fn remove_route(&mut self, destination: &Address) -> Option<RoutingEntry> {
        self.entries.remove(destination)
    }

    pub fn get_route(&self, destination: &Address) -> Option<&RoutingEntry> {
        self.entries.get(destination)
    }

    pub fn get_route_mut(&mut self, destination: &Address) -> Option<&mut RoutingEntry> {
        self.entries.get_mut(destination)
    }

    /// Exact destination first, then its routing prefix.
    pub fn find_route(&self, destination: &Address) -> Option<&RoutingEntry> {
        self.entries
            .get(destination)
            .or_else(|| self.entries.get(&destination.routing_prefix()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RoutingEntry> {
        self.entries.values_mut()
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|entry| entry.changed)
    }

    pub fn clear_changed(&mut self) {
        for entry in self.entries.values_mut() {
            entry.changed = false;
        }
    }
}
