use std::collections::{BTreeMap, BTreeSet};

use crate::RouterId;
use crate::address::Address;

/// A router competing for designated router duty on one network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub router: RouterId,
    pub priority: usize,
    /// Highest-addressed interface of the router in the network.
    pub interface: Address,
}

/// Lowest priority wins; ties go to the highest interface address.
pub fn elect(candidates: &[Candidate], exclude: Option<RouterId>) -> Option<Candidate> {
    candidates
        .iter()
        .filter(|candidate| Some(candidate.router) != exclude)
        .copied()
        .reduce(|best, candidate| {
            if candidate.priority < best.priority
                || (candidate.priority == best.priority && candidate.interface > best.interface)
            {
                candidate
            } else {
                best
            }
        })
}

/// An OSPF area shared by its member routers.
#[derive(Debug, Clone)]
pub struct Area {
    address: Address,
    backbone: bool,
    routers: Vec<RouterId>,
    drs: BTreeMap<Address, Candidate>,
    bdrs: BTreeMap<Address, Candidate>,
}

impl Area {
    pub fn new(address: Address, backbone: bool) -> Self {
        Self {
            address,
            backbone,
            routers: Vec::new(),
            drs: BTreeMap::new(),
            bdrs: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_backbone(&self) -> bool {
        self.backbone
    }

    pub fn routers(&self) -> &[RouterId] {
        &self.routers
    }

    pub fn has_router(&self, router: RouterId) -> bool {
        self.routers.contains(&router)
    }

    pub fn add_router(&mut self, router: RouterId) {
        if !self.has_router(router) {
            self.routers.push(router);
        }
    }

    pub fn remove_router(&mut self, router: RouterId) -> bool {
        let before = self.routers.len();
        self.routers.retain(|member| *member != router);
        before != self.routers.len()
    }

    pub fn dr(&self, network: &Address) -> Option<RouterId> {
        self.drs.get(network).map(|holder| holder.router)
    }

    pub fn bdr(&self, network: &Address) -> Option<RouterId> {
        self.bdrs.get(network).map(|holder| holder.router)
    }

    /// The elected DR with the interface it won on.
    pub fn dr_holder(&self, network: &Address) -> Option<Candidate> {
        self.drs.get(network).copied()
    }

    pub fn bdr_holder(&self, network: &Address) -> Option<Candidate> {
        self.bdrs.get(network).copied()
    }

    pub fn set_dr(&mut self, network: Address, holder: Option<Candidate>) {
        match holder {
            Some(holder) => self.drs.insert(network, holder),
            None => self.drs.remove(&network),
        };
    }

    pub fn set_bdr(&mut self, network: Address, holder: Option<Candidate>) {
        match holder {
            Some(holder) => self.bdrs.insert(network, holder),
            None => self.bdrs.remove(&network),
        };
    }

    /// True when `router` is the DR or BDR of `network`.
    pub fn is_designated(&self, network: &Address, router: RouterId) -> bool {
        self.dr(network) == Some(router) || self.bdr(network) == Some(router)
    }

    /// Networks where `router` holds the DR or BDR role.
    pub fn designated_networks(&self, router: RouterId) -> BTreeSet<Address> {
        self.drs
            .iter()
            .chain(self.bdrs.iter())
            .filter(|(_, holder)| holder.router == router)
            .map(|(network, _)| *network)
            .collect()
    }

    pub fn drs(&self) -> impl Iterator<Item = (&Address, &Candidate)> {
        self.drs.iter()
    }

    pub fn bdrs(&self) -> impl Iterator<Item = (&Address, &Candidate)> {
        self.bdrs.iter()
    }
}
