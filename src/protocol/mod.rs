pub mod adhoc;
pub mod area;
pub mod igmp;
pub mod legacy;
pub mod messages;
pub mod multicast;
pub mod neighbor;
pub mod ospf;
pub mod rip;
pub mod routing_table;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::rngs::StdRng;

use crate::address::Address;
use crate::comm::Comm;
use crate::graph::Graph;
use crate::message::{Body, Message};
use crate::network::NetworkManager;
use crate::observer::{FailureReason, Notification};
use crate::router::Router;
use crate::scheduler::EventKind;
use crate::{CommId, RouterId};

pub use adhoc::{AdHoc, AdHocHook, AdHocPolicy, NoOpPolicy};
pub use legacy::Legacy;
pub use multicast::Multicast;
pub use ospf::{Ospf, OspfDomain};
pub use rip::Rip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolKind {
    Igmp,
    Ospf,
    Rip,
    AdHoc,
    Multicast,
    Legacy,
}

impl ProtocolKind {
    /// Lower values are tried first.
    pub fn default_priority(&self) -> u32 {
        match self {
            ProtocolKind::Igmp => 0,
            ProtocolKind::Ospf => 100,
            ProtocolKind::Rip => 200,
            ProtocolKind::AdHoc => 300,
            ProtocolKind::Multicast => 400,
            ProtocolKind::Legacy => 1000,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolKind::Igmp => "IGMP",
            ProtocolKind::Ospf => "OSPF",
            ProtocolKind::Rip => "RIPv2",
            ProtocolKind::AdHoc => "AdHoc",
            ProtocolKind::Multicast => "Multicast",
            ProtocolKind::Legacy => "Legacy",
        };
        f.write_str(name)
    }
}

/// A computed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteData {
    pub next_hop: Address,
    pub hops: usize,
    pub cost: f64,
    pub path: Vec<Address>,
    pub destinations: Option<BTreeSet<Address>>,
}

impl RouteData {
    pub fn from_path(path: Vec<Address>, cost: f64) -> Option<Self> {
        let next_hop = *path.get(1)?;
        Some(Self {
            next_hop,
            hops: path.len() - 1,
            cost,
            path,
            destinations: None,
        })
    }

    /// Why the route cannot carry `message`, if it cannot.
    pub fn rejection(&self, message: &Message) -> Option<FailureReason> {
        if self.path.len() <= 1 || !self.cost.is_finite() {
            Some(FailureReason::NoRoute)
        } else if self.hops + message.trace_route().len() >= message.ttl() {
            Some(FailureReason::HopLimitExceeded)
        } else {
            None
        }
    }

    /// A copy of `message` addressed to this route's next hop.
    pub fn apply(&self, message: &Message) -> Message {
        let mut routed = message.clone();
        routed.set_next_hop(self.next_hop);
        if self.destinations.is_some() {
            routed.set_destinations(self.destinations.clone());
        }
        routed
    }
}

/// Read-only view of the arena shared by every routing decision.
#[derive(Clone, Copy)]
pub struct Fabric<'a> {
    pub manager: &'a NetworkManager,
    pub routers: &'a BTreeMap<RouterId, Router>,
    pub comms: &'a BTreeMap<CommId, Comm>,
}

impl<'a> Fabric<'a> {
    /// Bound addresses of the router's interfaces, in interface order.
    pub fn interfaces_of(&self, router: RouterId) -> Vec<Address> {
        self.routers
            .get(&router)
            .map(|router| {
                router
                    .interfaces()
                    .iter()
                    .filter_map(|comm| self.manager.address_of(*comm))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn comm_at(&self, address: &Address) -> Option<&'a Comm> {
        self.comms.get(&self.manager.comm_at(address)?)
    }

    pub fn router_at(&self, address: &Address) -> Option<RouterId> {
        self.comm_at(address).map(Comm::router)
    }

    pub fn router(&self, id: RouterId) -> Option<&'a Router> {
        self.routers.get(&id)
    }
}

/// Everything a routing query may look at.
pub struct RoutingContext<'a> {
    pub now: f64,
    pub router: RouterId,
    pub interfaces: Vec<Address>,
    pub fabric: Fabric<'a>,
    pub ospf: &'a OspfDomain,
}

impl<'a> RoutingContext<'a> {
    pub fn new(now: f64, router: RouterId, fabric: Fabric<'a>, ospf: &'a OspfDomain) -> Self {
        Self {
            now,
            router,
            interfaces: fabric.interfaces_of(router),
            fabric,
            ospf,
        }
    }

    /// The same view, seen from another router.
    pub fn for_router(&self, router: RouterId) -> Self {
        Self::new(self.now, router, self.fabric, self.ospf)
    }

    pub fn manager(&self) -> &'a NetworkManager {
        self.fabric.manager
    }

    pub fn is_local(&self, address: &Address) -> bool {
        self.interfaces.contains(address)
    }
}

/// Side effects requested by a protocol handler, applied by the simulation
/// once the handler returns.
#[derive(Debug, Clone)]
pub enum Action {
    Send { from: Address, to: Address, body: Body },
    Schedule { time: f64, event: EventKind },
    JoinGroup { member: Address, group: Address },
    LeaveGroup { member: Address, group: Address },
}

/// Narrow mutable state handed to receive, timer and notification handlers.
pub struct ProtocolContext<'a> {
    pub now: f64,
    pub router: RouterId,
    pub epoch: u64,
    pub interfaces: Vec<Address>,
    pub manager: &'a NetworkManager,
    pub rng: &'a mut StdRng,
    pub actions: Vec<Action>,
    pub override_forward: bool,
}

impl<'a> ProtocolContext<'a> {
    pub fn new(
        now: f64,
        router: RouterId,
        epoch: u64,
        interfaces: Vec<Address>,
        manager: &'a NetworkManager,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            now,
            router,
            epoch,
            interfaces,
            manager,
            rng,
            actions: Vec::new(),
            override_forward: false,
        }
    }

    pub fn send(&mut self, from: Address, to: Address, body: Body) {
        self.actions.push(Action::Send { from, to, body });
    }

    pub fn schedule(&mut self, time: f64, event: EventKind) {
        self.actions.push(Action::Schedule { time, event });
    }

    pub fn is_local(&self, address: &Address) -> bool {
        self.interfaces.contains(address)
    }
}

/// Outcome of offering a message to one protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum SendDecision {
    /// The protocol has nothing to say about this message.
    Decline,
    /// A route was found but cannot carry the message.
    Rejected(FailureReason),
    /// Transmit each message to its next hop.
    Forward(Vec<Message>),
    /// Handled; nothing left to transmit.
    Consume,
}

/// The shared contract of routing protocols.
pub trait ProtocolInterface {
    fn kind(&self) -> ProtocolKind;

    fn priority(&self) -> u32 {
        self.kind().default_priority()
    }

    fn graph(&self) -> Option<&Graph> {
        None
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        None
    }

    /// When true, truth notifications are mirrored straight into `graph`.
    fn should_propagate_truth(&self) -> bool {
        false
    }

    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData>;
}

/// The closed set of protocols a router can carry.
#[derive(Debug)]
pub enum Protocol {
    Legacy(Legacy),
    AdHoc(AdHoc),
    Multicast(Multicast),
    Ospf(Ospf),
    Rip(Rip),
}

impl ProtocolInterface for Protocol {
    fn kind(&self) -> ProtocolKind {
        self.inner().kind()
    }

    fn priority(&self) -> u32 {
        self.inner().priority()
    }

    fn graph(&self) -> Option<&Graph> {
        self.inner().graph()
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        match self {
            Protocol::Legacy(protocol) => protocol.graph_mut(),
            Protocol::AdHoc(protocol) => protocol.graph_mut(),
            Protocol::Multicast(protocol) => protocol.graph_mut(),
            Protocol::Ospf(protocol) => protocol.graph_mut(),
            Protocol::Rip(protocol) => protocol.graph_mut(),
        }
    }

    fn should_propagate_truth(&self) -> bool {
        self.inner().should_propagate_truth()
    }

    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        self.inner().routing(ctx, xmtr, message)
    }
}

impl Protocol {
    fn inner(&self) -> &dyn ProtocolInterface {
        match self {
            Protocol::Legacy(protocol) => protocol,
            Protocol::AdHoc(protocol) => protocol,
            Protocol::Multicast(protocol) => protocol,
            Protocol::Ospf(protocol) => protocol,
            Protocol::Rip(protocol) => protocol,
        }
    }

    /// Offers a message for transmission from `xmtr`.
    pub fn send(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> SendDecision {
        if let Protocol::Multicast(multicast) = self {
            return multicast.fan_out(ctx, xmtr, message);
        }
        match self.routing(ctx, xmtr, message) {
            None => SendDecision::Decline,
            Some(route) => match route.rejection(message) {
                Some(reason) => SendDecision::Rejected(reason),
                None => SendDecision::Forward(vec![route.apply(message)]),
            },
        }
    }

    /// Returns true to request forwarding. OSPF packets are handled by the
    /// shared OSPF domain rather than here.
    pub fn receive(&mut self, ctx: &mut ProtocolContext<'_>, receiving: Address, message: &Message) -> bool {
        match self {
            Protocol::Rip(rip) => rip.receive(ctx, receiving, message),
            Protocol::Multicast(multicast) => multicast.receive(receiving, message),
            Protocol::Legacy(_) | Protocol::AdHoc(_) | Protocol::Ospf(_) => false,
        }
    }

    /// Protocol-specific reaction to a truth change. Returns true when the
    /// change should be mirrored into the protocol's graph.
    pub fn perfect(&mut self, ctx: &mut ProtocolContext<'_>, notification: &Notification) -> bool {
        match self {
            Protocol::AdHoc(adhoc) => adhoc.perfect(ctx, notification),
            _ => false,
        }
    }

    pub fn as_rip(&self) -> Option<&Rip> {
        match self {
            Protocol::Rip(rip) => Some(rip),
            _ => None,
        }
    }

    pub fn as_rip_mut(&mut self) -> Option<&mut Rip> {
        match self {
            Protocol::Rip(rip) => Some(rip),
            _ => None,
        }
    }

    pub fn as_adhoc_mut(&mut self) -> Option<&mut AdHoc> {
        match self {
            Protocol::AdHoc(adhoc) => Some(adhoc),
            _ => None,
        }
    }

    pub fn as_ospf(&self) -> Option<&Ospf> {
        match self {
            Protocol::Ospf(ospf) => Some(ospf),
            _ => None,
        }
    }
}
