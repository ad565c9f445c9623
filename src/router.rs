use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::address::Address;
use crate::algorithms::LeastHops;
use crate::config::router_config::{ProtocolConfig, RouterConfig};
use crate::error::{CommError, Result};
use crate::graph::Graph;
use crate::message::Message;
use crate::network::NetworkManager;
use crate::observer::{FailureReason, Notification};
use crate::protocol::{
    AdHoc, AdHocHook, Legacy, Multicast, Ospf, Protocol, ProtocolContext, ProtocolInterface, ProtocolKind, Rip,
    RouteData, RoutingContext, SendDecision,
};
use crate::reserved::BROADCAST_LOCAL;
use crate::{CommId, RouterId};

/// Input to [`Router::send`].
#[derive(Debug, Clone)]
pub struct SendData {
    pub xmtr: Address,
    pub messages: Vec<Message>,
}

impl SendData {
    pub fn new(xmtr: Address, message: Message) -> Self {
        Self {
            xmtr,
            messages: vec![message],
        }
    }
}

/// What the router decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Transmit each message to its next hop.
    Forward(Vec<Message>),
    /// A protocol absorbed the message.
    Consumed,
    Failed(FailureReason),
}

/// Owns a platform's interfaces and decides where their traffic goes.
#[derive(Debug)]
pub struct Router {
    id: RouterId,
    name: String,
    platform: String,
    interfaces: Vec<CommId>,
    protocols: Vec<Protocol>,
    gateway: Option<Address>,
    hop_limit: usize,
    turned_on: bool,
    epoch: u64,
    use_default_protocol: bool,
    use_multicast_protocol: bool,
    automated_interface_linking: bool,
}

impl Router {
    pub fn new(id: RouterId, platform: impl Into<String>, config: &RouterConfig) -> Result<Self> {
        config.validate()?;

        let mut protocols: Vec<Protocol> = config
            .protocols
            .iter()
            .map(|protocol| match protocol {
                ProtocolConfig::Ospf(ospf) => Protocol::Ospf(Ospf::new(ospf.clone())),
                ProtocolConfig::Rip(rip) => Protocol::Rip(Rip::new(rip.clone())),
                ProtocolConfig::AdHoc(adhoc) => Protocol::AdHoc(AdHoc::new(adhoc.clone())),
            })
            .collect();
        if config.use_multicast_protocol {
            protocols.push(Protocol::Multicast(Multicast::new()));
        }
        if config.use_default_protocol {
            protocols.push(Protocol::Legacy(Legacy));
        }
        protocols.sort_by_key(|protocol| protocol.priority());

        Ok(Self {
            id,
            name: config.name.clone(),
            platform: platform.into(),
            interfaces: Vec::new(),
            protocols,
            gateway: config.gateway,
            hop_limit: config.hop_limit,
            turned_on: false,
            epoch: 0,
            use_default_protocol: config.use_default_protocol,
            use_multicast_protocol: config.use_multicast_protocol,
            automated_interface_linking: config.automated_interface_linking,
        })
    }

    pub fn id(&self) -> RouterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.platform, self.name)
    }

    pub fn interfaces(&self) -> &[CommId] {
        &self.interfaces
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn protocols_mut(&mut self) -> &mut [Protocol] {
        &mut self.protocols
    }

    pub fn protocol(&self, kind: ProtocolKind) -> Option<&Protocol> {
        self.protocols.iter().find(|protocol| protocol.kind() == kind)
    }

    pub fn has_protocol(&self, kind: ProtocolKind) -> bool {
        self.protocol(kind).is_some()
    }

    pub fn uses_default_protocol(&self) -> bool {
        self.use_default_protocol
    }

    pub fn uses_multicast(&self) -> bool {
        self.use_multicast_protocol
    }

    pub fn automated_interface_linking(&self) -> bool {
        self.automated_interface_linking
    }

    pub fn gateway(&self) -> Option<Address> {
        self.gateway
    }

    pub fn set_gateway(&mut self, gateway: Option<Address>) {
        self.gateway = gateway;
    }

    pub fn hop_limit(&self) -> usize {
        self.hop_limit
    }

    pub fn is_turned_on(&self) -> bool {
        self.turned_on
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_interface(&self, comm: CommId) -> bool {
        self.interfaces.contains(&comm)
    }

    /// Returns the interfaces present before `comm`, which the caller
    /// bridges to it when automated linking is on.
    pub fn add_interface(&mut self, comm: CommId) -> Option<Vec<CommId>> {
        if self.has_interface(comm) {
            return None;
        }
        let existing = self.interfaces.clone();
        self.interfaces.push(comm);
        Some(existing)
    }

    pub fn remove_interface(&mut self, comm: CommId) -> bool {
        let before = self.interfaces.len();
        self.interfaces.retain(|interface| *interface != comm);
        before != self.interfaces.len()
    }

    /// Clears a gateway the network manager does not know.
    pub fn validate_gateway(&mut self, manager: &NetworkManager) {
        if let Some(gateway) = self.gateway {
            if !manager.is_address_managed(&gateway) {
                warn!(
                    "Router {} gateway {} is not a managed address; ignoring it",
                    self.full_name(),
                    gateway
                );
                self.gateway = None;
            }
        }
    }

    /// Protocol graphs start as a copy of the truth.
    pub fn turn_on(&mut self, truth: &Graph) -> bool {
        if self.turned_on {
            return false;
        }
        self.turned_on = true;
        for protocol in &mut self.protocols {
            if let Some(graph) = protocol.graph_mut() {
                *graph = truth.clone();
                graph.set_user_modifiable(true);
            }
        }
        info!("Router {} turned on", self.full_name());
        true
    }

    pub fn turn_off(&mut self) -> bool {
        if !self.turned_on {
            return false;
        }
        self.turned_on = false;
        self.epoch += 1;
        for protocol in &mut self.protocols {
            if let Some(rip) = protocol.as_rip_mut() {
                rip.turn_off();
            }
        }
        info!("Router {} turned off", self.full_name());
        true
    }

    /// Starts protocol timers after the router comes up.
    pub fn start_protocols(&mut self, ctx: &mut ProtocolContext<'_>) {
        for protocol in &mut self.protocols {
            if let Some(rip) = protocol.as_rip_mut() {
                rip.turn_on(ctx);
            }
        }
    }

    pub fn send(&self, ctx: &RoutingContext<'_>, data: SendData) -> Result<SendOutcome> {
        let SendData { xmtr, mut messages } = data;
        if messages.len() != 1 {
            return Err(CommError::Routing(format!(
                "router {} expects exactly one message per send, got {}",
                self.full_name(),
                messages.len()
            )));
        }
        if xmtr.is_null() {
            return Err(CommError::Invariant(format!(
                "router {} asked to send from a null transmitter",
                self.full_name()
            )));
        }
        let Some(mut message) = messages.pop() else {
            return Err(CommError::Invariant("send data lost its message".into()));
        };

        if message.trace_route().is_empty() {
            message.set_ttl(self.hop_limit);
        }
        if message.trace_route().len() >= message.ttl() {
            return Ok(SendOutcome::Failed(FailureReason::HopLimitExceeded));
        }

        let mut ttl_rejected = false;
        for protocol in &self.protocols {
            match protocol.send(ctx, xmtr, &message) {
                SendDecision::Decline => {}
                SendDecision::Rejected(reason) => {
                    debug!("{} rejected serial {}: {}", protocol.kind(), message.serial(), reason);
                    ttl_rejected |= reason == FailureReason::HopLimitExceeded;
                }
                SendDecision::Forward(outputs) => return Ok(SendOutcome::Forward(stamp(outputs, xmtr))),
                SendDecision::Consume => return Ok(SendOutcome::Consumed),
            }
        }

        if let Some(outputs) = self.broadcast(ctx, xmtr, &message) {
            return Ok(SendOutcome::Forward(stamp(outputs, xmtr)));
        }
        if let Some(output) = self.via_gateway(ctx, xmtr, &message) {
            return Ok(SendOutcome::Forward(stamp(vec![output], xmtr)));
        }

        Ok(SendOutcome::Failed(if ttl_rejected {
            FailureReason::HopLimitExceeded
        } else {
            FailureReason::NoRoute
        }))
    }

    /// One copy per network member for a fresh message to the network
    /// broadcast address.
    fn broadcast(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<Vec<Message>> {
        if !message.is_fresh() {
            return None;
        }
        let network = ctx.manager().network_of(&xmtr)?;
        let destination = message.destination();
        if destination != network.broadcast() && destination != BROADCAST_LOCAL {
            return None;
        }

        let truth = ctx.manager().graph();
        let copies: Vec<Message> = network
            .members()
            .iter()
            .filter(|member| **member != xmtr)
            .filter_map(|member| {
                let path = truth.find_path(&xmtr, member, &LeastHops)?;
                let mut copy = message.clone();
                copy.set_next_hop(path.next_hop()?);
                copy.set_destinations(Some(BTreeSet::from([*member])));
                Some(copy)
            })
            .collect();
        (!copies.is_empty()).then_some(copies)
    }

    /// Least-hop truth path toward the configured gateway, which may be a
    /// remote address rather than one of this router's interfaces.
    fn via_gateway(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<Message> {
        let gateway = self.gateway?;
        if gateway == xmtr {
            return None;
        }
        let result = ctx.manager().graph().find_path(&xmtr, &gateway, &LeastHops)?;
        let route = RouteData::from_path(result.path, result.cost)?;
        if route.rejection(message).is_some() {
            return None;
        }
        debug!("Router {} sending serial {} via gateway {}", self.name, message.serial(), gateway);
        Some(route.apply(message))
    }

    /// Offers a received message to each protocol until one asks for it to
    /// be forwarded.
    pub fn receive(&mut self, ctx: &mut ProtocolContext<'_>, receiving: Address, message: &Message) -> bool {
        self.protocols
            .iter_mut()
            .any(|protocol| protocol.receive(ctx, receiving, message))
    }

    /// Reacts to a truth change: mirrored into protocols that follow the
    /// truth, offered to the others.
    pub fn perfect(&mut self, ctx: &mut ProtocolContext<'_>, notification: &Notification) {
        let turned_on = self.turned_on;
        let mut mirrored = false;
        for protocol in &mut self.protocols {
            let mirror = protocol.should_propagate_truth() || protocol.perfect(ctx, notification);
            if !mirror || !turned_on {
                continue;
            }
            if let Some(graph) = protocol.graph_mut() {
                mirrored |= mirror_notification(graph, notification);
            }
        }
        if mirrored {
            if let Notification::ConnectionRemoved { destination, .. } = notification {
                self.clear_gateway_if(destination);
            }
        }
    }

    /// Runs a deferred ad hoc hook, mirroring the change when the policy
    /// declines it.
    pub fn run_adhoc_hook(&mut self, hook: AdHocHook) {
        let turned_on = self.turned_on;
        let mut removed_link = None;
        for protocol in &mut self.protocols {
            let Some(adhoc) = protocol.as_adhoc_mut() else {
                continue;
            };
            if adhoc.run_hook(hook) || !turned_on {
                continue;
            }
            let Some(graph) = adhoc.graph_mut() else {
                continue;
            };
            match hook {
                AdHocHook::CommAdded(address) => {
                    add_node(graph, address);
                }
                AdHocHook::CommRemoved(address) => {
                    remove_node(graph, &address);
                }
                AdHocHook::ConnectionAdded(source, destination) => {
                    add_link(graph, source, destination);
                }
                AdHocHook::ConnectionRemoved(source, destination) => {
                    if graph.erase_edge(&source, &destination) {
                        removed_link = Some(destination);
                    }
                }
            }
        }
        if let Some(destination) = removed_link {
            self.clear_gateway_if(&destination);
        }
    }

    fn clear_gateway_if(&mut self, destination: &Address) {
        if self.gateway.as_ref() == Some(destination) {
            info!("Router {} lost its gateway {}", self.full_name(), destination);
            self.gateway = None;
        }
    }

    fn protocol_graph(&mut self, kind: ProtocolKind) -> Option<&mut Graph> {
        if !self.turned_on {
            return None;
        }
        self.protocols
            .iter_mut()
            .find(|protocol| protocol.kind() == kind)?
            .graph_mut()
    }

    pub fn add_node(&mut self, kind: ProtocolKind, address: Address) -> bool {
        self.protocol_graph(kind).is_some_and(|graph| add_node(graph, address))
    }

    pub fn remove_node(&mut self, kind: ProtocolKind, address: &Address) -> bool {
        self.protocol_graph(kind).is_some_and(|graph| remove_node(graph, address))
    }

    pub fn add_link(&mut self, kind: ProtocolKind, source: Address, destination: Address) -> bool {
        self.protocol_graph(kind)
            .is_some_and(|graph| add_link(graph, source, destination))
    }

    pub fn remove_link(&mut self, kind: ProtocolKind, source: &Address, destination: &Address) -> bool {
        let removed = self
            .protocol_graph(kind)
            .is_some_and(|graph| graph.erase_edge(source, destination));
        if removed {
            self.clear_gateway_if(destination);
        }
        removed
    }

    pub fn enable_node(&mut self, kind: ProtocolKind, address: &Address) -> bool {
        self.protocol_graph(kind).is_some_and(|graph| graph.enable_node(address))
    }

    pub fn disable_node(&mut self, kind: ProtocolKind, address: &Address) -> bool {
        self.protocol_graph(kind).is_some_and(|graph| graph.disable_node(address))
    }

    pub fn enable_link(&mut self, kind: ProtocolKind, source: &Address, destination: &Address) -> bool {
        self.protocol_graph(kind)
            .is_some_and(|graph| graph.enable_edge(source, destination))
    }

    pub fn disable_link(&mut self, kind: ProtocolKind, source: &Address, destination: &Address) -> bool {
        self.protocol_graph(kind)
            .is_some_and(|graph| graph.disable_edge(source, destination))
    }
}

fn stamp(mut outputs: Vec<Message>, xmtr: Address) -> Vec<Message> {
    for output in &mut outputs {
        output.append_trace(xmtr);
    }
    outputs
}

fn add_node(graph: &mut Graph, address: Address) -> bool {
    graph.contains_node(&address) || graph.create_node(address)
}

/// Edges go first.
fn remove_node(graph: &mut Graph, address: &Address) -> bool {
    graph.remove_node_edges(address);
    graph.remove_node(address)
}

/// Creates missing endpoints; rolls them back if the edge cannot be added.
fn add_link(graph: &mut Graph, source: Address, destination: Address) -> bool {
    let created_source = !graph.contains_node(&source) && graph.create_node(source);
    let created_destination = !graph.contains_node(&destination) && graph.create_node(destination);
    if graph.find_edge(&source, &destination).is_some() || graph.insert_edge(source, destination, false) {
        return true;
    }
    if created_source {
        graph.remove_node(&source);
    }
    if created_destination {
        graph.remove_node(&destination);
    }
    false
}

fn mirror_notification(graph: &mut Graph, notification: &Notification) -> bool {
    match notification {
        Notification::CommAdded { address, .. } => add_node(graph, *address),
        Notification::CommRemoved { address, .. } => remove_node(graph, address),
        Notification::CommEnabled { address, .. } => graph.enable_node(address),
        Notification::CommDisabled { address, .. } => graph.disable_node(address),
        Notification::ConnectionAdded { source, destination } => add_link(graph, *source, *destination),
        Notification::ConnectionRemoved { source, destination } => graph.erase_edge(source, destination),
        Notification::ConnectionEnabled { source, destination } => graph.enable_edge(source, destination),
        Notification::ConnectionDisabled { source, destination } => graph.disable_edge(source, destination),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::router_config::RipConfig;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn protocols_are_ordered_by_priority() {
        let config = RouterConfig {
            use_multicast_protocol: true,
            ..RouterConfig::new("r")
        }
        .with_protocol(ProtocolConfig::Rip(RipConfig::default()));
        let router = Router::new(RouterId(0), "p", &config).unwrap();
        let kinds: Vec<ProtocolKind> = router.protocols().iter().map(|protocol| protocol.kind()).collect();
        assert_eq!(kinds, vec![ProtocolKind::Rip, ProtocolKind::Multicast, ProtocolKind::Legacy]);
        assert_eq!(router.full_name(), "p.r");
    }

    #[test]
    fn add_link_creates_and_rolls_back_nodes() {
        let mut graph = Graph::new();
        assert!(add_link(&mut graph, addr("10.0.0.1"), addr("10.0.0.2")));
        assert_eq!(graph.node_count(), 2);

        assert!(!add_link(&mut graph, addr("10.0.0.3"), Address::NULL));
        assert!(!graph.contains_node(&addr("10.0.0.3")));
    }

    #[test]
    fn primitives_require_a_running_router() {
        let config = RouterConfig {
            use_multicast_protocol: true,
            ..RouterConfig::new("r")
        };
        let mut router = Router::new(RouterId(0), "p", &config).unwrap();
        assert!(!router.add_node(ProtocolKind::Multicast, addr("10.0.0.1")));

        router.turn_on(&Graph::new());
        assert!(router.add_node(ProtocolKind::Multicast, addr("10.0.0.1")));
        assert!(router.add_link(ProtocolKind::Multicast, addr("10.0.0.1"), addr("10.0.0.2")));
        assert!(!router.add_node(ProtocolKind::Legacy, addr("10.0.0.3")));

        router.set_gateway(Some(addr("10.0.0.2")));
        assert!(router.remove_link(ProtocolKind::Multicast, &addr("10.0.0.1"), &addr("10.0.0.2")));
        assert_eq!(router.gateway(), None);

        assert!(router.turn_off());
        assert_eq!(router.epoch(), 1);
        assert!(!router.turn_off());
    }

    #[test]
    fn send_requires_exactly_one_message() {
        let config = RouterConfig::new("r");
        let router = Router::new(RouterId(0), "p", &config).unwrap();
        let manager = NetworkManager::new();
        let routers = std::collections::BTreeMap::new();
        let comms = std::collections::BTreeMap::new();
        let ospf = crate::protocol::OspfDomain::new();
        let fabric = crate::protocol::Fabric {
            manager: &manager,
            routers: &routers,
            comms: &comms,
        };
        let ctx = RoutingContext::new(0.0, RouterId(0), fabric, &ospf);
        let data = SendData {
            xmtr: addr("10.0.0.1"),
            messages: Vec::new(),
        };
        assert!(matches!(router.send(&ctx, data), Err(CommError::Routing(_))));
    }
}
