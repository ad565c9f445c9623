use std::collections::{BTreeMap, BTreeSet};
use std::iter;

use log::{debug, info, warn};
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::RouterId;
use crate::address::Address;
use crate::algorithms::LeastHops;
use crate::comm::Comm;
use crate::config::router_config::OspfConfig;
use crate::error::{CommError, Result};
use crate::graph::Graph;
use crate::message::{Body, Message};
use crate::protocol::area::{Area, Candidate, elect};
use crate::protocol::igmp::multicast_level;
use crate::protocol::messages::{DrAddMessage, DrDropMessage, HelloMessage, OspfPacket};
use crate::protocol::neighbor::{LinkStateData, LinkStateDatabase};
use crate::protocol::{
    Action, Fabric, Protocol, ProtocolContext, ProtocolInterface, ProtocolKind, RouteData, RoutingContext,
};
use crate::reserved::{self, OSPF_MULTICAST_ALL, OSPF_MULTICAST_DR};
use crate::router::Router;
use crate::scheduler::EventKind;

const MAX_SLOP: f64 = 0.1;

/// Per-router OSPF settings. The live state is shared in [`OspfDomain`].
#[derive(Debug, Clone)]
pub struct Ospf {
    config: OspfConfig,
}

impl Ospf {
    pub fn new(config: OspfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OspfConfig {
        &self.config
    }
}

impl ProtocolInterface for Ospf {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Ospf
    }

    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        ctx.ospf.routing(ctx, xmtr, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouterRole {
    Internal,
    AreaBorder,
    BoundaryRouter,
    Inactive,
}

/// OSPF state of one router.
#[derive(Debug, Clone)]
pub struct OspfInstance {
    config: OspfConfig,
    areas: Vec<Address>,
    role: RouterRole,
    slop: f64,
    link_states: LinkStateDatabase,
    graphs: BTreeMap<Address, Graph>,
}

impl OspfInstance {
    fn new(config: OspfConfig, rng: &mut StdRng) -> Self {
        Self {
            config,
            areas: Vec::new(),
            role: RouterRole::Internal,
            slop: rng.gen_range(0.0..=MAX_SLOP),
            link_states: LinkStateDatabase::new(),
            graphs: BTreeMap::new(),
        }
    }

    pub fn areas(&self) -> &[Address] {
        &self.areas
    }

    pub fn role(&self) -> RouterRole {
        self.role
    }

    pub fn slop(&self) -> f64 {
        self.slop
    }

    pub fn link_states(&self) -> &LinkStateDatabase {
        &self.link_states
    }

    /// The area graph, kept only while this router is a DR or BDR.
    pub fn graph(&self, area: &Address) -> Option<&Graph> {
        self.graphs.get(area)
    }

    fn is_border(&self) -> bool {
        matches!(self.role, RouterRole::AreaBorder | RouterRole::BoundaryRouter)
    }
}

fn ospf_config(router: &Router) -> Option<&OspfConfig> {
    router.protocols().iter().find_map(Protocol::as_ospf).map(Ospf::config)
}

/// Protocols an ASBR can hand traffic to.
fn is_external(protocol: &Protocol) -> bool {
    matches!(protocol.kind(), ProtocolKind::Rip | ProtocolKind::AdHoc)
}

/// Appends `trace` followed by `receiving` to `graph` as a chain of edges.
fn graph_add(graph: &mut Graph, receiving: Address, trace: &[Address]) {
    let mut previous: Option<Address> = None;
    for address in trace.iter().copied().chain(iter::once(receiving)) {
        if address.is_null() {
            previous = None;
            continue;
        }
        if !graph.contains_node(&address) {
            graph.create_node(address);
        }
        if let Some(previous) = previous {
            if previous != address && graph.find_edge(&previous, &address).is_none() {
                graph.insert_edge(previous, address, true);
            }
        }
        previous = Some(address);
    }
}

/// A comm that is on and enabled in the truth.
fn is_live_interface(fabric: &Fabric<'_>, interface: &Address) -> bool {
    fabric.comm_at(interface).is_some_and(Comm::is_turned_on)
        && fabric
            .manager
            .graph()
            .find_node(interface)
            .is_some_and(|node| node.enabled)
}

/// An elected router keeps its role while it is on and the interface it
/// won on is live.
fn can_hold(fabric: &Fabric<'_>, holder: &Candidate) -> bool {
    fabric.router(holder.router).is_some_and(Router::is_turned_on) && is_live_interface(fabric, &holder.interface)
}

/// Areas, designated routers and link state of every OSPF router.
#[derive(Debug, Clone, Default)]
pub struct OspfDomain {
    areas: BTreeMap<Address, Area>,
    instances: BTreeMap<RouterId, OspfInstance>,
    initialized: bool,
    /// Set when a DrDrop named the interface of a DR or BDR.
    designated_dropped: bool,
}

impl OspfDomain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn area(&self, address: &Address) -> Option<&Area> {
        self.areas.get(address)
    }

    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.areas.values()
    }

    pub fn instance(&self, router: RouterId) -> Option<&OspfInstance> {
        self.instances.get(&router)
    }

    pub fn has_instance(&self, router: RouterId) -> bool {
        self.instances.contains_key(&router)
    }

    fn network_of(fabric: &Fabric<'_>, address: &Address) -> Option<Address> {
        fabric.manager.managing_network_address(address)
    }

    fn priority_interface(fabric: &Fabric<'_>, router: RouterId, network: &Address) -> Option<Address> {
        fabric
            .interfaces_of(router)
            .into_iter()
            .filter(|interface| is_live_interface(fabric, interface))
            .filter(|interface| Self::network_of(fabric, interface).as_ref() == Some(network))
            .max()
    }

    fn area_networks(&self, area: &Address, fabric: &Fabric<'_>) -> BTreeSet<Address> {
        self.areas
            .get(area)
            .map(|area| {
                area.routers()
                    .iter()
                    .flat_map(|router| fabric.interfaces_of(*router))
                    .filter_map(|interface| Self::network_of(fabric, &interface))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn candidates(&self, area: &Address, network: &Address, fabric: &Fabric<'_>) -> Vec<Candidate> {
        let Some(area) = self.areas.get(area) else {
            return Vec::new();
        };
        area.routers()
            .iter()
            .filter(|router| fabric.router(**router).is_some_and(Router::is_turned_on))
            .filter_map(|router| {
                let instance = self.instances.get(router)?;
                let interface = Self::priority_interface(fabric, *router, network)?;
                Some(Candidate {
                    router: *router,
                    priority: instance.config.priority_dr,
                    interface,
                })
            })
            .collect()
    }

    /// Area interfaces and the truth edges between them.
    fn area_truth_graph(&self, area: &Address, fabric: &Fabric<'_>) -> Graph {
        let truth = fabric.manager.graph();
        let mut graph = Graph::new();
        let Some(area) = self.areas.get(area) else {
            return graph;
        };
        let interfaces: Vec<Address> = area
            .routers()
            .iter()
            .flat_map(|router| fabric.interfaces_of(*router))
            .filter(|interface| truth.contains_node(interface))
            .collect();

        for interface in &interfaces {
            graph.create_node(*interface);
        }
        for source in &interfaces {
            for destination in &interfaces {
                if source != destination && truth.find_edge(source, destination).is_some() {
                    graph.insert_edge(*source, *destination, true);
                }
            }
        }
        graph
    }

    fn assign_role(&mut self, id: RouterId, router: &Router) -> Result<()> {
        let Some(instance) = self.instances.get_mut(&id) else {
            return Ok(());
        };
        if instance.areas.is_empty() {
            return Err(CommError::OspfMissingArea {
                router: router.name().to_string(),
            });
        }
        instance.role = if !router.is_turned_on() {
            RouterRole::Inactive
        } else if router.protocols().iter().any(is_external) {
            RouterRole::BoundaryRouter
        } else if instance.areas.len() > 1 {
            RouterRole::AreaBorder
        } else {
            RouterRole::Internal
        };
        debug!("OSPF router {} role {:?}", router.name(), instance.role);
        Ok(())
    }

    fn join_all_routers(fabric: &Fabric<'_>, router: &Router, actions: &mut Vec<Action>) {
        for comm_id in router.interfaces() {
            let (Some(comm), Some(address)) = (fabric.comms.get(comm_id), fabric.manager.address_of(*comm_id))
            else {
                continue;
            };
            if multicast_level(comm.igmp(), router.uses_multicast()) == 2 {
                actions.push(Action::JoinGroup {
                    member: address,
                    group: OSPF_MULTICAST_ALL,
                });
            } else {
                warn!(
                    "OSPF requires level 2 multicast conformance; {} may be non-functional",
                    comm.full_name()
                );
            }
        }
    }

    /// Every non-backbone area must share a router with a backbone area.
    fn verify_backbone(&self) -> Result<()> {
        for area in self.areas.values().filter(|area| !area.is_backbone()) {
            let connected = area.routers().iter().any(|router| {
                self.instances.get(router).is_some_and(|instance| {
                    instance
                        .areas
                        .iter()
                        .any(|other| self.areas.get(other).is_some_and(Area::is_backbone))
                })
            });
            if !connected {
                return Err(CommError::OspfBackbone { area: area.address() });
            }
        }
        Ok(())
    }

    /// Builds areas, roles, designated routers, area graphs and the initial
    /// link state of every OSPF router. Runs once.
    pub fn setup(&mut self, fabric: Fabric<'_>, rng: &mut StdRng) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        if self.initialized {
            return Ok(actions);
        }

        for (id, router) in fabric.routers {
            let Some(config) = ospf_config(router) else {
                continue;
            };
            let mut instance = OspfInstance::new(config.clone(), rng);
            for area_address in &config.areas {
                let backbone = *area_address == config.backbone;
                let area = self
                    .areas
                    .entry(*area_address)
                    .or_insert_with(|| Area::new(*area_address, backbone));
                if area.is_backbone() != backbone {
                    return Err(CommError::OspfInconsistentBackbone { area: *area_address });
                }
                area.add_router(*id);
                if !instance.areas.contains(area_address) {
                    instance.areas.push(*area_address);
                }
            }
            self.instances.insert(*id, instance);
        }

        for (id, router) in fabric.routers {
            if !self.instances.contains_key(id) {
                continue;
            }
            self.assign_role(*id, router)?;
            if router.is_turned_on() {
                Self::join_all_routers(&fabric, router, &mut actions);
            }
        }

        self.verify_backbone()?;

        let area_addresses: Vec<Address> = self.areas.keys().copied().collect();
        for area in &area_addresses {
            for network in self.area_networks(area, &fabric) {
                self.elect_designated(*area, network, &fabric, &mut actions);
            }
            let graph = self.area_truth_graph(area, &fabric);
            let designated: BTreeSet<RouterId> = self
                .areas
                .get(area)
                .map(|area| area.drs().chain(area.bdrs()).map(|(_, holder)| holder.router).collect())
                .unwrap_or_default();
            for router in designated {
                if let Some(instance) = self.instances.get_mut(&router) {
                    instance.graphs.insert(*area, graph.clone());
                }
            }
        }

        self.initialize_link_state(&fabric);
        self.initialized = true;
        info!(
            "OSPF initialized with {} routers in {} areas",
            self.instances.len(),
            self.areas.len()
        );
        Ok(actions)
    }

    /// A record for every ordered pair of area interfaces joined by a truth
    /// path.
    fn initialize_link_state(&mut self, fabric: &Fabric<'_>) {
        let truth = fabric.manager.graph();
        let mut records: Vec<(RouterId, Address, LinkStateData)> = Vec::new();

        for area in self.areas.values() {
            let interfaces: Vec<(RouterId, Address, Address)> = area
                .routers()
                .iter()
                .filter(|router| fabric.router(**router).is_some_and(Router::is_turned_on))
                .flat_map(|router| {
                    fabric
                        .interfaces_of(*router)
                        .into_iter()
                        .map(move |interface| (*router, interface))
                })
                .filter_map(|(router, interface)| {
                    Some((router, interface, Self::network_of(fabric, &interface)?))
                })
                .collect();

            for (router, local, local_network) in &interfaces {
                for (_, remote, remote_network) in &interfaces {
                    if local == remote || truth.find_any_path(local, remote).is_none() {
                        continue;
                    }
                    records.push((
                        *router,
                        area.address(),
                        LinkStateData {
                            local: *local,
                            remote: *remote,
                            local_network: *local_network,
                            remote_network: *remote_network,
                            last_update: 0.0,
                        },
                    ));
                }
            }
        }

        for (router, area, record) in records {
            if let Some(instance) = self.instances.get_mut(&router) {
                instance.link_states.add(area, record);
            }
        }
    }

    /// Elects the DR of `network`, promoting the BDR when there is one,
    /// then elects a new BDR.
    fn elect_designated(&mut self, area: Address, network: Address, fabric: &Fabric<'_>, actions: &mut Vec<Action>) {
        let promoted = self.areas.get(&area).and_then(|entry| entry.bdr_holder(&network));
        if let Some(bdr) = promoted {
            if let Some(entry) = self.areas.get_mut(&area) {
                entry.set_dr(network, Some(bdr));
                entry.set_bdr(network, None);
            }
            info!("OSPF area {} network {}: BDR {} promoted to DR", area, network, bdr.router);
            self.elect_backup(area, network, fabric, actions);
            return;
        }

        let candidates = self.candidates(&area, &network, fabric);
        let winner = elect(&candidates, None);
        if let Some(entry) = self.areas.get_mut(&area) {
            entry.set_dr(network, winner);
        }
        match winner {
            Some(winner) => {
                debug!("OSPF area {} network {}: DR {}", area, network, winner.interface);
                actions.push(Action::JoinGroup {
                    member: winner.interface,
                    group: OSPF_MULTICAST_DR,
                });
                self.elect_backup(area, network, fabric, actions);
            }
            None => warn!(
                "No designated router could be elected for network {} in area {}",
                network, area
            ),
        }
    }

    fn elect_backup(&mut self, area: Address, network: Address, fabric: &Fabric<'_>, actions: &mut Vec<Action>) {
        let Some(dr) = self.areas.get(&area).and_then(|entry| entry.dr(&network)) else {
            warn!("BDR election for network {} in area {} without a DR", network, area);
            return;
        };
        let candidates = self.candidates(&area, &network, fabric);
        let winner = elect(&candidates, Some(dr));
        if let Some(entry) = self.areas.get_mut(&area) {
            entry.set_bdr(network, winner);
        }
        let Some(winner) = winner else {
            return;
        };

        debug!("OSPF area {} network {}: BDR {}", area, network, winner.interface);
        let graph = self
            .instances
            .get(&dr)
            .and_then(|instance| instance.graphs.get(&area))
            .cloned();
        if let (Some(graph), Some(instance)) = (graph, self.instances.get_mut(&winner.router)) {
            instance.graphs.insert(area, graph);
        }
        actions.push(Action::JoinGroup {
            member: winner.interface,
            group: OSPF_MULTICAST_DR,
        });
    }

    /// Gives the DR of `network` an area graph if it has none.
    fn ensure_graph(&mut self, area: Address, network: &Address, fabric: &Fabric<'_>) {
        let Some(dr) = self.areas.get(&area).and_then(|entry| entry.dr(network)) else {
            return;
        };
        if self.instances.get(&dr).is_some_and(|instance| instance.graphs.contains_key(&area)) {
            return;
        }
        let graph = self.area_truth_graph(&area, fabric);
        if let Some(instance) = self.instances.get_mut(&dr) {
            instance.graphs.insert(area, graph);
        }
    }

    /// Joins a router that came up after initialization.
    pub fn add_router(
        &mut self,
        fabric: Fabric<'_>,
        id: RouterId,
        rng: &mut StdRng,
        actions: &mut Vec<Action>,
    ) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        let Some(router) = fabric.router(id) else {
            return Ok(());
        };
        if let Some(instance) = self.instances.get(&id) {
            let areas = instance.areas.clone();
            self.assign_role(id, router)?;
            Self::join_all_routers(&fabric, router, actions);
            self.fill_vacancies(id, &areas, &fabric, actions);
            return Ok(());
        }
        let Some(config) = ospf_config(router) else {
            return Ok(());
        };

        let mut instance = OspfInstance::new(config.clone(), rng);
        for area_address in &config.areas {
            match self.areas.get_mut(area_address) {
                Some(area) => {
                    if area.is_backbone() != (*area_address == config.backbone) {
                        return Err(CommError::OspfInconsistentBackbone { area: *area_address });
                    }
                    area.add_router(id);
                }
                None => {
                    let mut area = Area::new(*area_address, *area_address == config.backbone);
                    area.add_router(id);
                    self.areas.insert(*area_address, area);
                }
            }
            if !instance.areas.contains(area_address) {
                instance.areas.push(*area_address);
            }
        }
        let areas = instance.areas.clone();
        self.instances.insert(id, instance);
        self.assign_role(id, router)?;
        Self::join_all_routers(&fabric, router, actions);
        self.verify_backbone()?;
        self.fill_vacancies(id, &areas, &fabric, actions);
        info!("OSPF router {} joined areas {:?}", router.name(), config.areas);
        Ok(())
    }

    /// Elects a DR, or else a BDR, on each network of `id` lacking one.
    fn fill_vacancies(&mut self, id: RouterId, areas: &[Address], fabric: &Fabric<'_>, actions: &mut Vec<Action>) {
        for area in areas {
            for interface in fabric.interfaces_of(id) {
                let Some(network) = Self::network_of(fabric, &interface) else {
                    continue;
                };
                let Some(entry) = self.areas.get(area) else {
                    continue;
                };
                if entry.dr(&network).is_none() {
                    self.elect_designated(*area, network, fabric, actions);
                    self.ensure_graph(*area, &network, fabric);
                } else if entry.bdr(&network).is_none() {
                    self.elect_backup(*area, network, fabric, actions);
                }
            }
        }
    }

    /// Drops deleted routers and immediately re-elects any DR or BDR they
    /// held.
    pub fn remove_routers(&mut self, removed: &[RouterId], fabric: Fabric<'_>, actions: &mut Vec<Action>) {
        for router in removed {
            self.instances.remove(router);
        }
        for entry in self.areas.values_mut() {
            for router in removed {
                entry.remove_router(*router);
            }
        }
        self.replace_designated(&fabric, actions);
    }

    /// Re-elects every DR and BDR that can no longer hold its role. A lost
    /// DR promotes its BDR.
    pub fn replace_designated(&mut self, fabric: &Fabric<'_>, actions: &mut Vec<Action>) {
        self.designated_dropped = false;
        let area_addresses: Vec<Address> = self.areas.keys().copied().collect();
        for area in area_addresses {
            let Some(entry) = self.areas.get_mut(&area) else {
                continue;
            };
            let lost_dr: Vec<Address> = entry
                .drs()
                .filter(|(_, holder)| !can_hold(fabric, holder))
                .map(|(network, _)| *network)
                .collect();
            let lost_bdr: Vec<Address> = entry
                .bdrs()
                .filter(|(_, holder)| !can_hold(fabric, holder))
                .map(|(network, _)| *network)
                .collect();
            for network in &lost_bdr {
                entry.set_bdr(*network, None);
            }
            for network in &lost_dr {
                entry.set_dr(*network, None);
            }

            for network in &lost_dr {
                info!("OSPF area {} network {} lost its DR", area, network);
                self.elect_designated(area, *network, fabric, actions);
                self.ensure_graph(area, network, fabric);
            }
            for network in lost_bdr.iter().filter(|network| !lost_dr.contains(network)) {
                info!("OSPF area {} network {} lost its BDR", area, network);
                self.elect_backup(area, *network, fabric, actions);
            }
        }
    }

    /// True once a received DrDrop named a designated interface; the owner
    /// then runs [`OspfDomain::replace_designated`].
    pub fn designated_dropped(&self) -> bool {
        self.designated_dropped
    }

    /// Schedules the first hello and timeout check of a running router.
    pub fn start(&self, ctx: &mut ProtocolContext<'_>) {
        let Some(instance) = self.instances.get(&ctx.router) else {
            return;
        };
        let hello = ctx.now + instance.config.hello_interval + instance.slop;
        let timeout = ctx.now + instance.config.hold_timer + instance.slop;
        ctx.schedule(
            hello,
            EventKind::OspfHello {
                router: ctx.router,
                epoch: ctx.epoch,
            },
        );
        ctx.schedule(
            timeout,
            EventKind::OspfTimeout {
                router: ctx.router,
                epoch: ctx.epoch,
            },
        );
    }

    /// Forgets the link state of a router that went down and hands its
    /// DR and BDR roles on.
    pub fn stop(&mut self, router: RouterId, fabric: Fabric<'_>, actions: &mut Vec<Action>) {
        let Some(instance) = self.instances.get_mut(&router) else {
            return;
        };
        instance.link_states.clear();
        instance.graphs.clear();
        instance.role = RouterRole::Inactive;
        self.replace_designated(&fabric, actions);
    }

    pub fn hello(&self, ctx: &mut ProtocolContext<'_>) {
        let Some(instance) = self.instances.get(&ctx.router) else {
            return;
        };
        for interface in ctx.interfaces.clone() {
            let network = ctx
                .manager
                .managing_network_address(&interface)
                .unwrap_or_else(|| interface.routing_prefix());
            ctx.send(
                interface,
                OSPF_MULTICAST_ALL,
                Body::Ospf(OspfPacket::Hello(HelloMessage {
                    source: interface,
                    network,
                    areas: instance.areas.clone(),
                })),
            );
        }
        ctx.schedule(
            ctx.now + instance.config.hello_interval + instance.slop,
            EventKind::OspfHello {
                router: ctx.router,
                epoch: ctx.epoch,
            },
        );
    }

    /// Removes link records older than the hold timer and tells the
    /// designated routers about each.
    pub fn timeout(&mut self, ctx: &mut ProtocolContext<'_>, reschedule: bool) {
        let Some(instance) = self.instances.get_mut(&ctx.router) else {
            return;
        };
        let hold = instance.config.hold_timer;
        for record in instance.link_states.expire(ctx.now, hold) {
            debug!("OSPF link {} -> {} timed out", record.local, record.remote);
            ctx.send(
                record.local,
                OSPF_MULTICAST_DR,
                Body::Ospf(OspfPacket::DrDrop(DrDropMessage {
                    dropped: record.remote,
                    network: record.remote_network,
                    areas: instance.areas.clone(),
                })),
            );
        }
        if reschedule {
            ctx.schedule(
                ctx.now + hold + instance.slop,
                EventKind::OspfTimeout {
                    router: ctx.router,
                    epoch: ctx.epoch,
                },
            );
        }
    }

    /// Handles an OSPF packet received on `receiving`. Never requests
    /// forwarding itself; packets for foreign areas set `override_forward`.
    pub fn receive(&mut self, ctx: &mut ProtocolContext<'_>, receiving: Address, message: &Message) -> bool {
        let Body::Ospf(packet) = message.body() else {
            return false;
        };
        let router = ctx.router;
        let Some(instance) = self.instances.get(&router) else {
            return false;
        };
        let matching: Vec<Address> = packet
            .areas()
            .iter()
            .filter(|area| instance.areas.contains(*area))
            .copied()
            .collect();
        if matching.is_empty() {
            ctx.override_forward = true;
            return false;
        }
        let Some(network) = ctx.manager.managing_network_address(&receiving) else {
            return false;
        };

        match packet {
            OspfPacket::Hello(hello) => {
                self.receive_hello(ctx, receiving, network, &matching, hello, message.trace_route());
            }
            OspfPacket::DrAdd(add) => {
                for area in &matching {
                    if self.is_designated(area, &network, router) {
                        if let Some(instance) = self.instances.get_mut(&router) {
                            graph_add(
                                instance.graphs.entry(*area).or_insert_with(Graph::new),
                                receiving,
                                &add.trace_route,
                            );
                        }
                    }
                }
            }
            OspfPacket::DrDrop(drop) => {
                for area in &matching {
                    if !self.is_designated(area, &network, router) {
                        continue;
                    }
                    let holds_role = self.areas.get(area).is_some_and(|entry| {
                        [entry.dr_holder(&drop.network), entry.bdr_holder(&drop.network)]
                            .iter()
                            .flatten()
                            .any(|holder| holder.interface == drop.dropped)
                    });
                    if holds_role {
                        debug!("OSPF area {}: designated interface {} dropped", area, drop.dropped);
                        self.designated_dropped = true;
                    }
                    if let Some(graph) = self
                        .instances
                        .get_mut(&router)
                        .and_then(|instance| instance.graphs.get_mut(area))
                    {
                        graph.remove_node(&drop.dropped);
                    }
                }
            }
        }
        false
    }

    fn is_designated(&self, area: &Address, network: &Address, router: RouterId) -> bool {
        self.areas
            .get(area)
            .is_some_and(|area| area.is_designated(network, router))
    }

    fn receive_hello(
        &mut self,
        ctx: &mut ProtocolContext<'_>,
        receiving: Address,
        network: Address,
        matching: &[Address],
        hello: &HelloMessage,
        trace: &[Address],
    ) {
        let router = ctx.router;
        for area in matching {
            let designated = self.is_designated(area, &network, router);
            let Some(instance) = self.instances.get_mut(&router) else {
                return;
            };
            if let Some(record) = instance.link_states.find_mut(area, &receiving, &hello.source) {
                record.last_update = ctx.now;
                continue;
            }

            instance.link_states.add(
                *area,
                LinkStateData {
                    local: receiving,
                    remote: hello.source,
                    local_network: network,
                    remote_network: hello.network,
                    last_update: ctx.now,
                },
            );
            if designated {
                graph_add(
                    instance.graphs.entry(*area).or_insert_with(Graph::new),
                    receiving,
                    trace,
                );
            }

            let mut trace_route = trace.to_vec();
            trace_route.push(receiving);
            ctx.send(
                receiving,
                OSPF_MULTICAST_DR,
                Body::Ospf(OspfPacket::DrAdd(DrAddMessage {
                    destination: receiving,
                    trace_route,
                    areas: instance.areas.clone(),
                })),
            );
        }
        self.timeout(ctx, false);
    }

    /// Least-hop path in the area graph held by the DR of `network`.
    fn area_path(&self, area: &Address, network: &Address, source: Address, destination: Address) -> Option<RouteData> {
        let dr = self.areas.get(area)?.dr(network)?;
        let graph = self.instances.get(&dr)?.graphs.get(area)?;
        let result = graph.find_path(&source, &destination, &LeastHops)?;
        RouteData::from_path(result.path, result.cost)
    }

    fn cheapest(routes: impl Iterator<Item = RouteData>) -> Option<RouteData> {
        routes.min_by(|a, b| a.cost.total_cmp(&b.cost))
    }

    /// Area holding link state for `destination`, searched recursively
    /// through the areas of every reachable member router.
    fn contiguous_area(&self, router: RouterId, destination: &Address, checked: &mut BTreeSet<Address>) -> Option<Address> {
        let instance = self.instances.get(&router)?;
        for area_address in &instance.areas {
            if !checked.insert(*area_address) {
                continue;
            }
            let Some(area) = self.areas.get(area_address) else {
                continue;
            };
            for member in area.routers() {
                let holds = self
                    .instances
                    .get(member)
                    .is_some_and(|other| !other.link_states.find_remote(area_address, destination).is_empty());
                if holds {
                    return Some(*area_address);
                }
                if let Some(found) = self.contiguous_area(*member, destination, checked) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn all_boundary_routers(&self, router: RouterId, checked: &mut BTreeSet<Address>, found: &mut BTreeSet<RouterId>) {
        let Some(instance) = self.instances.get(&router) else {
            return;
        };
        for area_address in &instance.areas {
            if !checked.insert(*area_address) {
                continue;
            }
            let Some(area) = self.areas.get(area_address) else {
                continue;
            };
            for member in area.routers() {
                if self
                    .instances
                    .get(member)
                    .is_some_and(|other| other.role == RouterRole::BoundaryRouter)
                {
                    found.insert(*member);
                }
                self.all_boundary_routers(*member, checked, found);
            }
        }
    }

    /// From a backbone router: toward the border interface holding link
    /// state for `destination` in a non-backbone area.
    fn route_from_backbone(
        &self,
        instance: &OspfInstance,
        network: &Address,
        xmtr: Address,
        destination: Address,
    ) -> Option<RouteData> {
        let mut routes = Vec::new();
        for backbone in instance
            .areas
            .iter()
            .filter(|area| self.areas.get(*area).is_some_and(Area::is_backbone))
        {
            let Some(area) = self.areas.get(backbone) else {
                continue;
            };
            for member in area.routers() {
                let Some(border) = self.instances.get(member).filter(|other| other.is_border()) else {
                    continue;
                };
                for other_area in border
                    .areas
                    .iter()
                    .filter(|other| !self.areas.get(*other).is_some_and(Area::is_backbone))
                {
                    for record in border.link_states.find_remote(other_area, &destination) {
                        routes.extend(self.area_path(backbone, network, xmtr, record.local));
                    }
                }
            }
        }
        Self::cheapest(routes.into_iter())
    }

    /// From a non-backbone router: toward the nearest border interface that
    /// sits in the backbone.
    fn route_to_backbone(
        &self,
        ctx: &RoutingContext<'_>,
        instance: &OspfInstance,
        network: &Address,
        xmtr: Address,
    ) -> Option<RouteData> {
        let mut routes = Vec::new();
        for area_address in &instance.areas {
            let Some(area) = self.areas.get(area_address) else {
                continue;
            };
            for member in area.routers() {
                let in_backbone = self.instances.get(member).is_some_and(|border| {
                    border.is_border()
                        && border
                            .areas
                            .iter()
                            .any(|other| self.areas.get(other).is_some_and(Area::is_backbone))
                });
                if !in_backbone {
                    continue;
                }
                for interface in ctx.fabric.interfaces_of(*member) {
                    if instance.link_states.find(area_address, &xmtr, &interface).is_some() {
                        routes.extend(self.area_path(area_address, network, xmtr, interface));
                    }
                }
            }
        }
        Self::cheapest(routes.into_iter())
    }

    /// Cheapest external route offered by any reachable ASBR, with the ASBR
    /// interface it starts from.
    fn route_externally(&self, ctx: &RoutingContext<'_>, message: &Message) -> Option<(Address, RouterId)> {
        let mut found = BTreeSet::new();
        self.all_boundary_routers(ctx.router, &mut BTreeSet::new(), &mut found);

        let mut best: Option<(f64, Address, RouterId)> = None;
        for asbr in found {
            let Some(router) = ctx.fabric.router(asbr) else {
                continue;
            };
            let view = ctx.for_router(asbr);
            for interface in &view.interfaces {
                for protocol in router.protocols().iter().filter(|protocol| is_external(protocol)) {
                    let Some(route) = protocol.routing(&view, *interface, message) else {
                        continue;
                    };
                    if best.is_none_or(|(cost, _, _)| route.cost < cost) {
                        best = Some((route.cost, *interface, asbr));
                    }
                }
            }
        }
        best.map(|(_, interface, asbr)| (interface, asbr))
    }

    pub fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        let destination = message.destination();
        if reserved::is_multicast(&destination) {
            return None;
        }
        let instance = self.instances.get(&ctx.router)?;
        let network = ctx.manager().managing_network_address(&xmtr)?;
        let in_backbone = instance
            .areas
            .iter()
            .any(|area| self.areas.get(area).is_some_and(Area::is_backbone));

        for area in &instance.areas {
            if instance.link_states.find(area, &xmtr, &destination).is_some() {
                if let Some(route) = self.area_path(area, &network, xmtr, destination) {
                    return Some(route);
                }
            }
        }

        if self.contiguous_area(ctx.router, &destination, &mut BTreeSet::new()).is_some() {
            return if in_backbone {
                self.route_from_backbone(instance, &network, xmtr, destination)
            } else {
                self.route_to_backbone(ctx, instance, &network, xmtr)
            };
        }

        let (asbr_interface, asbr) = self.route_externally(ctx, message)?;
        if asbr == ctx.router {
            // Left to this router's own external protocols.
            return None;
        }
        let shared = instance.areas.iter().find(|area| {
            self.instances
                .get(&asbr)
                .is_some_and(|other| other.areas.contains(*area))
                && instance.link_states.find(*area, &xmtr, &asbr_interface).is_some()
        });
        match shared {
            Some(area) => self.area_path(area, &network, xmtr, asbr_interface),
            None if in_backbone => self.route_from_backbone(instance, &network, xmtr, asbr_interface),
            None => self.route_to_backbone(ctx, instance, &network, xmtr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn trace_routes_become_edge_chains() {
        let mut graph = Graph::new();
        graph_add(&mut graph, addr("10.0.0.3"), &[addr("10.0.0.1"), addr("10.0.0.2")]);
        assert_eq!(graph.node_count(), 3);
        assert!(graph.find_edge(&addr("10.0.0.1"), &addr("10.0.0.2")).is_some());
        assert!(graph.find_edge(&addr("10.0.0.2"), &addr("10.0.0.3")).is_some());

        // receiving interface already at the end of the trace
        graph_add(&mut graph, addr("10.0.0.3"), &[addr("10.0.0.2"), addr("10.0.0.3")]);
        assert!(graph.find_edge(&addr("10.0.0.3"), &addr("10.0.0.3")).is_none());
        assert_eq!(graph.edge_count(), 2);
    }
}
