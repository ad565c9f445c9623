use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::address::Address;
use crate::comm::Comm;
use crate::config::router_config::RouterConfig;
use crate::config::{ActionKind, CommConfig, ScenarioConfig};
use crate::error::{CommError, Result};
use crate::layer;
use crate::message::{Body, InteractionResult, Message, Payload};
use crate::network::{NetworkKind, NetworkManager};
use crate::observer::{FailureReason, Notification, Observer, SubscriptionId};
use crate::protocol::{Action, Fabric, OspfDomain, Protocol, ProtocolContext, Rip, RoutingContext};
use crate::reserved::{self, BROADCAST_LOCAL, OSPF_MULTICAST_ALL, OSPF_MULTICAST_DR};
use crate::router::{Router, SendData, SendOutcome};
use crate::scheduler::{EventKind, EventQueue};
use crate::{CommId, RouterId};

/// A named group of comms and routers, deleted as a unit.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    comms: Vec<CommId>,
    routers: Vec<RouterId>,
}

impl Platform {
    pub fn comms(&self) -> &[CommId] {
        &self.comms
    }

    pub fn routers(&self) -> &[RouterId] {
        &self.routers
    }
}

/// The arena owning every comm, router and registry of one fabric, and the
/// event loop driving them.
pub struct Simulation {
    queue: EventQueue,
    manager: NetworkManager,
    comms: BTreeMap<CommId, Comm>,
    routers: BTreeMap<RouterId, Router>,
    platforms: BTreeMap<String, Platform>,
    ospf: OspfDomain,
    observer: Observer,
    rng: StdRng,
    next_serial: u64,
    next_comm: usize,
    next_router: usize,
    initialized: bool,
}

fn missing_comm(comm: CommId) -> CommError {
    CommError::Invariant(format!("{} does not exist", comm))
}

fn missing_router(router: RouterId) -> CommError {
    CommError::Invariant(format!("{} does not exist", router))
}

fn rip_of(router: &mut Router) -> Option<&mut Rip> {
    router.protocols_mut().iter_mut().find_map(Protocol::as_rip_mut)
}

impl Simulation {
    pub fn new(seed: u64) -> Self {
        Self {
            queue: EventQueue::new(),
            manager: NetworkManager::new(),
            comms: BTreeMap::new(),
            routers: BTreeMap::new(),
            platforms: BTreeMap::new(),
            ospf: OspfDomain::new(),
            observer: Observer::new(),
            rng: StdRng::seed_from_u64(seed),
            next_serial: 1,
            next_comm: 0,
            next_router: 0,
            initialized: false,
        }
    }

    /// Builds and initializes the fabric described by `config`, and
    /// schedules its timed actions.
    pub fn from_config(config: &ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let mut simulation = Self::new(config.seed);

        for address in &config.reserved {
            simulation.manager.reserved_mut().reserve(*address);
        }
        for network in &config.networks {
            simulation.add_network(
                &network.name,
                network.address.unwrap_or(Address::NULL),
                network.kind.clone(),
                network.suppress_reserved_check,
            )?;
        }

        let mut membership: BTreeMap<&str, &str> = BTreeMap::new();
        for network in &config.networks {
            for member in &network.members {
                if membership.insert(member.as_str(), network.name.as_str()).is_some() {
                    return Err(CommError::configuration(
                        format!("network {}", network.name),
                        member,
                        "comm is listed by more than one network",
                    ));
                }
            }
        }

        for platform in &config.platforms {
            simulation.add_platform(&platform.name)?;
            for router in platform.effective_routers() {
                simulation.add_router(&platform.name, &router)?;
            }
            for comm in &platform.comms {
                let full_name = format!("{}.{}", platform.name, comm.name);
                let mut comm = comm.clone();
                if let Some(listed) = membership.remove(full_name.as_str()) {
                    if let Some(own) = comm.network.as_deref().filter(|own| *own != listed) {
                        return Err(CommError::configuration(
                            format!("comm {}", full_name),
                            own,
                            format!("comm is also listed as a member of network {}", listed),
                        ));
                    }
                    comm.network = Some(listed.to_string());
                }
                simulation.add_comm(&platform.name, &comm)?;
            }
        }
        for (member, network) in membership {
            warn!("Network {} lists unknown member {}; skipped", network, member);
        }

        for network in &config.networks {
            for link in &network.links {
                let endpoints = simulation
                    .resolve(&link.source)
                    .and_then(|source| Ok((source, simulation.resolve(&link.destination)?)));
                let linked = endpoints.is_ok_and(|(source, destination)| {
                    simulation.manager.add_network_link(0.0, &network.name, source, destination)
                });
                if !linked {
                    warn!(
                        "Network {} link {} -> {} has unknown endpoints; skipped",
                        network.name, link.source, link.destination
                    );
                }
            }
        }
        for connection in &config.connections {
            let source = simulation.resolve(&connection.source)?;
            let destination = simulation.resolve(&connection.destination)?;
            if !simulation.add_connection(source, destination) {
                return Err(CommError::configuration(
                    "connection",
                    format!("{} -> {}", connection.source, connection.destination),
                    "endpoints are not managed addresses",
                ));
            }
        }

        simulation.initialize()?;
        for action in &config.actions {
            simulation.check_action(&action.action)?;
            simulation.schedule(action.time, EventKind::Scenario(action.action.clone()));
        }
        Ok(simulation)
    }

    // --- construction ----------------------------------------------------

    pub fn add_platform(&mut self, name: &str) -> Result<()> {
        if self.platforms.contains_key(name) {
            return Err(CommError::configuration("platform", name, "duplicate platform name"));
        }
        self.platforms.insert(name.to_string(), Platform::default());
        Ok(())
    }

    pub fn add_network(
        &mut self,
        name: &str,
        address: Address,
        kind: NetworkKind,
        suppress_reserved_check: bool,
    ) -> Result<()> {
        if !address.is_null()
            && !suppress_reserved_check
            && self.manager.reserved().is_network_reserved(&address.routing_prefix())
        {
            return Err(CommError::ReservedCollision { address });
        }
        let now = self.now();
        if !self
            .manager
            .add_network(now, name, address, kind, suppress_reserved_check)
        {
            return Err(CommError::configuration(
                format!("network {}", name),
                address,
                "duplicate name or overlapping subnet",
            ));
        }
        self.flush_notifications();
        Ok(())
    }

    /// Routers start switched off; `initialize` or `turn_on_router` brings
    /// them up.
    pub fn add_router(&mut self, platform: &str, config: &RouterConfig) -> Result<RouterId> {
        let Some(entry) = self.platforms.get_mut(platform) else {
            return Err(CommError::configuration(
                format!("router {}", config.name),
                platform,
                "unknown platform",
            ));
        };
        let duplicate = entry
            .routers
            .iter()
            .any(|id| self.routers.get(id).is_some_and(|router| router.name() == config.name));
        if duplicate {
            return Err(CommError::configuration(
                format!("platform {}", platform),
                &config.name,
                "duplicate router name",
            ));
        }

        let id = RouterId(self.next_router);
        let router = Router::new(id, platform, config)?;
        self.next_router += 1;
        entry.routers.push(id);
        self.routers.insert(id, router);
        debug!("Router {}.{} registered as {}", platform, config.name, id);
        Ok(id)
    }

    /// Binds a new comm to an address and attaches it to its router.
    pub fn add_comm(&mut self, platform: &str, config: &CommConfig) -> Result<CommId> {
        let full_name = format!("{}.{}", platform, config.name);
        let object = format!("comm {}", full_name);
        let Some(entry) = self.platforms.get(platform) else {
            return Err(CommError::configuration(object, platform, "unknown platform"));
        };
        if entry
            .comms
            .iter()
            .any(|id| self.comms.get(id).is_some_and(|comm| comm.name() == config.name))
        {
            return Err(CommError::configuration(object, &config.name, "duplicate comm name"));
        }
        let router = match &config.router {
            Some(name) => entry
                .routers
                .iter()
                .copied()
                .find(|id| self.routers.get(id).is_some_and(|router| router.name() == name)),
            None => entry.routers.first().copied(),
        };
        let Some(router) = router else {
            return Err(CommError::configuration(
                object,
                config.router.as_deref().unwrap_or("<default>"),
                "no such router on the platform",
            ));
        };
        if !config.transmit_delay.is_finite() || config.transmit_delay < 0.0 {
            return Err(CommError::configuration(
                object,
                config.transmit_delay,
                "transmit delay must be non-negative",
            ));
        }

        let now = self.now();
        let id = CommId(self.next_comm);
        let address = match config.address {
            Some(address) => {
                if self.manager.reserved().is_reserved(&address) {
                    return Err(CommError::ReservedCollision { address });
                }
                self.manager
                    .add_comm_with_address(now, id, &full_name, address)
                    .map(|_| address)
            }
            None => {
                if let Some(network) = &config.network {
                    if self.manager.network(network).is_none() {
                        return Err(CommError::configuration(object, network, "unknown network"));
                    }
                }
                let address = self.manager.add_comm(now, id, &full_name, config.network.as_deref());
                (!address.is_null()).then_some(address)
            }
        };
        let Some(address) = address else {
            let value = config
                .address
                .map(|address| address.to_string())
                .or_else(|| config.network.clone())
                .unwrap_or_default();
            return Err(CommError::configuration(object, value, "no address could be bound"));
        };

        self.next_comm += 1;
        self.comms.insert(
            id,
            Comm::new(id, &config.name, platform, router, config.transmit_delay, &config.igmp),
        );
        if let Some(entry) = self.platforms.get_mut(platform) {
            entry.comms.push(id);
        }
        self.attach_interface(router, id);
        if let Some(gateway) = config.gateway {
            if let Some(router) = self.routers.get_mut(&router) {
                if router.gateway().is_none() {
                    router.set_gateway(Some(gateway));
                }
            }
        }
        for group in &config.groups {
            self.join_group(id, *group)?;
        }

        info!("Comm {} bound to {}", full_name, address);
        self.flush_notifications();
        Ok(id)
    }

    /// Registers `comm` with its router, bridging it to the router's other
    /// interfaces when automated linking is on.
    fn attach_interface(&mut self, router: RouterId, comm: CommId) {
        let now = self.now();
        let Some(entry) = self.routers.get_mut(&router) else {
            return;
        };
        let Some(existing) = entry.add_interface(comm) else {
            return;
        };
        if !entry.automated_interface_linking() {
            return;
        }
        for other in existing {
            self.manager.add_connection_between(now, comm, other);
            self.manager.add_connection_between(now, other, comm);
        }
    }

    /// Switches everything on, sets up OSPF and validates gateways.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let comms: Vec<CommId> = self.comms.keys().copied().collect();
        for comm in comms {
            self.turn_on_comm(comm)?;
        }
        let routers: Vec<RouterId> = self.routers.keys().copied().collect();
        for router in &routers {
            self.turn_on_router(*router)?;
        }

        let fabric = Fabric {
            manager: &self.manager,
            routers: &self.routers,
            comms: &self.comms,
        };
        let actions = self.ospf.setup(fabric, &mut self.rng)?;
        self.apply_actions(actions)?;
        for router in routers {
            self.with_router(router, |_, ospf, ctx| ospf.start(ctx))?;
        }

        for router in self.routers.values_mut() {
            router.validate_gateway(&self.manager);
        }
        self.initialized = true;
        self.flush_notifications();
        info!(
            "Fabric initialized: {} comms, {} routers, {} platforms",
            self.comms.len(),
            self.routers.len(),
            self.platforms.len()
        );
        Ok(())
    }

    // --- event loop ------------------------------------------------------

    pub fn now(&self) -> f64 {
        self.queue.now()
    }

    pub fn schedule(&mut self, time: f64, event: EventKind) {
        self.queue.push(time, event);
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.next_event_time()
    }

    /// Executes the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> Result<bool> {
        self.flush_notifications();
        let Some((_, event)) = self.queue.pop() else {
            return Ok(false);
        };
        self.dispatch(event)?;
        self.flush_notifications();
        Ok(true)
    }

    /// Runs every event up to and including `end`, then moves the clock to
    /// `end`. Returns the number of events executed.
    pub fn run_until(&mut self, end: f64) -> Result<usize> {
        let span = tracing::info_span!("run_until", end);
        let _guard = span.enter();

        let mut executed = 0;
        while self.queue.next_event_time().is_some_and(|time| time <= end) {
            self.step()?;
            executed += 1;
        }
        self.queue.advance_to(end);
        debug!("Ran {} events up to {:.3}", executed, end);
        Ok(executed)
    }

    fn is_live(&self, router: RouterId, epoch: u64) -> bool {
        self.routers
            .get(&router)
            .is_some_and(|router| router.is_turned_on() && router.epoch() == epoch)
    }

    fn dispatch(&mut self, event: EventKind) -> Result<()> {
        match event {
            EventKind::Deliver {
                xmtr,
                epoch,
                rcvr,
                message,
            } => self.deliver(xmtr, epoch, rcvr, message),
            EventKind::RipUpdate {
                router,
                epoch,
                triggered,
            } => {
                if !self.is_live(router, epoch) {
                    return Ok(());
                }
                self.with_router(router, |router, _, ctx| {
                    if let Some(rip) = rip_of(router) {
                        rip.update(ctx, triggered);
                    }
                })
            }
            EventKind::RipInvalidate {
                router,
                epoch,
                destination,
                anticipated,
            } => {
                if !self.is_live(router, epoch) {
                    return Ok(());
                }
                self.with_router(router, |router, _, ctx| {
                    if let Some(rip) = rip_of(router) {
                        rip.invalidate(ctx, destination, anticipated);
                    }
                })
            }
            EventKind::RipCollect {
                router,
                epoch,
                destination,
                invalidation,
            } => {
                if self.is_live(router, epoch) {
                    if let Some(rip) = self.routers.get_mut(&router).and_then(rip_of) {
                        rip.collect(&destination, invalidation);
                    }
                }
                Ok(())
            }
            EventKind::OspfHello { router, epoch } => {
                if !self.is_live(router, epoch) {
                    return Ok(());
                }
                self.with_router(router, |_, ospf, ctx| ospf.hello(ctx))
            }
            EventKind::OspfTimeout { router, epoch } => {
                if !self.is_live(router, epoch) {
                    return Ok(());
                }
                self.with_router(router, |_, ospf, ctx| ospf.timeout(ctx, true))
            }
            EventKind::IgmpMembership {
                comm,
                epoch,
                group,
                join,
            } => {
                self.complete_membership(comm, epoch, group, join);
                Ok(())
            }
            EventKind::AdHocHook { router, epoch, hook } => {
                if self.is_live(router, epoch) {
                    if let Some(router) = self.routers.get_mut(&router) {
                        router.run_adhoc_hook(hook);
                    }
                }
                Ok(())
            }
            EventKind::Scenario(action) => {
                if let Err(error) = self.apply_scenario(&action) {
                    warn!("Skipping scenario action {}: {}", action.name(), error);
                }
                Ok(())
            }
        }
    }

    /// Runs `handler` with a protocol context for `id`, then applies the
    /// actions it requested.
    fn with_router<F>(&mut self, id: RouterId, handler: F) -> Result<()>
    where
        F: FnOnce(&mut Router, &mut OspfDomain, &mut ProtocolContext<'_>),
    {
        let interfaces = self.fabric().interfaces_of(id);
        let now = self.now();
        let Some(router) = self.routers.get_mut(&id) else {
            return Err(missing_router(id));
        };
        let mut ctx = ProtocolContext::new(now, id, router.epoch(), interfaces, &self.manager, &mut self.rng);
        handler(router, &mut self.ospf, &mut ctx);
        let actions = std::mem::take(&mut ctx.actions);
        self.apply_actions(actions)
    }

    fn apply_actions(&mut self, actions: Vec<Action>) -> Result<()> {
        let now = self.now();
        for action in actions {
            match action {
                Action::Send { from, to, body } => self.send_control(from, to, body)?,
                Action::Schedule { time, event } => self.queue.push(time, event),
                Action::JoinGroup { member, group } => {
                    self.manager.add_multicast_member(now, group, member);
                    if let Some(comm) = self.manager.comm_at(&member).and_then(|id| self.comms.get_mut(&id)) {
                        comm.igmp_mut().force_join(group);
                    }
                }
                Action::LeaveGroup { member, group } => {
                    self.manager.remove_multicast_member(now, group, member);
                    if let Some(comm) = self.manager.comm_at(&member).and_then(|id| self.comms.get_mut(&id)) {
                        comm.igmp_mut().force_leave(&group);
                    }
                }
            }
        }
        Ok(())
    }

    fn fabric(&self) -> Fabric<'_> {
        Fabric {
            manager: &self.manager,
            routers: &self.routers,
            comms: &self.comms,
        }
    }

    // --- notifications ---------------------------------------------------

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(f64, &Notification) + 'static,
    {
        self.observer.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observer.unsubscribe(id)
    }

    fn notify(&mut self, notification: Notification) {
        let now = self.now();
        self.manager.queue_notification(now, notification);
    }

    /// Mirrors queued truth changes into the routers, then hands every
    /// queued notification to the subscribers.
    pub fn flush_notifications(&mut self) {
        loop {
            let pending = self.manager.drain_notifications();
            if pending.is_empty() {
                break;
            }
            for (time, notification) in pending {
                if notification.is_truth_change() {
                    self.mirror(&notification);
                }
                self.observer.notify(time, &notification);
            }
        }
    }

    fn mirror(&mut self, notification: &Notification) {
        let routers: Vec<RouterId> = self.routers.keys().copied().collect();
        for id in routers {
            let result = self.with_router(id, |router, _, ctx| router.perfect(ctx, notification));
            if let Err(error) = result {
                warn!("Router {} could not apply {}: {}", id, notification.kind_name(), error);
            }
        }
    }

    // --- sending and receiving -------------------------------------------

    fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Sends a data message from `comm`. Returns the message serial; the
    /// outcome is reported through notifications.
    pub fn send_data(&mut self, comm: CommId, destination: Address, text: impl Into<String>) -> Result<u64> {
        self.send(comm, destination, Body::Data(text.into()))
    }

    pub fn send(&mut self, comm: CommId, destination: Address, body: Body) -> Result<u64> {
        let serial = self.originate(comm, destination, body)?;
        self.flush_notifications();
        Ok(serial)
    }

    fn originate(&mut self, comm: CommId, destination: Address, body: Body) -> Result<u64> {
        let Some(source) = self.manager.address_of(comm) else {
            return Err(CommError::Invariant(format!("{} has no address", comm)));
        };
        let turned_on = self.comms.get(&comm).ok_or_else(|| missing_comm(comm))?.is_turned_on();
        let serial = self.next_serial();
        if !turned_on {
            debug!("Serial {} dropped: {} is off", serial, comm);
            self.notify(Notification::MessageDiscarded {
                serial,
                at: source,
                reason: FailureReason::TransmitterOff,
            });
            return Ok(serial);
        }
        if destination.is_null() {
            self.notify(Notification::MessageFailedRouting {
                serial,
                at: source,
                destination,
                reason: FailureReason::UnresolvableDestination,
            });
            return Ok(serial);
        }

        let mut message = Message::new(Payload::new(serial, source, destination, body));
        if !layer::send_upper(&mut message) || !layer::send_network(&mut message) {
            self.discard(serial, source, FailureReason::LayerRejected);
            return Ok(serial);
        }
        if destination == source {
            message.set_next_hop(source);
            message.append_trace(source);
            self.transmit(comm, source, message);
            return Ok(serial);
        }
        self.route(comm, source, message)?;
        Ok(serial)
    }

    /// Sends protocol traffic. OSPF groups are fanned out to every member
    /// by a multicast-capable router; other groups reach only link-local
    /// peers that joined them. Unicast to a direct neighbour skips routing.
    fn send_control(&mut self, from: Address, to: Address, body: Body) -> Result<()> {
        let Some(comm) = self.manager.comm_at(&from) else {
            debug!("Dropping control traffic from unmanaged {}", from);
            return Ok(());
        };
        let multicast = reserved::is_multicast(&to);
        if !multicast && self.manager.graph().find_edge(&from, &to).is_none() {
            self.originate(comm, to, body)?;
            return Ok(());
        }
        if multicast && (to == OSPF_MULTICAST_ALL || to == OSPF_MULTICAST_DR) && self.fans_out(comm) {
            let others = self
                .manager
                .multicast_members(&to)
                .iter()
                .any(|member| *member != from);
            if others {
                self.originate(comm, to, body)?;
            }
            return Ok(());
        }

        let peers: Vec<Address> = if multicast {
            self.manager
                .link_local_peers(&from)
                .into_iter()
                .filter(|peer| self.manager.has_multicast_member(&to, peer))
                .filter(|peer| self.manager.graph().find_edge(&from, peer).is_some())
                .collect()
        } else {
            vec![to]
        };
        if peers.is_empty() {
            return Ok(());
        }

        let Some(entry) = self.comms.get(&comm) else {
            return Err(missing_comm(comm));
        };
        let hop_limit = self
            .routers
            .get(&entry.router())
            .map(Router::hop_limit)
            .unwrap_or(1);
        let turned_on = entry.is_turned_on();
        let serial = self.next_serial();
        if !turned_on {
            self.discard(serial, from, FailureReason::TransmitterOff);
            return Ok(());
        }

        let mut message = Message::new(Payload::new(serial, from, to, body));
        if !layer::send_upper(&mut message) || !layer::send_network(&mut message) {
            self.discard(serial, from, FailureReason::LayerRejected);
            return Ok(());
        }
        message.set_ttl(hop_limit);
        message.append_trace(from);
        for peer in peers {
            let mut copy = message.clone();
            copy.set_next_hop(peer);
            if multicast {
                copy.set_destinations(Some(BTreeSet::from([peer])));
            }
            self.transmit(comm, from, copy);
        }
        Ok(())
    }

    /// True when the router behind `comm` runs the multicast protocol.
    fn fans_out(&self, comm: CommId) -> bool {
        self.comms
            .get(&comm)
            .and_then(|entry| self.routers.get(&entry.router()))
            .is_some_and(Router::uses_multicast)
    }

    fn discard(&mut self, serial: u64, at: Address, reason: FailureReason) {
        debug!("Serial {} discarded at {}: {}", serial, at, reason);
        self.notify(Notification::MessageDiscarded { serial, at, reason });
    }

    /// Asks the router owning `xmtr_comm` where the message goes next.
    fn route(&mut self, xmtr_comm: CommId, xmtr: Address, message: Message) -> Result<()> {
        let serial = message.serial();
        let destination = message.destination();
        let router_id = self.comms.get(&xmtr_comm).ok_or_else(|| missing_comm(xmtr_comm))?.router();
        let router = self.routers.get(&router_id).ok_or_else(|| missing_router(router_id))?;

        let outcome = if router.is_turned_on() {
            let ctx = RoutingContext::new(self.now(), router_id, self.fabric(), &self.ospf);
            router.send(&ctx, SendData::new(xmtr, message))?
        } else {
            SendOutcome::Failed(FailureReason::TransmitterOff)
        };

        match outcome {
            SendOutcome::Forward(outputs) => {
                for output in outputs {
                    self.transmit(xmtr_comm, xmtr, output);
                }
            }
            SendOutcome::Consumed => debug!("Serial {} consumed at {}", serial, xmtr),
            SendOutcome::Failed(reason) => {
                debug!("Serial {} to {} failed at {}: {}", serial, destination, xmtr, reason);
                self.notify(Notification::MessageFailedRouting {
                    serial,
                    at: xmtr,
                    destination,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Runs the link layers and schedules delivery to the next hop.
    fn transmit(&mut self, xmtr_comm: CommId, xmtr: Address, mut message: Message) {
        let serial = message.serial();
        let next_hop = message.next_hop();
        if !layer::send_link(&mut message) {
            self.discard(serial, xmtr, FailureReason::LayerRejected);
            return;
        }
        if next_hop != xmtr && !self.manager.graph().is_link_usable(&xmtr, &next_hop) {
            self.discard(serial, xmtr, FailureReason::MissingLink);
            return;
        }
        let Some(comm) = self.comms.get(&xmtr_comm) else {
            return;
        };
        let epoch = comm.epoch();
        let time = self.now() + comm.transmit_delay();

        message.set_result(InteractionResult::Transmitted);
        self.notify(Notification::MessageTransmitted {
            serial,
            from: xmtr,
            to: next_hop,
        });
        self.queue.push(
            time,
            EventKind::Deliver {
                xmtr: xmtr_comm,
                epoch,
                rcvr: next_hop,
                message,
            },
        );
    }

    /// Aborts when the transmitter went off since transmission, even if it
    /// is back on.
    fn deliver(&mut self, xmtr: CommId, epoch: u64, rcvr: Address, message: Message) -> Result<()> {
        let live = self
            .comms
            .get(&xmtr)
            .is_some_and(|comm| comm.is_turned_on() && comm.epoch() == epoch);
        if !live {
            let from = message.trace_route().last().copied().unwrap_or(Address::NULL);
            debug!("Serial {} aborted: {} changed status in flight", message.serial(), xmtr);
            self.notify(Notification::DeliveryAborted {
                serial: message.serial(),
                from,
                to: rcvr,
            });
            return Ok(());
        }
        self.receive(rcvr, message)
    }

    /// Reception at the comm bound to `rcvr`: protocols first, then local
    /// delivery, then forwarding.
    fn receive(&mut self, rcvr: Address, mut message: Message) -> Result<()> {
        let serial = message.serial();
        let Some(comm_id) = self.manager.comm_at(&rcvr) else {
            self.discard(serial, rcvr, FailureReason::UnresolvableDestination);
            return Ok(());
        };
        let Some((router_id, turned_on)) = self
            .comms
            .get(&comm_id)
            .map(|comm| (comm.router(), comm.is_turned_on()))
        else {
            self.discard(serial, rcvr, FailureReason::UnresolvableDestination);
            return Ok(());
        };
        if !turned_on {
            self.discard(serial, rcvr, FailureReason::ReceiverOff);
            return Ok(());
        }
        if !layer::receive_lower(&mut message) {
            self.discard(serial, rcvr, FailureReason::LayerRejected);
            return Ok(());
        }

        let destination = message.destination();
        let broadcast = destination == BROADCAST_LOCAL
            || self
                .manager
                .network_of(&rcvr)
                .is_some_and(|network| network.broadcast() == destination);
        let multicast = reserved::is_multicast(&destination);
        let for_me = destination == rcvr
            || broadcast
            || (multicast
                && self.manager.has_multicast_member(&destination, &rcvr)
                && message
                    .destinations()
                    .is_none_or(|destinations| destinations.contains(&rcvr)));

        let interfaces = self.fabric().interfaces_of(router_id);
        let now = self.now();
        let (forward_requested, actions) = match self.routers.get_mut(&router_id) {
            Some(router) if router.is_turned_on() => {
                let mut ctx =
                    ProtocolContext::new(now, router_id, router.epoch(), interfaces, &self.manager, &mut self.rng);
                let mut requested = false;
                if matches!(message.body(), Body::Ospf(_)) {
                    requested |= self.ospf.receive(&mut ctx, rcvr, &message);
                }
                requested |= router.receive(&mut ctx, rcvr, &message);
                let requested = requested || ctx.override_forward;
                (requested, std::mem::take(&mut ctx.actions))
            }
            _ => (false, Vec::new()),
        };
        self.apply_actions(actions)?;
        if self.ospf.designated_dropped() {
            self.replace_designated()?;
        }

        if for_me {
            let mut delivered = message.clone();
            if layer::receive_upper(&mut delivered) {
                delivered.set_result(InteractionResult::Delivered);
                self.notify(Notification::MessageReceived {
                    serial,
                    comm: comm_id,
                    source: message.source(),
                    destination,
                });
            } else {
                self.discard(serial, rcvr, FailureReason::LayerRejected);
            }
        }

        let unicast_elsewhere = !for_me && !broadcast && !multicast;
        if broadcast || !(forward_requested || unicast_elsewhere) {
            return Ok(());
        }
        if !layer::send_network(&mut message) {
            self.discard(serial, rcvr, FailureReason::LayerRejected);
            return Ok(());
        }
        self.route(comm_id, rcvr, message)
    }

    // --- runtime operations ----------------------------------------------

    pub fn turn_on_comm(&mut self, comm: CommId) -> Result<bool> {
        let now = self.now();
        let entry = self.comms.get_mut(&comm).ok_or_else(|| missing_comm(comm))?;
        if !entry.turn_on(now) {
            return Ok(false);
        }
        self.notify(Notification::CommTurnedOn { comm });
        self.flush_notifications();
        Ok(true)
    }

    /// In-flight deliveries and pending group changes of the comm are
    /// cancelled.
    pub fn turn_off_comm(&mut self, comm: CommId) -> Result<bool> {
        let now = self.now();
        let entry = self.comms.get_mut(&comm).ok_or_else(|| missing_comm(comm))?;
        if !entry.turn_off(now) {
            return Ok(false);
        }
        entry.igmp_mut().cancel_pending();
        self.notify(Notification::CommTurnedOff { comm });
        if self.ospf.is_initialized() {
            self.replace_designated()?;
        }
        self.flush_notifications();
        Ok(true)
    }

    /// Seeds protocol graphs from the truth, joins OSPF when it is already
    /// running and starts the protocol timers.
    pub fn turn_on_router(&mut self, router: RouterId) -> Result<bool> {
        let entry = self.routers.get_mut(&router).ok_or_else(|| missing_router(router))?;
        if !entry.turn_on(self.manager.graph()) {
            return Ok(false);
        }
        self.notify(Notification::RouterTurnedOn { router });

        if self.ospf.is_initialized() {
            let fabric = Fabric {
                manager: &self.manager,
                routers: &self.routers,
                comms: &self.comms,
            };
            let mut actions = Vec::new();
            self.ospf.add_router(fabric, router, &mut self.rng, &mut actions)?;
            self.apply_actions(actions)?;
        }
        self.with_router(router, |router, ospf, ctx| {
            router.start_protocols(ctx);
            ospf.start(ctx);
        })?;
        self.flush_notifications();
        Ok(true)
    }

    /// Pending timers of the router become stale and its OSPF roles pass
    /// to other routers.
    pub fn turn_off_router(&mut self, router: RouterId) -> Result<bool> {
        let entry = self.routers.get_mut(&router).ok_or_else(|| missing_router(router))?;
        if !entry.turn_off() {
            return Ok(false);
        }
        let fabric = Fabric {
            manager: &self.manager,
            routers: &self.routers,
            comms: &self.comms,
        };
        let mut actions = Vec::new();
        self.ospf.stop(router, fabric, &mut actions);
        self.apply_actions(actions)?;
        self.notify(Notification::RouterTurnedOff { router });
        self.flush_notifications();
        Ok(true)
    }

    /// Re-elects OSPF designated routers that lost their router or
    /// interface.
    fn replace_designated(&mut self) -> Result<()> {
        let fabric = Fabric {
            manager: &self.manager,
            routers: &self.routers,
            comms: &self.comms,
        };
        let mut actions = Vec::new();
        self.ospf.replace_designated(&fabric, &mut actions);
        self.apply_actions(actions)
    }

    /// True for any known comm; only a state change is notified.
    pub fn enable_comm(&mut self, comm: CommId) -> bool {
        let now = self.now();
        let known = self.manager.enable_comm(now, comm);
        self.flush_notifications();
        known
    }

    pub fn disable_comm(&mut self, comm: CommId) -> bool {
        let now = self.now();
        let known = self.manager.disable_comm(now, comm);
        self.flush_notifications();
        known
    }

    pub fn add_connection(&mut self, source: Address, destination: Address) -> bool {
        let now = self.now();
        let added = self.manager.add_connection(now, source, destination);
        self.flush_notifications();
        added
    }

    pub fn remove_connection(&mut self, source: Address, destination: Address) -> bool {
        let now = self.now();
        let removed = self.manager.remove_connection(now, source, destination);
        self.flush_notifications();
        removed
    }

    pub fn enable_connection(&mut self, source: Address, destination: Address) -> bool {
        let now = self.now();
        let changed = self.manager.enable_connection(now, source, destination);
        self.flush_notifications();
        changed
    }

    pub fn disable_connection(&mut self, source: Address, destination: Address) -> bool {
        let now = self.now();
        let changed = self.manager.disable_connection(now, source, destination);
        self.flush_notifications();
        changed
    }

    /// Requests group membership through the comm's IGMP. Returns false
    /// when nothing was scheduled.
    pub fn join_group(&mut self, comm: CommId, group: Address) -> Result<bool> {
        self.request_membership(comm, group, true)
    }

    pub fn leave_group(&mut self, comm: CommId, group: Address) -> Result<bool> {
        self.request_membership(comm, group, false)
    }

    fn request_membership(&mut self, comm: CommId, group: Address, join: bool) -> Result<bool> {
        let now = self.now();
        let entry = self.comms.get_mut(&comm).ok_or_else(|| missing_comm(comm))?;
        let epoch = entry.epoch();
        let igmp = entry.igmp_mut();
        let scheduled = if join {
            igmp.join_group(now, comm, epoch, group, &mut self.rng)
        } else {
            igmp.leave_group(now, comm, epoch, group, &mut self.rng)
        };
        match scheduled {
            Some((time, event)) => {
                self.queue.push(time, event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn complete_membership(&mut self, comm: CommId, epoch: u64, group: Address, join: bool) {
        let Some(entry) = self.comms.get_mut(&comm) else {
            return;
        };
        if entry.epoch() != epoch || !entry.igmp_mut().complete(group, join) {
            return;
        }
        let Some(address) = self.manager.address_of(comm) else {
            return;
        };
        let now = self.now();
        if join {
            self.manager.add_multicast_member(now, group, address);
        } else {
            self.manager.remove_multicast_member(now, group, address);
        }
    }

    /// Deletes every comm and router of the platform. OSPF re-elects any
    /// designated router that went with it.
    pub fn remove_platform(&mut self, name: &str) -> Result<bool> {
        let Some(platform) = self.platforms.remove(name) else {
            return Ok(false);
        };
        let now = self.now();
        for comm in &platform.comms {
            if let Some(mut entry) = self.comms.remove(comm) {
                entry.turn_off(now);
            }
            self.manager.remove_comm(now, *comm);
        }
        for router in &platform.routers {
            self.routers.remove(router);
        }

        let fabric = Fabric {
            manager: &self.manager,
            routers: &self.routers,
            comms: &self.comms,
        };
        let mut actions = Vec::new();
        self.ospf.remove_routers(&platform.routers, fabric, &mut actions);
        self.apply_actions(actions)?;

        info!("Platform {} deleted", name);
        self.notify(Notification::PlatformDeleted {
            platform: name.to_string(),
        });
        self.flush_notifications();
        Ok(true)
    }

    // --- scenario actions ------------------------------------------------

    /// A comm full name or an address.
    pub fn resolve(&self, endpoint: &str) -> Result<Address> {
        if let Some(address) = self.comm_id(endpoint).and_then(|comm| self.manager.address_of(comm)) {
            return Ok(address);
        }
        endpoint
            .parse()
            .map_err(|_| CommError::configuration("endpoint", endpoint, "neither a comm nor an address"))
    }

    fn require_comm(&self, name: &str) -> Result<CommId> {
        self.comm_id(name)
            .ok_or_else(|| CommError::configuration("comm", name, "unknown comm"))
    }

    fn require_router(&self, name: &str) -> Result<RouterId> {
        self.router_id(name)
            .ok_or_else(|| CommError::configuration("router", name, "unknown router"))
    }

    /// Resolves every reference of a scheduled action against the fabric
    /// as built.
    fn check_action(&self, action: &ActionKind) -> Result<()> {
        match action {
            ActionKind::Send { from, to, .. } => {
                self.require_comm(from)?;
                self.resolve(to)?;
            }
            ActionKind::EnableComm { comm }
            | ActionKind::DisableComm { comm }
            | ActionKind::JoinGroup { comm, .. }
            | ActionKind::LeaveGroup { comm, .. }
            | ActionKind::TurnOnComm { comm }
            | ActionKind::TurnOffComm { comm } => {
                self.require_comm(comm)?;
            }
            ActionKind::EnableConnection { source, destination }
            | ActionKind::DisableConnection { source, destination } => {
                self.resolve(source)?;
                self.resolve(destination)?;
            }
            ActionKind::TurnOnRouter { router } | ActionKind::TurnOffRouter { router } => {
                self.require_router(router)?;
            }
            ActionKind::RemovePlatform { platform } => {
                if !self.platforms.contains_key(platform) {
                    return Err(CommError::configuration("platform", platform, "unknown platform"));
                }
            }
        }
        Ok(())
    }

    fn apply_scenario(&mut self, action: &ActionKind) -> Result<()> {
        info!("Scenario action {} at {:.3}", action.name(), self.now());
        match action {
            ActionKind::Send { from, to, body } => {
                let comm = self.require_comm(from)?;
                let destination = self.resolve(to)?;
                self.originate(comm, destination, Body::Data(body.clone()))?;
            }
            ActionKind::EnableComm { comm } => {
                let comm = self.require_comm(comm)?;
                self.enable_comm(comm);
            }
            ActionKind::DisableComm { comm } => {
                let comm = self.require_comm(comm)?;
                self.disable_comm(comm);
            }
            ActionKind::EnableConnection { source, destination } => {
                let (source, destination) = (self.resolve(source)?, self.resolve(destination)?);
                self.enable_connection(source, destination);
            }
            ActionKind::DisableConnection { source, destination } => {
                let (source, destination) = (self.resolve(source)?, self.resolve(destination)?);
                self.disable_connection(source, destination);
            }
            ActionKind::JoinGroup { comm, group } => {
                let comm = self.require_comm(comm)?;
                self.join_group(comm, *group)?;
            }
            ActionKind::LeaveGroup { comm, group } => {
                let comm = self.require_comm(comm)?;
                self.leave_group(comm, *group)?;
            }
            ActionKind::TurnOnComm { comm } => {
                let comm = self.require_comm(comm)?;
                self.turn_on_comm(comm)?;
            }
            ActionKind::TurnOffComm { comm } => {
                let comm = self.require_comm(comm)?;
                self.turn_off_comm(comm)?;
            }
            ActionKind::TurnOnRouter { router } => {
                let router = self.require_router(router)?;
                self.turn_on_router(router)?;
            }
            ActionKind::TurnOffRouter { router } => {
                let router = self.require_router(router)?;
                self.turn_off_router(router)?;
            }
            ActionKind::RemovePlatform { platform } => {
                self.remove_platform(platform)?;
            }
        }
        Ok(())
    }

    // --- queries ---------------------------------------------------------

    pub fn manager(&self) -> &NetworkManager {
        &self.manager
    }

    pub fn ospf(&self) -> &OspfDomain {
        &self.ospf
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn comm(&self, id: CommId) -> Option<&Comm> {
        self.comms.get(&id)
    }

    pub fn router(&self, id: RouterId) -> Option<&Router> {
        self.routers.get(&id)
    }

    pub fn router_mut(&mut self, id: RouterId) -> Option<&mut Router> {
        self.routers.get_mut(&id)
    }

    pub fn comms(&self) -> impl Iterator<Item = &Comm> {
        self.comms.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.values()
    }

    pub fn platform(&self, name: &str) -> Option<&Platform> {
        self.platforms.get(name)
    }

    pub fn address_of(&self, comm: CommId) -> Option<Address> {
        self.manager.address_of(comm)
    }

    /// Looks a comm up by `<platform>.<comm>`.
    pub fn comm_id(&self, full_name: &str) -> Option<CommId> {
        self.comms
            .values()
            .find(|comm| comm.full_name() == full_name)
            .map(Comm::id)
    }

    /// Looks a router up by `<platform>.<router>`.
    pub fn router_id(&self, full_name: &str) -> Option<RouterId> {
        self.routers
            .values()
            .find(|router| router.full_name() == full_name)
            .map(Router::id)
    }

    /// The router owning the interface bound to `address`.
    pub fn router_at(&self, address: &Address) -> Option<RouterId> {
        self.fabric().router_at(address)
    }
}
