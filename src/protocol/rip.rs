use log::{debug, info};
use rand::Rng;

use crate::address::Address;
use crate::config::router_config::RipConfig;
use crate::message::{Body, Message};
use crate::protocol::messages::{AFI_INET, RipCommand, RipDatagram, RipRouteEntry};
use crate::protocol::routing_table::{RoutingEntry, RoutingTable};
use crate::protocol::{ProtocolContext, ProtocolInterface, ProtocolKind, RouteData, RoutingContext};
use crate::scheduler::EventKind;

/// Unreachable metric.
pub const INFINITY: u32 = 16;

/// Spread applied around every regular update.
const UPDATE_JITTER: f64 = 5.0;
const TRIGGER_DELAY_MIN: f64 = 1.0;
const TRIGGER_DELAY_MAX: f64 = 5.0;

/// RIPv2 distance-vector state for one router.
#[derive(Debug, Clone)]
pub struct Rip {
    config: RipConfig,
    table: RoutingTable,
    next_update: f64,
    triggered_pending: bool,
    invalidations: u64,
}

impl Rip {
    pub fn new(config: RipConfig) -> Self {
        Self {
            config,
            table: RoutingTable::new(),
            next_update: f64::INFINITY,
            triggered_pending: false,
            invalidations: 0,
        }
    }

    pub fn config(&self) -> &RipConfig {
        &self.config
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn next_update(&self) -> f64 {
        self.next_update
    }

    /// Asks every neighbour for its full table and starts the update cycle.
    pub fn turn_on(&mut self, ctx: &mut ProtocolContext<'_>) {
        let interfaces = ctx.interfaces.clone();
        for interface in &interfaces {
            let mut peers: Vec<Address> = interfaces
                .iter()
                .copied()
                .filter(|other| other != interface)
                .collect();
            peers.extend(ctx.manager.link_local_peers(interface));
            peers.sort();
            peers.dedup();

            for peer in peers {
                ctx.send(*interface, peer, Body::Rip(RipDatagram::full_table_request(INFINITY)));
            }
        }
        self.schedule_regular_update(ctx);
    }

    pub fn turn_off(&mut self) {
        self.table.clear();
        self.triggered_pending = false;
        self.next_update = f64::INFINITY;
    }

    fn schedule_regular_update(&mut self, ctx: &mut ProtocolContext<'_>) {
        let jitter = ctx.rng.gen_range(-UPDATE_JITTER..UPDATE_JITTER);
        self.next_update = ctx.now + self.config.update_interval + jitter;
        ctx.schedule(
            self.next_update,
            EventKind::RipUpdate {
                router: ctx.router,
                epoch: ctx.epoch,
                triggered: false,
            },
        );
    }

    pub fn receive(&mut self, ctx: &mut ProtocolContext<'_>, receiving: Address, message: &Message) -> bool {
        let Body::Rip(datagram) = message.body() else {
            return false;
        };
        let sender = message.source();
        self.learn_neighbor(ctx.now, sender, receiving);

        match datagram.command {
            RipCommand::Request => {
                let response = if datagram.is_full_table_request(INFINITY) {
                    self.response_for(sender, false)
                } else {
                    self.fill_request(datagram)
                };
                if !response.entries.is_empty() {
                    ctx.send(receiving, sender, Body::Rip(response));
                }
            }
            RipCommand::Response => self.process_response(ctx, sender, datagram),
        }

        for entry in self.table.iter_mut() {
            if entry.gateway == sender {
                entry.last_seen = ctx.now;
            }
        }

        self.trigger_update(ctx);
        false
    }

    /// The sender is a direct neighbour reached through `receiving`.
    fn learn_neighbor(&mut self, now: f64, sender: Address, receiving: Address) {
        match self.table.get_route_mut(&sender) {
            Some(entry) => {
                if !entry.valid || entry.metric > 1 {
                    entry.metric = 1;
                    entry.gateway = receiving;
                    entry.valid = true;
                    entry.changed = true;
                }
                entry.last_seen = now;
            }
            None => {
                debug!("RIP learned neighbour {} on {}", sender, receiving);
                self.table.add_route(RoutingEntry::new(sender, receiving, 1, now));
            }
        }
    }

    fn fill_request(&self, request: &RipDatagram) -> RipDatagram {
        let entries = request
            .entries
            .iter()
            .map(|asked| {
                let metric = self
                    .table
                    .get_route(&asked.address)
                    .map(|entry| entry.metric)
                    .unwrap_or(INFINITY);
                RipRouteEntry {
                    metric,
                    ..asked.clone()
                }
            })
            .collect();
        RipDatagram {
            command: RipCommand::Response,
            entries,
        }
    }

    fn process_response(&mut self, ctx: &mut ProtocolContext<'_>, sender: Address, datagram: &RipDatagram) {
        let now = ctx.now;
        let cost_to_gateway = self
            .table
            .get_route(&sender)
            .filter(|entry| entry.valid)
            .map(|entry| entry.metric)
            .unwrap_or(1);

        for advertised in &datagram.entries {
            let destination = advertised.address.with_mask(advertised.subnet_mask);
            if advertised.afi != AFI_INET
                || destination.is_null()
                || destination == sender
                || ctx.is_local(&destination)
            {
                continue;
            }
            let cost = (advertised.metric + cost_to_gateway).min(INFINITY);

            let Some(existing) = self.table.get_route_mut(&destination) else {
                if cost < INFINITY {
                    self.table.add_route(RoutingEntry::new(destination, sender, cost, now));
                }
                continue;
            };

            if existing.gateway == sender {
                existing.last_seen = now;
                if cost != existing.metric {
                    existing.metric = cost;
                    existing.changed = true;
                    if cost < INFINITY {
                        existing.valid = true;
                    } else if existing.valid {
                        existing.valid = false;
                        self.invalidations += 1;
                        existing.invalidation = self.invalidations;
                        info!("RIP route to {} via {} withdrawn", destination, sender);
                        ctx.schedule(
                            now + self.config.garbage_collection_timeout,
                            EventKind::RipCollect {
                                router: ctx.router,
                                epoch: ctx.epoch,
                                destination,
                                invalidation: self.invalidations,
                            },
                        );
                    }
                }
            } else if cost < existing.metric {
                existing.gateway = sender;
                existing.metric = cost;
                existing.last_seen = now;
                existing.valid = true;
                existing.changed = true;
            } else if cost == existing.metric
                && cost < INFINITY
                && now - existing.last_seen > self.config.invalidation_timeout / 2.0
            {
                // Incumbent is about to time out; equal-cost alternative wins
                existing.gateway = sender;
                existing.last_seen = now;
                existing.changed = true;
            }
        }
    }

    /// Entries to advertise to `requester`, with split horizon applied.
    fn response_for(&self, requester: Address, changed_only: bool) -> RipDatagram {
        let entries = self
            .table
            .iter()
            .filter(|entry| !changed_only || entry.changed)
            .filter(|entry| entry.destination != requester)
            .filter_map(|entry| {
                let metric = if entry.gateway == requester {
                    if !self.config.poisoned_reverse {
                        return None;
                    }
                    INFINITY
                } else {
                    entry.metric
                };
                Some(RipRouteEntry {
                    afi: AFI_INET,
                    address: entry.destination,
                    subnet_mask: entry.subnet_mask,
                    next_hop: Address::NULL,
                    metric,
                })
            })
            .collect();
        RipDatagram {
            command: RipCommand::Response,
            entries,
        }
    }

    /// Valid table entries whose gateway is `interface`.
    fn direct_neighbors(&self, interface: &Address) -> Vec<Address> {
        self.table
            .iter()
            .filter(|entry| entry.valid && entry.gateway == *interface)
            .map(|entry| entry.destination)
            .collect()
    }

    fn trigger_update(&mut self, ctx: &mut ProtocolContext<'_>) {
        if self.triggered_pending || !self.table.has_changes() {
            return;
        }
        let time = ctx.now + ctx.rng.gen_range(TRIGGER_DELAY_MIN..TRIGGER_DELAY_MAX);
        if time >= self.next_update {
            return;
        }
        self.triggered_pending = true;
        ctx.schedule(
            time,
            EventKind::RipUpdate {
                router: ctx.router,
                epoch: ctx.epoch,
                triggered: true,
            },
        );
    }

    /// Regular or triggered update.
    pub fn update(&mut self, ctx: &mut ProtocolContext<'_>, triggered: bool) {
        if triggered {
            self.triggered_pending = false;
        }

        for interface in ctx.interfaces.clone() {
            for neighbor in self.direct_neighbors(&interface) {
                let response = self.response_for(neighbor, triggered);
                if !response.entries.is_empty() {
                    ctx.send(interface, neighbor, Body::Rip(response));
                }
            }
        }
        self.table.clear_changed();

        if !triggered {
            self.schedule_regular_update(ctx);
        }

        let horizon = ctx.now + self.config.update_interval + UPDATE_JITTER;
        for entry in self.table.iter() {
            if !entry.valid || ctx.is_local(&entry.destination) {
                continue;
            }
            let expires = entry.last_seen + self.config.invalidation_timeout;
            if expires < horizon {
                ctx.schedule(
                    expires.max(ctx.now),
                    EventKind::RipInvalidate {
                        router: ctx.router,
                        epoch: ctx.epoch,
                        destination: entry.destination,
                        anticipated: expires,
                    },
                );
            }
        }
    }

    /// Invalidates `destination` unless it was refreshed after the check was
    /// scheduled.
    pub fn invalidate(&mut self, ctx: &mut ProtocolContext<'_>, destination: Address, anticipated: f64) {
        let Some(entry) = self.table.get_route_mut(&destination) else {
            return;
        };
        if !entry.valid || entry.last_seen + self.config.invalidation_timeout > anticipated {
            return;
        }

        info!("RIP route to {} timed out at {:.3}", destination, ctx.now);
        self.invalidations += 1;
        let invalidation = self.invalidations;
        entry.valid = false;
        entry.metric = INFINITY;
        entry.changed = true;
        entry.invalidation = invalidation;
        let notice = RipDatagram {
            command: RipCommand::Response,
            entries: vec![RipRouteEntry {
                afi: AFI_INET,
                address: entry.destination,
                subnet_mask: entry.subnet_mask,
                next_hop: Address::NULL,
                metric: INFINITY,
            }],
        };

        for interface in ctx.interfaces.clone() {
            for neighbor in self.direct_neighbors(&interface) {
                ctx.send(interface, neighbor, Body::Rip(notice.clone()));
            }
        }

        ctx.schedule(
            ctx.now + self.config.garbage_collection_timeout,
            EventKind::RipCollect {
                router: ctx.router,
                epoch: ctx.epoch,
                destination,
                invalidation,
            },
        );
    }

    /// Removes `destination` if it is still invalid from the same
    /// invalidation.
    pub fn collect(&mut self, destination: &Address, invalidation: u64) -> bool {
        if self
            .table
            .get_route(destination)
            .is_some_and(|entry| !entry.valid && entry.invalidation == invalidation)
        {
            debug!("RIP collected route to {}", destination);
            self.table.remove_route(destination);
            return true;
        }
        false
    }
}

fn via(xmtr: Address, interface: Address, target: Address) -> Vec<Address> {
    if interface == xmtr {
        vec![xmtr, target]
    } else {
        vec![xmtr, interface, target]
    }
}

impl ProtocolInterface for Rip {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Rip
    }

    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        let destination = message.destination();
        if destination == xmtr {
            return None;
        }
        // RIP datagrams never leave the link
        if matches!(message.body(), Body::Rip(_)) || ctx.is_local(&destination) {
            return RouteData::from_path(vec![xmtr, destination], 1.0);
        }

        let entry = self.table.find_route(&destination)?;
        if !entry.valid {
            return None;
        }
        if ctx.is_local(&entry.gateway) {
            return RouteData::from_path(via(xmtr, entry.gateway, destination), 1.0);
        }

        let exit = self
            .table
            .get_route(&entry.gateway)
            .map(|gateway| gateway.gateway)
            .filter(|interface| ctx.is_local(interface))
            .unwrap_or(xmtr);
        RouteData::from_path(via(xmtr, exit, entry.gateway), f64::from(entry.metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::message::Payload;
    use crate::network::NetworkManager;
    use crate::RouterId;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    fn response(sender: &str, receiver: &str, entries: &[(&str, u32)]) -> Message {
        let datagram = RipDatagram {
            command: RipCommand::Response,
            entries: entries
                .iter()
                .map(|(address, metric)| RipRouteEntry {
                    afi: AFI_INET,
                    address: addr(address),
                    subnet_mask: 32,
                    next_hop: Address::NULL,
                    metric: *metric,
                })
                .collect(),
        };
        Message::new(Payload::new(1, addr(sender), addr(receiver), Body::Rip(datagram)))
    }

    #[test]
    fn response_adds_routes_through_sender() {
        let manager = NetworkManager::new();
        let mut rng = StdRng::seed_from_u64(5);
        let me = addr("10.0.1.1");
        let mut ctx = ProtocolContext::new(0.0, RouterId(0), 0, vec![me], &manager, &mut rng);
        let mut rip = Rip::new(RipConfig::default());

        rip.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", 1), ("10.0.1.1", 1)]));

        let neighbor = rip.table().get_route(&addr("10.0.1.2")).unwrap();
        assert_eq!((neighbor.metric, neighbor.gateway), (1, me));
        let learned = rip.table().get_route(&addr("10.0.2.2")).unwrap();
        assert_eq!((learned.metric, learned.gateway), (2, addr("10.0.1.2")));
        // entries naming our own interface are skipped
        assert!(rip.table().get_route(&me).map_or(true, |entry| entry.gateway != addr("10.0.1.2")));
    }

    #[test]
    fn withdrawn_route_is_invalidated_and_collected() {
        let manager = NetworkManager::new();
        let mut rng = StdRng::seed_from_u64(6);
        let me = addr("10.0.1.1");
        let mut rip = Rip::new(RipConfig::default());
        {
            let mut ctx = ProtocolContext::new(0.0, RouterId(0), 0, vec![me], &manager, &mut rng);
            rip.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", 1)]));
        }
        let mut ctx = ProtocolContext::new(10.0, RouterId(0), 0, vec![me], &manager, &mut rng);
        rip.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", INFINITY)]));

        let entry = rip.table().get_route(&addr("10.0.2.2")).unwrap();
        assert!(!entry.valid);
        assert_eq!(entry.metric, INFINITY);
        let stamps = collect_stamps(&ctx.actions);
        assert_eq!(stamps.len(), 1);
        assert!(rip.collect(&addr("10.0.2.2"), stamps[0]));
        assert!(!rip.collect(&addr("10.0.2.2"), stamps[0]));
    }

    fn collect_stamps(actions: &[crate::protocol::Action]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|action| match action {
                crate::protocol::Action::Schedule {
                    event: EventKind::RipCollect { invalidation, .. },
                    ..
                } => Some(*invalidation),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stale_collection_spares_a_route_invalidated_again() {
        let manager = NetworkManager::new();
        let mut rng = StdRng::seed_from_u64(9);
        let me = addr("10.0.1.1");
        let far = addr("10.0.2.2");
        let mut rip = Rip::new(RipConfig::default());
        let mut stamps = Vec::new();
        for (time, metric) in [(0.0, 1), (10.0, INFINITY), (20.0, 1), (30.0, INFINITY)] {
            let mut ctx = ProtocolContext::new(time, RouterId(0), 0, vec![me], &manager, &mut rng);
            rip.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", metric)]));
            stamps.extend(collect_stamps(&ctx.actions));
        }
        assert_eq!(stamps.len(), 2);

        // the first collection was scheduled before the route came back
        assert!(!rip.collect(&far, stamps[0]));
        assert!(rip.table().get_route(&far).is_some_and(|entry| !entry.valid));
        assert!(rip.collect(&far, stamps[1]));
        assert!(rip.table().get_route(&far).is_none());
    }

    #[test]
    fn split_horizon_and_poisoned_reverse() {
        let manager = NetworkManager::new();
        let mut rng = StdRng::seed_from_u64(7);
        let me = addr("10.0.1.1");
        let neighbor = addr("10.0.1.2");
        let mut ctx = ProtocolContext::new(0.0, RouterId(0), 0, vec![me], &manager, &mut rng);

        let mut plain = Rip::new(RipConfig::default());
        plain.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", 1)]));
        assert!(plain.response_for(neighbor, false).entries.is_empty());

        let mut poisoned = Rip::new(RipConfig {
            poisoned_reverse: true,
            ..RipConfig::default()
        });
        poisoned.receive(&mut ctx, me, &response("10.0.1.2", "10.0.1.1", &[("10.0.2.2", 1)]));
        let advertised = poisoned.response_for(neighbor, false);
        assert_eq!(advertised.entries.len(), 1);
        assert_eq!(advertised.entries[0].metric, INFINITY);
    }

    #[test]
    fn full_table_request_is_answered() {
        let manager = NetworkManager::new();
        let mut rng = StdRng::seed_from_u64(8);
        let me = addr("10.0.1.1");
        let mut ctx = ProtocolContext::new(0.0, RouterId(0), 0, vec![me], &manager, &mut rng);
        let mut rip = Rip::new(RipConfig::default());
        rip.receive(&mut ctx, me, &response("10.0.1.3", "10.0.1.1", &[("10.0.9.9", 2)]));
        ctx.actions.clear();

        let request = Message::new(Payload::new(
            2,
            addr("10.0.1.2"),
            me,
            Body::Rip(RipDatagram::full_table_request(INFINITY)),
        ));
        rip.receive(&mut ctx, me, &request);
        let answered = ctx.actions.iter().any(|action| match action {
            crate::protocol::Action::Send { to, body: Body::Rip(datagram), .. } => {
                *to == addr("10.0.1.2") && datagram.command == RipCommand::Response && datagram.entries.len() == 2
            }
            _ => false,
        });
        assert!(answered);
    }
}
