use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::address::Address;
use crate::algorithms::LeastHops;
use crate::graph::Graph;
use crate::message::Message;
use crate::observer::FailureReason;
use crate::protocol::{ProtocolInterface, ProtocolKind, RouteData, RoutingContext, SendDecision};
use crate::reserved;

/// Fans group traffic out along least-hop paths in a private mirror of the
/// truth graph, one copy per distinct next hop.
#[derive(Debug, Clone, Default)]
pub struct Multicast {
    graph: Graph,
}

impl Multicast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members still owed delivery, as seen from `xmtr`.
    fn targets(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> BTreeSet<Address> {
        let pool: BTreeSet<Address> = match message.destinations() {
            Some(destinations) => destinations.clone(),
            None => ctx
                .manager()
                .multicast_members(&message.destination())
                .into_iter()
                .collect(),
        };
        pool.into_iter()
            .filter(|target| *target != xmtr && !message.trace_route().contains(target))
            .collect()
    }

    pub fn fan_out(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> SendDecision {
        let group = message.destination();
        if !ctx.manager().is_multicast_managed(&group) {
            return SendDecision::Decline;
        }

        let targets = self.targets(ctx, xmtr, message);
        if targets.is_empty() {
            return if message.is_fresh() {
                SendDecision::Rejected(FailureReason::NoRoute)
            } else {
                SendDecision::Consume
            };
        }

        let mut branches: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
        let mut rejection = FailureReason::NoRoute;
        for target in &targets {
            let Some(result) = self.graph.find_path(&xmtr, target, &LeastHops) else {
                debug!("Multicast {} target {} unreachable from {}", group, target, xmtr);
                continue;
            };
            let Some(route) = RouteData::from_path(result.path, result.cost) else {
                continue;
            };
            if let Some(reason) = route.rejection(message) {
                rejection = reason;
                continue;
            }
            branches.entry(route.next_hop).or_default().insert(*target);
        }

        if branches.is_empty() {
            return SendDecision::Rejected(rejection);
        }

        let outputs = branches
            .into_iter()
            .map(|(next_hop, destinations)| {
                let mut copy = message.clone();
                copy.set_next_hop(next_hop);
                copy.set_destinations(Some(destinations));
                copy
            })
            .collect();
        SendDecision::Forward(outputs)
    }

    /// Requests forwarding of group traffic while anyone other than the
    /// receiver is still owed a copy.
    pub fn receive(&self, receiving: Address, message: &Message) -> bool {
        if !reserved::is_multicast(&message.destination()) {
            return false;
        }
        match message.destinations() {
            Some(destinations) => destinations.iter().any(|target| *target != receiving),
            None => true,
        }
    }
}

impl ProtocolInterface for Multicast {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Multicast
    }

    fn graph(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }

    fn should_propagate_truth(&self) -> bool {
        true
    }

    /// Route to the nearest member still owed delivery.
    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        if !ctx.manager().is_multicast_managed(&message.destination()) {
            return None;
        }
        let targets = self.targets(ctx, xmtr, message);
        let best = targets
            .iter()
            .filter_map(|target| self.graph.find_path(&xmtr, target, &LeastHops))
            .min_by(|a, b| a.cost.total_cmp(&b.cost))?;
        let mut route = RouteData::from_path(best.path, best.cost)?;
        route.destinations = Some(targets);
        Some(route)
    }
}
