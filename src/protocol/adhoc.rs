use std::fmt;

use log::debug;

use crate::address::Address;
use crate::algorithms::LeastHops;
use crate::config::router_config::AdHocConfig;
use crate::graph::Graph;
use crate::message::Message;
use crate::observer::Notification;
use crate::protocol::{ProtocolContext, ProtocolInterface, ProtocolKind, RouteData, RoutingContext};
use crate::scheduler::EventKind;

/// A deferred truth change offered to the ad hoc policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdHocHook {
    CommAdded(Address),
    CommRemoved(Address),
    ConnectionAdded(Address, Address),
    ConnectionRemoved(Address, Address),
}

/// User-supplied behaviour for the ad hoc protocol.
///
/// Each topology hook returns true when it fully handled the change; false
/// asks the router to mirror the change into the protocol graph instead.
pub trait AdHocPolicy: fmt::Debug {
    fn on_comm_added(&mut self, _graph: &mut Graph, _address: Address) -> bool {
        false
    }

    fn on_comm_removed(&mut self, _graph: &mut Graph, _address: Address) -> bool {
        false
    }

    fn on_connection_added(&mut self, _graph: &mut Graph, _source: Address, _destination: Address) -> bool {
        false
    }

    fn on_connection_removed(&mut self, _graph: &mut Graph, _source: Address, _destination: Address) -> bool {
        false
    }

    /// A full path from `source` to `destination`, or `None` to fall back
    /// to a least-hop search.
    fn on_routing(&self, _graph: &Graph, _source: Address, _destination: Address) -> Option<Vec<Address>> {
        None
    }
}

/// Mirrors the truth and routes by hop count.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPolicy;

impl AdHocPolicy for NoOpPolicy {}

#[derive(Debug)]
pub struct AdHoc {
    config: AdHocConfig,
    policy: Box<dyn AdHocPolicy>,
    graph: Graph,
}

impl AdHoc {
    pub fn new(config: AdHocConfig) -> Self {
        Self::with_policy(config, Box::new(NoOpPolicy))
    }

    pub fn with_policy(config: AdHocConfig, policy: Box<dyn AdHocPolicy>) -> Self {
        Self {
            config,
            policy,
            graph: Graph::new(),
        }
    }

    pub fn set_policy(&mut self, policy: Box<dyn AdHocPolicy>) {
        self.policy = policy;
    }

    /// Schedules the matching hook. Changes without a hook are mirrored
    /// immediately.
    pub fn perfect(&mut self, ctx: &mut ProtocolContext<'_>, notification: &Notification) -> bool {
        let (hook, delay) = match notification {
            Notification::CommAdded { address, .. } => {
                (AdHocHook::CommAdded(*address), self.config.comm_added_delay)
            }
            Notification::CommRemoved { address, .. } => {
                (AdHocHook::CommRemoved(*address), self.config.comm_removed_delay)
            }
            Notification::ConnectionAdded { source, destination } => (
                AdHocHook::ConnectionAdded(*source, *destination),
                self.config.connection_added_delay,
            ),
            Notification::ConnectionRemoved { source, destination } => (
                AdHocHook::ConnectionRemoved(*source, *destination),
                self.config.connection_removed_delay,
            ),
            _ => return notification.is_truth_change(),
        };

        let time = ctx.now + delay.sample(ctx.rng);
        ctx.schedule(
            time,
            EventKind::AdHocHook {
                router: ctx.router,
                epoch: ctx.epoch,
                hook,
            },
        );
        false
    }

    /// Runs the policy hook. Returns false when the caller should mirror.
    pub fn run_hook(&mut self, hook: AdHocHook) -> bool {
        let handled = match hook {
            AdHocHook::CommAdded(address) => self.policy.on_comm_added(&mut self.graph, address),
            AdHocHook::CommRemoved(address) => self.policy.on_comm_removed(&mut self.graph, address),
            AdHocHook::ConnectionAdded(source, destination) => {
                self.policy
                    .on_connection_added(&mut self.graph, source, destination)
            }
            AdHocHook::ConnectionRemoved(source, destination) => {
                self.policy
                    .on_connection_removed(&mut self.graph, source, destination)
            }
        };
        debug!("Ad hoc hook {:?} handled by policy: {}", hook, handled);
        handled
    }
}

impl ProtocolInterface for AdHoc {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::AdHoc
    }

    fn graph(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }

    fn routing(&self, _ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        let destination = message.destination();
        if let Some(path) = self.policy.on_routing(&self.graph, xmtr, destination) {
            let cost = path.len().saturating_sub(1) as f64;
            return RouteData::from_path(path, cost);
        }
        let result = self.graph.find_path(&xmtr, &destination, &LeastHops)?;
        RouteData::from_path(result.path, result.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Detour(Vec<Address>);

    impl AdHocPolicy for Detour {
        fn on_connection_added(&mut self, _graph: &mut Graph, _source: Address, _destination: Address) -> bool {
            true
        }

        fn on_routing(&self, _graph: &Graph, _source: Address, _destination: Address) -> Option<Vec<Address>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn default_policy_defers_to_mirroring() {
        let mut adhoc = AdHoc::new(AdHocConfig::default());
        let a: Address = "10.0.0.1".parse().unwrap();
        assert!(!adhoc.run_hook(AdHocHook::CommAdded(a)));
    }

    #[test]
    fn custom_policy_can_claim_hooks() {
        let a: Address = "10.0.0.1".parse().unwrap();
        let b: Address = "10.0.0.2".parse().unwrap();
        let mut adhoc = AdHoc::with_policy(AdHocConfig::default(), Box::new(Detour(vec![a, b])));
        assert!(adhoc.run_hook(AdHocHook::ConnectionAdded(a, b)));
        assert!(!adhoc.run_hook(AdHocHook::CommRemoved(a)));
    }
}
