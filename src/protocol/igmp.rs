use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use rand::rngs::StdRng;

use crate::address::Address;
use crate::config::IgmpConfig;
use crate::config::router_config::DelayRange;
use crate::message::Message;
use crate::reserved;
use crate::scheduler::EventKind;
use crate::CommId;

/// Comm-level group membership. Never routes; it only decides which
/// multicast groups a comm listens to.
#[derive(Debug, Clone)]
pub struct Igmp {
    enabled: bool,
    join_delay: DelayRange,
    leave_delay: DelayRange,
    joined: BTreeSet<Address>,
    pending: BTreeMap<Address, bool>,
}

impl Igmp {
    pub fn new(config: &IgmpConfig) -> Self {
        Self {
            enabled: config.enabled,
            join_delay: config.join_delay,
            leave_delay: config.leave_delay,
            joined: BTreeSet::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_member(&self, group: &Address) -> bool {
        self.joined.contains(group)
    }

    pub fn joined_groups(&self) -> impl Iterator<Item = &Address> {
        self.joined.iter()
    }

    pub fn is_pending(&self, group: &Address) -> bool {
        self.pending.contains_key(group)
    }

    /// Schedules the membership change after the configured join delay.
    pub fn join_group(
        &mut self,
        now: f64,
        comm: CommId,
        epoch: u64,
        group: Address,
        rng: &mut StdRng,
    ) -> Option<(f64, EventKind)> {
        self.request(now, comm, epoch, group, true, rng)
    }

    pub fn leave_group(
        &mut self,
        now: f64,
        comm: CommId,
        epoch: u64,
        group: Address,
        rng: &mut StdRng,
    ) -> Option<(f64, EventKind)> {
        self.request(now, comm, epoch, group, false, rng)
    }

    fn request(
        &mut self,
        now: f64,
        comm: CommId,
        epoch: u64,
        group: Address,
        join: bool,
        rng: &mut StdRng,
    ) -> Option<(f64, EventKind)> {
        if !self.enabled || !reserved::is_multicast(&group) {
            debug!("{} ignoring membership change for {}", comm, group);
            return None;
        }
        let settled = match self.pending.get(&group) {
            Some(pending) => *pending == join,
            None => self.joined.contains(&group) == join,
        };
        if settled {
            return None;
        }
        self.pending.insert(group, join);
        let delay = if join {
            self.join_delay.sample(rng)
        } else {
            self.leave_delay.sample(rng)
        };
        Some((
            now + delay,
            EventKind::IgmpMembership {
                comm,
                epoch,
                group,
                join,
            },
        ))
    }

    /// Applies a scheduled change. Returns false when it was superseded.
    pub fn complete(&mut self, group: Address, join: bool) -> bool {
        if self.pending.get(&group) != Some(&join) {
            return false;
        }
        self.pending.remove(&group);
        if join {
            self.joined.insert(group)
        } else {
            self.joined.remove(&group)
        }
    }

    /// Immediate membership, used for protocol groups joined at setup.
    pub fn force_join(&mut self, group: Address) -> bool {
        self.pending.remove(&group);
        self.joined.insert(group)
    }

    pub fn force_leave(&mut self, group: &Address) -> bool {
        self.pending.remove(group);
        self.joined.remove(group)
    }

    /// Claims messages addressed to a group this comm belongs to.
    pub fn receive(&self, message: &Message) -> bool {
        self.is_member(&message.destination())
    }

    /// Forgets scheduled changes whose events were invalidated.
    pub fn cancel_pending(&mut self) {
        self.pending.clear();
    }

    pub fn clear(&mut self) {
        self.joined.clear();
        self.pending.clear();
    }
}

/// 2 with IGMP on the comm and multicast on its router, 1 with only
/// router multicast, 0 otherwise.
pub fn multicast_level(igmp: &Igmp, router_multicast: bool) -> u8 {
    match (igmp.is_enabled(), router_multicast) {
        (true, true) => 2,
        (false, true) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn group() -> Address {
        "224.3.3.3".parse().unwrap()
    }

    #[test]
    fn join_is_deferred_until_completion() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut igmp = Igmp::new(&IgmpConfig::default());

        let (time, event) = igmp.join_group(10.0, CommId(1), 0, group(), &mut rng).unwrap();
        assert!((10.0..11.0).contains(&time));
        assert!(matches!(event, EventKind::IgmpMembership { join: true, .. }));
        assert!(!igmp.is_member(&group()));
        assert!(igmp.join_group(10.0, CommId(1), 0, group(), &mut rng).is_none());

        assert!(igmp.complete(group(), true));
        assert!(igmp.is_member(&group()));
    }

    #[test]
    fn leave_supersedes_pending_join() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut igmp = Igmp::new(&IgmpConfig::default());
        igmp.join_group(0.0, CommId(1), 0, group(), &mut rng);
        igmp.leave_group(0.0, CommId(1), 0, group(), &mut rng);

        assert!(!igmp.complete(group(), true));
        assert!(!igmp.complete(group(), false));
        assert!(!igmp.is_member(&group()));
    }

    #[test]
    fn unicast_groups_are_refused() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut igmp = Igmp::new(&IgmpConfig::default());
        let unicast: Address = "10.0.0.1".parse().unwrap();
        assert!(igmp.join_group(0.0, CommId(1), 0, unicast, &mut rng).is_none());
    }

    #[test]
    fn conformance_levels() {
        let enabled = Igmp::new(&IgmpConfig::default());
        let disabled = Igmp::new(&IgmpConfig {
            enabled: false,
            ..IgmpConfig::default()
        });
        assert_eq!(multicast_level(&enabled, true), 2);
        assert_eq!(multicast_level(&disabled, true), 1);
        assert_eq!(multicast_level(&enabled, false), 0);
    }
}
