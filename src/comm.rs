use crate::config::IgmpConfig;
use crate::protocol::igmp::Igmp;
use crate::{CommId, RouterId};

/// A simulated communications device attached to a platform.
///
/// Every comm is an interface of exactly one router.
#[derive(Debug, Clone)]
pub struct Comm {
    id: CommId,
    name: String,
    platform: String,
    router: RouterId,
    turned_on: bool,
    last_status_change: f64,
    epoch: u64,
    transmit_delay: f64,
    igmp: Igmp,
}

impl Comm {
    pub fn new(
        id: CommId,
        name: impl Into<String>,
        platform: impl Into<String>,
        router: RouterId,
        transmit_delay: f64,
        igmp: &IgmpConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            platform: platform.into(),
            router,
            turned_on: false,
            last_status_change: 0.0,
            epoch: 0,
            transmit_delay,
            igmp: Igmp::new(igmp),
        }
    }

    pub fn id(&self) -> CommId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// `<platform>.<comm>`, unique within a simulation.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.platform, self.name)
    }

    pub fn router(&self) -> RouterId {
        self.router
    }

    pub fn is_turned_on(&self) -> bool {
        self.turned_on
    }

    pub fn last_status_change(&self) -> f64 {
        self.last_status_change
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn transmit_delay(&self) -> f64 {
        self.transmit_delay
    }

    pub fn igmp(&self) -> &Igmp {
        &self.igmp
    }

    pub fn igmp_mut(&mut self) -> &mut Igmp {
        &mut self.igmp
    }

    /// Returns false when the comm was already on.
    pub fn turn_on(&mut self, now: f64) -> bool {
        if self.turned_on {
            return false;
        }
        self.turned_on = true;
        self.last_status_change = now;
        true
    }

    /// Returns false when the comm was already off. Pending timers and
    /// in-flight deliveries from this comm are invalidated.
    pub fn turn_off(&mut self, now: f64) -> bool {
        if !self.turned_on {
            return false;
        }
        self.turned_on = false;
        self.last_status_change = now;
        self.epoch += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changes_bump_markers() {
        let mut comm = Comm::new(CommId(0), "radio", "alpha", RouterId(0), 0.0, &IgmpConfig::default());
        assert_eq!(comm.full_name(), "alpha.radio");
        assert!(comm.turn_on(1.0));
        assert!(!comm.turn_on(2.0));
        assert_eq!(comm.last_status_change(), 1.0);

        assert!(comm.turn_off(3.0));
        assert_eq!(comm.epoch(), 1);
        assert_eq!(comm.last_status_change(), 3.0);
    }
}
