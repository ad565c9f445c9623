use std::collections::BTreeMap;

use serde::Serialize;

use crate::address::Address;

/// Adjacency between one of our interfaces and a remote interface, as last
/// confirmed by a hello.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStateData {
    pub local: Address,
    pub remote: Address,
    pub local_network: Address,
    pub remote_network: Address,
    pub last_update: f64,
}

impl LinkStateData {
    pub fn is_alive(&self, now: f64, hold: f64) -> bool {
        now - self.last_update <= hold
    }
}

/// Link state records of one router, grouped by area.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStateDatabase {
    areas: BTreeMap<Address, Vec<LinkStateData>>,
}

impl LinkStateDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record unless one already exists for the same pair.
    pub fn add(&mut self, area: Address, data: LinkStateData) -> bool {
        let records = self.areas.entry(area).or_default();
        if records
            .iter()
            .any(|record| record.local == data.local && record.remote == data.remote)
        {
            return false;
        }
        records.push(data);
        true
    }

    pub fn find(&self, area: &Address, local: &Address, remote: &Address) -> Option<&LinkStateData> {
        self.areas
            .get(area)?
            .iter()
            .find(|record| record.local == *local && record.remote == *remote)
    }

    pub fn find_mut(&mut self, area: &Address, local: &Address, remote: &Address) -> Option<&mut LinkStateData> {
        self.areas
            .get_mut(area)?
            .iter_mut()
            .find(|record| record.local == *local && record.remote == *remote)
    }

    /// Every record in `area` whose remote end is `remote`.
    pub fn find_remote(&self, area: &Address, remote: &Address) -> Vec<&LinkStateData> {
        self.areas
            .get(area)
            .map(|records| records.iter().filter(|record| record.remote == *remote).collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, area: &Address, local: &Address, remote: &Address) -> bool {
        let Some(records) = self.areas.get_mut(area) else {
            return false;
        };
        let before = records.len();
        records.retain(|record| !(record.local == *local && record.remote == *remote));
        let removed = records.len() != before;
        if records.is_empty() {
            self.areas.remove(area);
        }
        removed
    }

    /// Drops and returns records not refreshed within `hold`.
    pub fn expire(&mut self, now: f64, hold: f64) -> Vec<LinkStateData> {
        let mut expired = Vec::new();
        for records in self.areas.values_mut() {
            let (alive, dead): (Vec<_>, Vec<_>) =
                records.drain(..).partition(|record| record.is_alive(now, hold));
            *records = alive;
            expired.extend(dead);
        }
        self.areas.retain(|_, records| !records.is_empty());
        expired
    }

    pub fn len(&self) -> usize {
        self.areas.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn clear(&mut self) {
        self.areas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    fn record(local: &str, remote: &str, last_update: f64) -> LinkStateData {
        LinkStateData {
            local: addr(local),
            remote: addr(remote),
            local_network: addr(local).routing_prefix(),
            remote_network: addr(remote).routing_prefix(),
            last_update,
        }
    }

    #[test]
    fn records_are_unique_per_pair() {
        let area = addr("0.0.0.1");
        let mut database = LinkStateDatabase::new();
        assert!(database.add(area, record("10.0.0.1", "10.0.0.2", 0.0)));
        assert!(!database.add(area, record("10.0.0.1", "10.0.0.2", 5.0)));
        assert!(database.add(area, record("10.0.0.3", "10.0.0.2", 0.0)));

        assert_eq!(database.len(), 2);
        assert_eq!(database.find_remote(&area, &addr("10.0.0.2")).len(), 2);
        assert!(database.remove(&area, &addr("10.0.0.1"), &addr("10.0.0.2")));
        assert!(database.find(&area, &addr("10.0.0.1"), &addr("10.0.0.2")).is_none());
    }

    #[test]
    fn stale_records_expire() {
        let area = addr("0.0.0.1");
        let mut database = LinkStateDatabase::new();
        database.add(area, record("10.0.0.1", "10.0.0.2", 0.0));
        database.add(area, record("10.0.0.1", "10.0.0.3", 30.0));

        let expired = database.expire(45.0, 40.0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].remote, addr("10.0.0.2"));
        assert_eq!(database.len(), 1);

        database.expire(100.0, 40.0);
        assert!(database.is_empty());
    }
}
