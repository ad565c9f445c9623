use crate::address::Address;

pub const BROADCAST_LOCAL: Address = Address::from_octets([255, 255, 255, 255], 32);
pub const MULTICAST_ALL_HOSTS: Address = Address::from_octets([224, 0, 0, 1], 32);
pub const MULTICAST_ALL_ROUTERS: Address = Address::from_octets([224, 0, 0, 2], 32);
pub const OSPF_MULTICAST_ALL: Address = Address::from_octets([224, 0, 0, 5], 32);
pub const OSPF_MULTICAST_DR: Address = Address::from_octets([224, 0, 0, 6], 32);
pub const RIPV2_MULTICAST: Address = Address::from_octets([224, 0, 0, 9], 32);
pub const IGMP_MULTICAST: Address = Address::from_octets([224, 0, 0, 22], 32);

/// Named tokens that resolve to a single reserved `/32`.
pub const RESERVED_TOKENS: [(&str, Address); 7] = [
    ("BROADCAST_LOCAL", BROADCAST_LOCAL),
    ("MULTICAST_ALL_HOSTS", MULTICAST_ALL_HOSTS),
    ("MULTICAST_ALL_ROUTERS", MULTICAST_ALL_ROUTERS),
    ("OSPF_MULTICAST_ALL", OSPF_MULTICAST_ALL),
    ("OSPF_MULTICAST_DR", OSPF_MULTICAST_DR),
    ("RIPv2_MULTICAST", RIPV2_MULTICAST),
    ("IGMP_MULTICAST", IGMP_MULTICAST),
];

pub const MULTICAST_RANGE: Address = Address::from_octets([224, 0, 0, 0], 4);

/// Ranges that are never handed out by address allocation.
pub const RESERVED_RANGES: [Address; 5] = [
    Address::from_octets([0, 0, 0, 0], 8),
    Address::from_octets([127, 0, 0, 0], 8),
    Address::from_octets([169, 254, 0, 0], 16),
    MULTICAST_RANGE,
    Address::from_octets([240, 0, 0, 0], 4),
];

pub fn token_address(token: &str) -> Option<Address> {
    RESERVED_TOKENS
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, address)| *address)
}

pub fn is_multicast(address: &Address) -> bool {
    MULTICAST_RANGE.contains(address)
}

/// Registry of addresses and ranges excluded from automatic allocation.
///
/// Starts with the well known tokens and ranges; scenarios may reserve more.
#[derive(Debug, Clone)]
pub struct ReservedAddressing {
    addresses: Vec<Address>,
    ranges: Vec<Address>,
}

impl Default for ReservedAddressing {
    fn default() -> Self {
        Self {
            addresses: RESERVED_TOKENS.iter().map(|(_, address)| *address).collect(),
            ranges: RESERVED_RANGES.to_vec(),
        }
    }
}

impl ReservedAddressing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, address: Address) {
        if address.mask() == 32 {
            if !self.addresses.contains(&address) {
                self.addresses.push(address);
            }
        } else if !self.ranges.iter().any(|range| range.routing_prefix() == address.routing_prefix()) {
            self.ranges.push(address.routing_prefix());
        }
    }

    pub fn is_reserved(&self, address: &Address) -> bool {
        self.addresses.contains(address) || self.ranges.iter().any(|range| range.contains(address))
    }

    /// True when the subnet described by `network` overlaps anything reserved.
    pub fn is_network_reserved(&self, network: &Address) -> bool {
        self.addresses.iter().any(|address| network.contains(address))
            || self.ranges.iter().any(|range| range.overlaps(network))
    }
}
