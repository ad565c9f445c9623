use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CommError;
use crate::reserved;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// A CIDR scoped logical address.
///
/// Equality, ordering and hashing only consider the 32-bit value; the mask
/// travels with the address so that subnet questions can be answered without
/// a lookup. The all-zero value is the null address.
#[derive(Debug, Clone, Copy, Default)]
pub struct Address {
    value: u32,
    mask: u8,
}

impl Address {
    pub const NULL: Address = Address { value: 0, mask: 0 };

    pub const fn new(value: u32, mask: u8) -> Self {
        let mask = if mask > 32 { 32 } else { mask };
        Self { value, mask }
    }

    pub const fn from_octets(octets: [u8; 4], mask: u8) -> Self {
        Self::new(u32::from_be_bytes(octets), mask)
    }

    /// Deterministically derives a network address from an arbitrary token.
    ///
    /// The token is hashed with 32-bit FNV-1a and truncated to its routing
    /// prefix, so repeated runs with the same token always produce the same
    /// network.
    pub fn generate(token: &str, mask: u8) -> Self {
        let hash = token.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
        });
        Self::new(hash, mask).routing_prefix()
    }

    pub fn is_null(&self) -> bool {
        self.value == 0
    }

    pub fn binary_integer(&self) -> u32 {
        self.value
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.value)
    }

    pub fn with_mask(&self, mask: u8) -> Self {
        Self::new(self.value, mask)
    }

    pub fn net(&self) -> Ipv4Net {
        Ipv4Net::new(self.ip(), self.mask).unwrap_or_else(|_| Ipv4Net::from(self.ip()))
    }

    pub fn routing_prefix(&self) -> Self {
        Self::new(u32::from(self.net().network()), self.mask)
    }

    pub fn broadcast(&self) -> Self {
        Self::new(u32::from(self.net().broadcast()), self.mask)
    }

    /// The host portion of the address, with the prefix bits cleared.
    pub fn host_field(&self) -> u32 {
        self.value & !u32::from(self.net().netmask())
    }

    /// True when `other` falls inside this address's subnet.
    pub fn contains(&self, other: &Address) -> bool {
        self.net().contains(&other.ip())
    }

    /// True when either subnet contains the other.
    pub fn overlaps(&self, other: &Address) -> bool {
        let (mine, theirs) = (self.routing_prefix(), other.routing_prefix());
        mine.contains(&theirs) || theirs.contains(&mine)
    }

    /// Number of assignable host addresses in the subnet.
    pub fn host_count(&self) -> u64 {
        match self.mask {
            32 => 1,
            31 => 2,
            mask => (1u64 << (32 - u32::from(mask))) - 2,
        }
    }

    /// Next host value within the same mask. The subnet is not checked;
    /// callers compare the routing prefix after incrementing.
    pub fn increment(&self) -> Self {
        Self::new(self.value.wrapping_add(1), self.mask)
    }

    pub fn decrement(&self) -> Self {
        Self::new(self.value.wrapping_sub(1), self.mask)
    }

    pub fn address_string(&self) -> String {
        self.ip().to_string()
    }

    pub fn subnet_string(&self) -> String {
        self.routing_prefix().to_string()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip(), self.mask)
    }
}

impl FromStr for Address {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(address) = reserved::token_address(trimmed) {
            return Ok(address);
        }

        let invalid = |reason: &str| CommError::InvalidAddress {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (ip_part, mask) = match trimmed.split_once('/') {
            Some((ip, mask)) => {
                let mask: u8 = mask
                    .parse()
                    .map_err(|_| invalid("mask is not a number"))?;
                if mask > 32 {
                    return Err(invalid("mask exceeds 32"));
                }
                (ip, mask)
            }
            None => (trimmed, 32),
        };

        let ip: Ipv4Addr = ip_part
            .parse()
            .map_err(|_| invalid("not a dotted IPv4 address"))?;
        Ok(Self::new(u32::from(ip), mask))
    }
}

impl From<Ipv4Net> for Address {
    fn from(net: Ipv4Net) -> Self {
        Self::new(u32::from(net.addr()), net.prefix_len())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
