use serde::{Deserialize, Serialize};

use crate::address::Address;

/// OSPF-lite control packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OspfPacket {
    Hello(HelloMessage),
    DrAdd(DrAddMessage),
    DrDrop(DrDropMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub source: Address,
    pub network: Address,
    pub areas: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrAddMessage {
    pub destination: Address,
    pub trace_route: Vec<Address>,
    pub areas: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrDropMessage {
    pub dropped: Address,
    pub network: Address,
    pub areas: Vec<Address>,
}

impl OspfPacket {
    pub fn areas(&self) -> &[Address] {
        match self {
            OspfPacket::Hello(hello) => &hello.areas,
            OspfPacket::DrAdd(add) => &add.areas,
            OspfPacket::DrDrop(drop) => &drop.areas,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OspfPacket::Hello(_) => "OSPF_HELLO",
            OspfPacket::DrAdd(_) => "OSPF_DR_ADD",
            OspfPacket::DrDrop(_) => "OSPF_DR_DROP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RipCommand {
    Request,
    Response,
}

/// One route entry as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipRouteEntry {
    pub afi: u16,
    pub address: Address,
    pub subnet_mask: u8,
    pub next_hop: Address,
    pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipDatagram {
    pub command: RipCommand,
    pub entries: Vec<RipRouteEntry>,
}

/// Address family identifier for IPv4 entries.
pub const AFI_INET: u16 = 2;

impl RipDatagram {
    /// The single-entry request asking for a neighbour's whole table.
    pub fn full_table_request(infinity: u32) -> Self {
        Self {
            command: RipCommand::Request,
            entries: vec![RipRouteEntry {
                afi: 0,
                address: Address::NULL,
                subnet_mask: 0,
                next_hop: Address::NULL,
                metric: infinity,
            }],
        }
    }

    pub fn is_full_table_request(&self, infinity: u32) -> bool {
        self.command == RipCommand::Request
            && self.entries.len() == 1
            && self.entries[0].afi == 0
            && self.entries[0].metric == infinity
    }

    pub fn type_name(&self) -> &'static str {
        match self.command {
            RipCommand::Request => "RIP_REQUEST",
            RipCommand::Response => "RIP_RESPONSE",
        }
    }
}

/// Approximate encoded size, used as the simulated message length.
pub fn encoded_bits<T: Serialize>(packet: &T) -> u64 {
    serde_json::to_vec(packet)
        .map(|bytes| bytes.len() as u64 * 8)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_table_request_is_recognised() {
        let request = RipDatagram::full_table_request(16);
        assert!(request.is_full_table_request(16));

        let mut specific = request.clone();
        specific.entries[0].afi = AFI_INET;
        assert!(!specific.is_full_table_request(16));
        assert!(encoded_bits(&request) > 0);
    }
}
