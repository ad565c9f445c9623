use std::collections::BTreeSet;

use serde::Serialize;

use crate::address::Address;
use crate::layer::LayerKind;
use crate::observer::FailureReason;
use crate::protocol::messages::{OspfPacket, RipDatagram, encoded_bits};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Body {
    Data(String),
    Ospf(OspfPacket),
    Rip(RipDatagram),
}

/// The source message as created by the sender. Never changes in flight,
/// apart from the next hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub serial: u64,
    pub kind: String,
    pub source: Address,
    pub destination: Address,
    pub next_hop: Address,
    pub size_bits: u64,
    pub body: Body,
}

impl Payload {
    pub fn new(serial: u64, source: Address, destination: Address, body: Body) -> Self {
        let (kind, size_bits) = match &body {
            Body::Data(text) => ("DATA".to_string(), text.len() as u64 * 8),
            Body::Ospf(packet) => (packet.type_name().to_string(), encoded_bits(packet)),
            Body::Rip(datagram) => (datagram.type_name().to_string(), encoded_bits(datagram)),
        };
        Self {
            serial,
            kind,
            source,
            destination,
            next_hop: Address::NULL,
            size_bits,
            body,
        }
    }
}

/// Transport behaviour requested by the sender, as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportFeatures(u32);

impl TransportFeatures {
    pub const NONE: TransportFeatures = TransportFeatures(0);
    pub const RELIABLE: TransportFeatures = TransportFeatures(1);
    pub const ORDERED: TransportFeatures = TransportFeatures(1 << 1);
    pub const ACKNOWLEDGED: TransportFeatures = TransportFeatures(1 << 2);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: TransportFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TransportFeatures) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TransportFeatures) {
        self.0 &= !other.0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum InteractionResult {
    #[default]
    Pending,
    Transmitted,
    Delivered,
    Failed(FailureReason),
}

/// A payload in flight, with everything the layers and routers attach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    payload: Payload,
    headers: Vec<LayerKind>,
    trailers: Vec<LayerKind>,
    trace_route: Vec<Address>,
    ttl: usize,
    features: TransportFeatures,
    destinations: Option<BTreeSet<Address>>,
    result: InteractionResult,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            headers: Vec::new(),
            trailers: Vec::new(),
            trace_route: Vec::new(),
            ttl: 0,
            features: TransportFeatures::NONE,
            destinations: None,
            result: InteractionResult::Pending,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn body(&self) -> &Body {
        &self.payload.body
    }

    pub fn serial(&self) -> u64 {
        self.payload.serial
    }

    pub fn source(&self) -> Address {
        self.payload.source
    }

    pub fn destination(&self) -> Address {
        self.payload.destination
    }

    pub fn next_hop(&self) -> Address {
        self.payload.next_hop
    }

    pub fn set_next_hop(&mut self, next_hop: Address) {
        self.payload.next_hop = next_hop;
    }

    pub fn push_header(&mut self, layer: LayerKind) {
        self.headers.push(layer);
    }

    pub fn pop_header(&mut self) -> Option<LayerKind> {
        self.headers.pop()
    }

    pub fn push_trailer(&mut self, layer: LayerKind) {
        self.trailers.push(layer);
    }

    pub fn pop_trailer(&mut self) -> Option<LayerKind> {
        self.trailers.pop()
    }

    pub fn header_depth(&self) -> usize {
        self.headers.len()
    }

    pub fn trace_route(&self) -> &[Address] {
        &self.trace_route
    }

    pub fn append_trace(&mut self, address: Address) {
        self.trace_route.push(address);
    }

    /// True until the message has left its originator.
    pub fn is_fresh(&self) -> bool {
        self.trace_route.is_empty()
    }

    pub fn ttl(&self) -> usize {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: usize) {
        self.ttl = ttl;
    }

    pub fn features(&self) -> TransportFeatures {
        self.features
    }

    pub fn features_mut(&mut self) -> &mut TransportFeatures {
        &mut self.features
    }

    pub fn destinations(&self) -> Option<&BTreeSet<Address>> {
        self.destinations.as_ref()
    }

    pub fn set_destinations(&mut self, destinations: Option<BTreeSet<Address>>) {
        self.destinations = destinations;
    }

    pub fn result(&self) -> InteractionResult {
        self.result
    }

    pub fn set_result(&mut self, result: InteractionResult) {
        self.result = result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn headers_and_trailers_are_lifo() {
        let payload = Payload::new(1, addr("10.0.0.1"), addr("10.0.0.2"), Body::Data("hi".into()));
        let mut message = Message::new(payload);
        message.push_header(LayerKind::Transport);
        message.push_header(LayerKind::Network);
        message.push_trailer(LayerKind::Datalink);

        assert_eq!(message.pop_header(), Some(LayerKind::Network));
        assert_eq!(message.pop_header(), Some(LayerKind::Transport));
        assert_eq!(message.pop_header(), None);
        assert_eq!(message.pop_trailer(), Some(LayerKind::Datalink));
        assert_eq!(message.payload().size_bits, 16);
    }

    #[test]
    fn transport_features_mask() {
        let mut features = TransportFeatures::NONE;
        features.insert(TransportFeatures::RELIABLE);
        features.insert(TransportFeatures::ACKNOWLEDGED);
        assert!(features.contains(TransportFeatures::RELIABLE));
        assert!(!features.contains(TransportFeatures::ORDERED));
        features.remove(TransportFeatures::RELIABLE);
        assert_eq!(features.bits(), 4);
    }
}
