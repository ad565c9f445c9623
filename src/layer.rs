use log::debug;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// The fixed protocol stack, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Application,
    Presentation,
    Session,
    Transport,
    Network,
    Datalink,
    Physical,
}

impl LayerKind {
    pub const STACK: [LayerKind; 7] = [
        LayerKind::Application,
        LayerKind::Presentation,
        LayerKind::Session,
        LayerKind::Transport,
        LayerKind::Network,
        LayerKind::Datalink,
        LayerKind::Physical,
    ];

    /// Upper layers only run at the originator and the final receiver.
    pub fn is_upper(&self) -> bool {
        matches!(
            self,
            LayerKind::Application | LayerKind::Presentation | LayerKind::Session | LayerKind::Transport
        )
    }

    pub fn send(&self, message: &mut Message) -> bool {
        message.push_header(*self);
        if *self == LayerKind::Datalink {
            message.push_trailer(*self);
        }
        true
    }

    pub fn receive(&self, message: &mut Message) -> bool {
        match message.pop_header() {
            Some(layer) if layer == *self => {}
            other => {
                debug!("{:?} layer popped {:?} header from message {}", self, other, message.serial());
                return false;
            }
        }
        if *self == LayerKind::Datalink && message.pop_trailer() != Some(LayerKind::Datalink) {
            debug!("Datalink trailer missing on message {}", message.serial());
            return false;
        }
        true
    }
}

fn send_through(layers: impl Iterator<Item = LayerKind>, message: &mut Message) -> bool {
    layers.into_iter().all(|layer| layer.send(message))
}

fn receive_through(layers: impl Iterator<Item = LayerKind>, message: &mut Message) -> bool {
    layers.into_iter().all(|layer| layer.receive(message))
}

/// Application down to transport, at the originator.
pub fn send_upper(message: &mut Message) -> bool {
    send_through(LayerKind::STACK.into_iter().filter(LayerKind::is_upper), message)
}

/// Transport up to application, at the final receiver.
pub fn receive_upper(message: &mut Message) -> bool {
    receive_through(LayerKind::STACK.into_iter().rev().filter(LayerKind::is_upper), message)
}

/// The network layer header, pushed before the router sees the message.
pub fn send_network(message: &mut Message) -> bool {
    LayerKind::Network.send(message)
}

/// Datalink and physical, after routing picked a next hop.
pub fn send_link(message: &mut Message) -> bool {
    send_through([LayerKind::Datalink, LayerKind::Physical].into_iter(), message)
}

/// Physical, datalink and network on every hop.
pub fn receive_lower(message: &mut Message) -> bool {
    receive_through(
        [LayerKind::Physical, LayerKind::Datalink, LayerKind::Network].into_iter(),
        message,
    )
}
