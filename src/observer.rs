use std::fmt;

use serde::Serialize;

use crate::address::Address;
use crate::{CommId, RouterId};

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    NoRoute,
    HopLimitExceeded,
    UnresolvableDestination,
    MissingLink,
    TransmitterOff,
    ReceiverOff,
    LayerRejected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NoRoute => "no route",
            FailureReason::HopLimitExceeded => "hop limit exceeded",
            FailureReason::UnresolvableDestination => "unresolvable destination",
            FailureReason::MissingLink => "missing link",
            FailureReason::TransmitterOff => "transmitter off",
            FailureReason::ReceiverOff => "receiver off",
            FailureReason::LayerRejected => "layer rejected",
        };
        f.write_str(text)
    }
}

/// Everything an outside observer can learn about the fabric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notification {
    CommAdded {
        comm: CommId,
        address: Address,
        network: String,
    },
    CommRemoved {
        comm: CommId,
        address: Address,
    },
    CommEnabled {
        comm: CommId,
        address: Address,
    },
    CommDisabled {
        comm: CommId,
        address: Address,
    },
    NetworkAdded {
        name: String,
        address: Address,
    },
    NetworkRemoved {
        name: String,
        address: Address,
    },
    ConnectionAdded {
        source: Address,
        destination: Address,
    },
    ConnectionRemoved {
        source: Address,
        destination: Address,
    },
    ConnectionEnabled {
        source: Address,
        destination: Address,
    },
    ConnectionDisabled {
        source: Address,
        destination: Address,
    },
    MulticastMemberAdded {
        group: Address,
        member: Address,
    },
    MulticastMemberRemoved {
        group: Address,
        member: Address,
    },
    CommTurnedOn {
        comm: CommId,
    },
    CommTurnedOff {
        comm: CommId,
    },
    RouterTurnedOn {
        router: RouterId,
    },
    RouterTurnedOff {
        router: RouterId,
    },
    MessageTransmitted {
        serial: u64,
        from: Address,
        to: Address,
    },
    MessageReceived {
        serial: u64,
        comm: CommId,
        source: Address,
        destination: Address,
    },
    MessageDiscarded {
        serial: u64,
        at: Address,
        reason: FailureReason,
    },
    MessageFailedRouting {
        serial: u64,
        at: Address,
        destination: Address,
        reason: FailureReason,
    },
    DeliveryAborted {
        serial: u64,
        from: Address,
        to: Address,
    },
    PlatformDeleted {
        platform: String,
    },
}

impl Notification {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Notification::CommAdded { .. } => "CommAdded",
            Notification::CommRemoved { .. } => "CommRemoved",
            Notification::CommEnabled { .. } => "CommEnabled",
            Notification::CommDisabled { .. } => "CommDisabled",
            Notification::NetworkAdded { .. } => "NetworkAdded",
            Notification::NetworkRemoved { .. } => "NetworkRemoved",
            Notification::ConnectionAdded { .. } => "ConnectionAdded",
            Notification::ConnectionRemoved { .. } => "ConnectionRemoved",
            Notification::ConnectionEnabled { .. } => "ConnectionEnabled",
            Notification::ConnectionDisabled { .. } => "ConnectionDisabled",
            Notification::MulticastMemberAdded { .. } => "MulticastMemberAdded",
            Notification::MulticastMemberRemoved { .. } => "MulticastMemberRemoved",
            Notification::CommTurnedOn { .. } => "CommTurnedOn",
            Notification::CommTurnedOff { .. } => "CommTurnedOff",
            Notification::RouterTurnedOn { .. } => "RouterTurnedOn",
            Notification::RouterTurnedOff { .. } => "RouterTurnedOff",
            Notification::MessageTransmitted { .. } => "MessageTransmitted",
            Notification::MessageReceived { .. } => "MessageReceived",
            Notification::MessageDiscarded { .. } => "MessageDiscarded",
            Notification::MessageFailedRouting { .. } => "MessageFailedRouting",
            Notification::DeliveryAborted { .. } => "DeliveryAborted",
            Notification::PlatformDeleted { .. } => "PlatformDeleted",
        }
    }

    /// True for notifications describing a change of the truth topology.
    pub fn is_truth_change(&self) -> bool {
        matches!(
            self,
            Notification::CommAdded { .. }
                | Notification::CommRemoved { .. }
                | Notification::CommEnabled { .. }
                | Notification::CommDisabled { .. }
                | Notification::ConnectionAdded { .. }
                | Notification::ConnectionRemoved { .. }
                | Notification::ConnectionEnabled { .. }
                | Notification::ConnectionDisabled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(f64, &Notification)>;

/// Subscriber list for fabric notifications.
#[derive(Default)]
pub struct Observer {
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(f64, &Notification) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        before != self.subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn notify(&mut self, time: f64, notification: &Notification) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(time, notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observer = Observer::new();

        let sink = seen.clone();
        let id = observer.subscribe(move |time, notification| {
            sink.borrow_mut().push((time, notification.kind_name()));
        });

        let event = Notification::PlatformDeleted {
            platform: "alpha".to_string(),
        };
        observer.notify(1.0, &event);
        assert!(observer.unsubscribe(id));
        assert!(!observer.unsubscribe(id));
        observer.notify(2.0, &event);

        assert_eq!(*seen.borrow(), vec![(1.0, "PlatformDeleted")]);
        assert!(observer.is_empty());
    }
}
