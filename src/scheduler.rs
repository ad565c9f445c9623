use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::address::Address;
use crate::config::ActionKind;
use crate::message::Message;
use crate::protocol::adhoc::AdHocHook;
use crate::{CommId, RouterId};

/// Everything the simulation knows how to execute at a point in time.
///
/// Router and comm timers, and deliveries, carry the owner's epoch at
/// schedule time; a mismatch at dispatch turns the event into a no-op.
#[derive(Debug, Clone)]
pub enum EventKind {
    Deliver {
        xmtr: CommId,
        epoch: u64,
        rcvr: Address,
        message: Message,
    },
    RipUpdate {
        router: RouterId,
        epoch: u64,
        triggered: bool,
    },
    RipInvalidate {
        router: RouterId,
        epoch: u64,
        destination: Address,
        anticipated: f64,
    },
    RipCollect {
        router: RouterId,
        epoch: u64,
        destination: Address,
        invalidation: u64,
    },
    OspfHello {
        router: RouterId,
        epoch: u64,
    },
    OspfTimeout {
        router: RouterId,
        epoch: u64,
    },
    IgmpMembership {
        comm: CommId,
        epoch: u64,
        group: Address,
        join: bool,
    },
    AdHocHook {
        router: RouterId,
        epoch: u64,
        hook: AdHocHook,
    },
    Scenario(ActionKind),
}

#[derive(Debug)]
struct Event {
    time: f64,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// A queue of events ordered by time, FIFO among equal times.
#[derive(Debug)]
pub struct EventQueue {
    queue: BinaryHeap<Reverse<Event>>,
    now: f64,
    next_seq: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            now: 0.0,
            next_seq: 0,
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Push an event. Times earlier than the last popped event are clamped
    /// so time never moves backward.
    pub fn push(&mut self, time: f64, kind: EventKind) {
        let time = if time.is_nan() || time < self.now {
            self.now
        } else {
            time
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Event { time, seq, kind }));
    }

    /// Pop the earliest event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<(f64, EventKind)> {
        let Reverse(event) = self.queue.pop()?;
        self.now = event.time;
        Some((event.time, event.kind))
    }

    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.peek().map(|Reverse(event)| event.time)
    }

    /// Moves the clock forward without executing anything.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
