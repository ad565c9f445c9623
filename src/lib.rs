pub mod address;
pub mod algorithms;
pub mod comm;
pub mod config;
pub mod error;
pub mod graph;
pub mod layer;
pub mod message;
pub mod network;
pub mod observer;
pub mod protocol;
pub mod reserved;
pub mod router;
pub mod scheduler;
pub mod simulation;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use address::Address;
pub use error::{CommError, Result};
pub use observer::{FailureReason, Notification};
pub use simulation::Simulation;

/// Index of a comm inside the simulation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommId(pub usize);

/// Index of a router inside the simulation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouterId(pub usize);

impl fmt::Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comm#{}", self.0)
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "router#{}", self.0)
    }
}
