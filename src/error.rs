use thiserror::Error;

use crate::address::Address;

/// Errors surfaced by the comm fabric.
///
/// Configuration errors are fatal at scenario load and always name the
/// offending object and value. Routing failures never appear here; they are
/// reported through the observer as notifications.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("address {address} collides with a reserved address or range")]
    ReservedCollision { address: Address },

    #[error("invalid configuration for '{object}' (value '{value}'): {message}")]
    Configuration {
        object: String,
        value: String,
        message: String,
    },

    #[error("OSPF router '{router}' has no area designation")]
    OspfMissingArea { router: String },

    #[error("OSPF area {area} is not connected to the designated backbone")]
    OspfBackbone { area: Address },

    #[error("OSPF area {area} has an inconsistent backbone setting")]
    OspfInconsistentBackbone { area: Address },

    #[error("router '{router}' has an invalid hop limit {value}")]
    InvalidHopLimit { router: String, value: usize },

    #[error("routing error: {0}")]
    Routing(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, CommError>;

impl CommError {
    pub fn configuration(
        object: impl Into<String>,
        value: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        CommError::Configuration {
            object: object.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}
