use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{CommError, Result};

pub const DEFAULT_HOP_LIMIT: usize = 64;

/// Uniform random delay bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min: 0.0, max: 0.0 };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        if self.max > self.min {
            rng.gen_range(self.min..self.max)
        } else {
            self.min
        }
    }

    pub fn validate(&self, object: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min < 0.0 || self.max < self.min {
            return Err(CommError::configuration(
                object,
                format!("[{}, {}]", self.min, self.max),
                "delay bounds must be finite, non-negative and ordered",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub name: String,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: usize,
    #[serde(default)]
    pub gateway: Option<Address>,
    #[serde(default = "default_true")]
    pub use_default_protocol: bool,
    #[serde(default)]
    pub use_multicast_protocol: bool,
    #[serde(default = "default_true")]
    pub automated_interface_linking: bool,
    #[serde(default)]
    pub protocols: Vec<ProtocolConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolConfig {
    Ospf(OspfConfig),
    Rip(RipConfig),
    AdHoc(AdHocConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OspfConfig {
    #[serde(default)]
    pub areas: Vec<Address>,
    #[serde(default)]
    pub backbone: Address,
    #[serde(default = "default_dr_priority")]
    pub priority_dr: usize,
    #[serde(default = "default_hello_interval")]
    pub hello_interval: f64,
    #[serde(default = "default_hold_timer")]
    pub hold_timer: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipConfig {
    #[serde(default = "default_update_interval")]
    pub update_interval: f64,
    #[serde(default = "default_invalidation_timeout")]
    pub invalidation_timeout: f64,
    #[serde(default = "default_garbage_collection_timeout")]
    pub garbage_collection_timeout: f64,
    #[serde(default)]
    pub poisoned_reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdHocConfig {
    #[serde(default = "default_adhoc_delay")]
    pub comm_added_delay: DelayRange,
    #[serde(default = "default_adhoc_delay")]
    pub comm_removed_delay: DelayRange,
    #[serde(default = "default_adhoc_delay")]
    pub connection_added_delay: DelayRange,
    #[serde(default = "default_adhoc_delay")]
    pub connection_removed_delay: DelayRange,
}

fn default_true() -> bool {
    true
}

fn default_hop_limit() -> usize {
    DEFAULT_HOP_LIMIT
}

fn default_dr_priority() -> usize {
    usize::MAX
}

fn default_hello_interval() -> f64 {
    10.0
}

fn default_hold_timer() -> f64 {
    40.0
}

fn default_update_interval() -> f64 {
    30.0
}

fn default_invalidation_timeout() -> f64 {
    180.0
}

fn default_garbage_collection_timeout() -> f64 {
    120.0
}

fn default_adhoc_delay() -> DelayRange {
    DelayRange::ZERO
}

impl Default for OspfConfig {
    fn default() -> Self {
        Self {
            areas: Vec::new(),
            backbone: Address::NULL,
            priority_dr: default_dr_priority(),
            hello_interval: default_hello_interval(),
            hold_timer: default_hold_timer(),
        }
    }
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            invalidation_timeout: default_invalidation_timeout(),
            garbage_collection_timeout: default_garbage_collection_timeout(),
            poisoned_reverse: false,
        }
    }
}

impl Default for AdHocConfig {
    fn default() -> Self {
        Self {
            comm_added_delay: DelayRange::ZERO,
            comm_removed_delay: DelayRange::ZERO,
            connection_added_delay: DelayRange::ZERO,
            connection_removed_delay: DelayRange::ZERO,
        }
    }
}

impl RouterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hop_limit: DEFAULT_HOP_LIMIT,
            gateway: None,
            use_default_protocol: true,
            use_multicast_protocol: false,
            automated_interface_linking: true,
            protocols: Vec::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hop_limit == 0 {
            return Err(CommError::InvalidHopLimit {
                router: self.name.clone(),
                value: self.hop_limit,
            });
        }
        for protocol in &self.protocols {
            match protocol {
                ProtocolConfig::Ospf(ospf) => {
                    if ospf.hello_interval <= 0.0 || ospf.hold_timer <= 0.0 {
                        return Err(CommError::configuration(
                            &self.name,
                            format!("hello {} hold {}", ospf.hello_interval, ospf.hold_timer),
                            "OSPF timers must be positive",
                        ));
                    }
                }
                ProtocolConfig::Rip(rip) => {
                    if rip.update_interval <= 0.0
                        || rip.invalidation_timeout <= 0.0
                        || rip.garbage_collection_timeout <= 0.0
                    {
                        return Err(CommError::configuration(
                            &self.name,
                            format!(
                                "update {} invalidation {} gc {}",
                                rip.update_interval, rip.invalidation_timeout, rip.garbage_collection_timeout
                            ),
                            "RIP timers must be positive",
                        ));
                    }
                }
                ProtocolConfig::AdHoc(adhoc) => {
                    let object = format!("{} ad hoc delays", self.name);
                    adhoc.comm_added_delay.validate(&object)?;
                    adhoc.comm_removed_delay.validate(&object)?;
                    adhoc.connection_added_delay.validate(&object)?;
                    adhoc.connection_removed_delay.validate(&object)?;
                }
            }
        }
        Ok(())
    }

    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RouterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
