pub mod router_config;

use std::collections::BTreeSet;
use std::fs;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{CommError, Result as CommResult};
use crate::network::NetworkKind;

use self::router_config::{DelayRange, RouterConfig};

/// A complete scenario: topology, platforms and timed actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    #[serde(default)]
    pub reserved: Vec<Address>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub kind: NetworkKind,
    /// Comm full names (`platform.comm`) joined once every comm exists.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub links: Vec<ConnectionConfig>,
    #[serde(default)]
    pub suppress_reserved_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
    #[serde(default)]
    pub comms: Vec<CommConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    pub name: String,
    /// Router on the same platform; the platform's first router when absent.
    #[serde(default)]
    pub router: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub transmit_delay: f64,
    #[serde(default)]
    pub igmp: IgmpConfig,
    #[serde(default)]
    pub groups: Vec<Address>,
    /// Becomes the router's gateway unless the router names its own.
    #[serde(default)]
    pub gateway: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IgmpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_igmp_delay")]
    pub join_delay: DelayRange,
    #[serde(default = "default_igmp_delay")]
    pub leave_delay: DelayRange,
}

/// Endpoints are addresses or comm full names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub time: f64,
    #[serde(flatten)]
    pub action: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Send { from: String, to: String, #[serde(default)] body: String },
    EnableComm { comm: String },
    DisableComm { comm: String },
    EnableConnection { source: String, destination: String },
    DisableConnection { source: String, destination: String },
    JoinGroup { comm: String, group: Address },
    LeaveGroup { comm: String, group: Address },
    TurnOnComm { comm: String },
    TurnOffComm { comm: String },
    TurnOnRouter { router: String },
    TurnOffRouter { router: String },
    RemovePlatform { platform: String },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Send { .. } => "send",
            ActionKind::EnableComm { .. } => "enable_comm",
            ActionKind::DisableComm { .. } => "disable_comm",
            ActionKind::EnableConnection { .. } => "enable_connection",
            ActionKind::DisableConnection { .. } => "disable_connection",
            ActionKind::JoinGroup { .. } => "join_group",
            ActionKind::LeaveGroup { .. } => "leave_group",
            ActionKind::TurnOnComm { .. } => "turn_on_comm",
            ActionKind::TurnOffComm { .. } => "turn_off_comm",
            ActionKind::TurnOnRouter { .. } => "turn_on_router",
            ActionKind::TurnOffRouter { .. } => "turn_off_router",
            ActionKind::RemovePlatform { .. } => "remove_platform",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_end_time() -> f64 {
    600.0
}

fn default_igmp_delay() -> DelayRange {
    DelayRange::new(0.0, 1.0)
}

impl Default for IgmpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            join_delay: default_igmp_delay(),
            leave_delay: default_igmp_delay(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            end_time: default_end_time(),
            reserved: Vec::new(),
            networks: Vec::new(),
            platforms: Vec::new(),
            connections: Vec::new(),
            actions: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ScenarioConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|platform| platform.name == name)
    }

    /// Checks values that can be judged without building the fabric.
    pub fn validate(&self) -> CommResult<()> {
        if !self.end_time.is_finite() || self.end_time < 0.0 {
            return Err(CommError::configuration("scenario", self.end_time, "end time must be a non-negative number"));
        }

        let mut platforms = BTreeSet::new();
        for platform in &self.platforms {
            if !platforms.insert(platform.name.as_str()) {
                return Err(CommError::configuration("platform", &platform.name, "duplicate platform name"));
            }
            let mut routers = BTreeSet::new();
            for router in &platform.routers {
                if !routers.insert(router.name.as_str()) {
                    return Err(CommError::configuration(
                        format!("platform {}", platform.name),
                        &router.name,
                        "duplicate router name",
                    ));
                }
                router.validate()?;
            }
            let mut comms = BTreeSet::new();
            for comm in &platform.comms {
                let object = format!("comm {}.{}", platform.name, comm.name);
                if !comms.insert(comm.name.as_str()) {
                    return Err(CommError::configuration(object, &comm.name, "duplicate comm name"));
                }
                if !comm.transmit_delay.is_finite() || comm.transmit_delay < 0.0 {
                    return Err(CommError::configuration(object, comm.transmit_delay, "transmit delay must be non-negative"));
                }
                if let Some(router) = &comm.router {
                    if !platform.routers.is_empty() && !routers.contains(router.as_str()) {
                        return Err(CommError::configuration(object, router, "unknown router"));
                    }
                }
                comm.igmp.join_delay.validate(&object)?;
                comm.igmp.leave_delay.validate(&object)?;
            }
        }

        let mut networks = BTreeSet::new();
        for network in &self.networks {
            if !networks.insert(network.name.as_str()) {
                return Err(CommError::configuration("network", &network.name, "duplicate network name"));
            }
        }

        for action in &self.actions {
            if !action.time.is_finite() || action.time < 0.0 {
                return Err(CommError::configuration(
                    format!("action {}", action.action.name()),
                    action.time,
                    "action time must be a non-negative number",
                ));
            }
        }
        Ok(())
    }
}

impl CommConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            router: None,
            network: None,
            address: None,
            transmit_delay: 0.0,
            igmp: IgmpConfig::default(),
            groups: Vec::new(),
            gateway: None,
        }
    }

    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }
}

impl PlatformConfig {
    /// Routers to build, with a default router when none is configured.
    pub fn effective_routers(&self) -> Vec<RouterConfig> {
        if self.routers.is_empty() {
            vec![RouterConfig::new("router")]
        } else {
            self.routers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_use_tagged_json() {
        let action: ActionConfig = serde_json::from_str(
            r#"{"time": 12.5, "type": "disable_connection", "source": "a.c", "destination": "10.0.0.2"}"#,
        )
        .unwrap();
        assert_eq!(action.time, 12.5);
        assert_eq!(
            action.action,
            ActionKind::DisableConnection {
                source: "a.c".into(),
                destination: "10.0.0.2".into()
            }
        );
        assert_eq!(action.action.name(), "disable_connection");
    }

    #[test]
    fn missing_sections_take_defaults() {
        let scenario: ScenarioConfig =
            serde_json::from_str(r#"{"platforms": [{"name": "p", "comms": [{"name": "c"}]}]}"#).unwrap();
        assert_eq!(scenario.end_time, 600.0);
        let platform = scenario.platform("p").unwrap();
        assert_eq!(platform.comms[0].igmp, IgmpConfig::default());
        assert_eq!(platform.effective_routers()[0].name, "router");
        assert!(scenario.networks.is_empty());
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn validation_names_the_offending_comm() {
        let mut scenario = ScenarioConfig::default();
        let mut comm = CommConfig::new("radio");
        comm.transmit_delay = -1.0;
        scenario.platforms.push(PlatformConfig {
            name: "alpha".into(),
            routers: Vec::new(),
            comms: vec![comm],
        });
        match scenario.validate() {
            Err(CommError::Configuration { object, .. }) => assert_eq!(object, "comm alpha.radio"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scenario_survives_a_file_round_trip() {
        let mut scenario = ScenarioConfig {
            seed: 42,
            ..ScenarioConfig::default()
        };
        scenario.platforms.push(PlatformConfig {
            name: "alpha".into(),
            routers: vec![RouterConfig::new("core")],
            comms: vec![CommConfig::new("radio").on_network("lan").with_router("core")],
        });
        scenario.actions.push(ActionConfig {
            time: 3.0,
            action: ActionKind::RemovePlatform {
                platform: "alpha".into(),
            },
        });

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        scenario.save(path).unwrap();
        let loaded = ScenarioConfig::load(path).unwrap();

        assert_eq!(loaded.seed, 42);
        assert_eq!(loaded.platforms[0].comms[0].network.as_deref(), Some("lan"));
        assert_eq!(loaded.actions[0].action, scenario.actions[0].action);
    }
}
