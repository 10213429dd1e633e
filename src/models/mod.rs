mod results;

pub use results::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Diagnostic commands a location can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Ping,
    Traceroute,
    Bgp,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Ping, CommandKind::Traceroute, CommandKind::Bgp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Ping => "ping",
            CommandKind::Traceroute => "traceroute",
            CommandKind::Bgp => "bgp",
        }
    }

    /// Ping and traceroute are sourced from a configured address/interface; bgp never is
    pub fn uses_source(&self) -> bool {
        !matches!(self, CommandKind::Bgp)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CLI dialect a device speaks. Determines both command syntax and the output template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    CiscoIosxr,
    CiscoIosxe,
    CiscoNxos,
    JuniperJunos,
    AristaEos,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::CiscoIosxr => "cisco_iosxr",
            DeviceType::CiscoIosxe => "cisco_iosxe",
            DeviceType::CiscoNxos => "cisco_nxos",
            DeviceType::JuniperJunos => "juniper_junos",
            DeviceType::AristaEos => "arista_eos",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cisco_iosxr" => Some(DeviceType::CiscoIosxr),
            "cisco_iosxe" => Some(DeviceType::CiscoIosxe),
            "cisco_nxos" => Some(DeviceType::CiscoNxos),
            "juniper_junos" => Some(DeviceType::JuniperJunos),
            "arista_eos" => Some(DeviceType::AristaEos),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// IP version of an address or CIDR. Anything unparseable is treated as IPv4.
    pub fn of(destination: &str) -> Self {
        let addr = destination.split('/').next().unwrap_or(destination);
        match addr.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => IpVersion::V6,
            _ => IpVersion::V4,
        }
    }
}

/// ExecutionUnit is one (location, command, destination) run on one device session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub location: String,
    pub command: CommandKind,
    pub destination: String,
}

impl ExecutionUnit {
    pub fn new(location: &str, command: CommandKind, destination: &str) -> Self {
        Self {
            location: location.to_string(),
            command,
            destination: destination.to_string(),
        }
    }
}

/// AggregatedResult holds everything one location produced for a multi-target request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResult {
    pub location: String,
    /// Raw output per destination, in execution order
    pub outputs: Vec<(String, String)>,
    pub errors: Vec<String>,
}

impl AggregatedResult {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }

    pub fn has_output(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Destination outputs joined in order, as the device would have printed them
    pub fn raw_output(&self) -> String {
        self.outputs
            .iter()
            .map(|(_, output)| output.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ========== Requests ==========

/// Body for multi-location, multi-destination requests
#[derive(Debug, Clone, Deserialize)]
pub struct MultiTargetBody {
    pub locations: Vec<String>,
    pub destinations: Vec<String>,
}

/// `?raw=true` skips parsing and enrichment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuery {
    #[serde(default)]
    pub raw: bool,
}

// ========== Locations ==========

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocationResponse {
    pub code: String,
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocationRegionResponse {
    pub name: String,
    pub locations: Vec<LocationResponse>,
}
