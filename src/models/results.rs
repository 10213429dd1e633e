use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ========== AS Rank ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsnOrganization {
    #[serde(rename = "orgName")]
    pub org_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsnCountry {
    pub iso: String,
    pub name: String,
}

/// ASN metadata as returned by CAIDA AS Rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsnInfo {
    #[serde(rename = "asnName")]
    pub asn_name: String,
    pub rank: i64,
    pub organization: Option<AsnOrganization>,
    pub country: Option<AsnCountry>,
}

// ========== BGP ==========

/// Community string and human readable mapping for a BGP path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpCommunity {
    pub community: String,
    pub description: Option<String>,
}

/// Individual BGP path for a prefix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BgpPath {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communities: Option<Vec<BgpCommunity>>,
    pub metric: Option<String>,
    pub local_pref: Option<String>,
    pub best_path: Option<bool>,
    pub next_hop: Option<String>,
    pub as_path: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpData {
    pub prefix: String,
    pub paths: Vec<BgpPath>,
    /// Unique AS paths observed for this prefix, first-seen order
    pub as_paths: Vec<Vec<u32>>,
    pub asn_info: BTreeMap<u32, AsnInfo>,
}

// ========== Ping ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingData {
    pub ip_address: String,
    pub packet_loss: Option<u32>,
    pub rtt_min: Option<String>,
    pub rtt_avg: Option<String>,
    pub rtt_max: Option<String>,
    pub packet_count: Option<String>,
    pub packet_size: Option<String>,
}

// ========== Traceroute ==========

/// Origin information for a hop address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpAsnInfo {
    pub asn: Option<u32>,
    pub bgp_prefix: Option<String>,
    pub registry: Option<String>,
    #[serde(default)]
    pub asrank: Option<AsnInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop_number: Option<String>,
    pub ip_address: Option<String>,
    pub rtt: Option<String>,
    pub fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<IpAsnInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteData {
    pub ip_address: String,
    pub hops: Vec<TracerouteHop>,
}

// ========== Responses ==========

/// Structured output of one command, shape depends on the command kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParsedOutput {
    Bgp(Vec<BgpData>),
    Ping(Vec<PingData>),
    Traceroute(Vec<TracerouteData>),
}

impl ParsedOutput {
    pub fn empty(command: super::CommandKind) -> Self {
        match command {
            super::CommandKind::Bgp => ParsedOutput::Bgp(Vec::new()),
            super::CommandKind::Ping => ParsedOutput::Ping(Vec::new()),
            super::CommandKind::Traceroute => ParsedOutput::Traceroute(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParsedOutput::Bgp(v) => v.is_empty(),
            ParsedOutput::Ping(v) => v.is_empty(),
            ParsedOutput::Traceroute(v) => v.is_empty(),
        }
    }
}

/// CommandResult is the response for a single location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    /// Empty list when raw only
    pub parsed_output: ParsedOutput,
    pub raw_output: String,
    pub command: String,
    pub location: String,
    pub location_name: String,
    pub raw_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationResult {
    pub name: String,
    pub results: Option<CommandResult>,
}

/// MultiResult is the response for multi-location, multi-destination requests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiResult {
    pub errors: Vec<String>,
    pub locations: Vec<LocationResult>,
    pub raw_only: bool,
}
