use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{CommandKind, DeviceType, IpVersion, LocationRegionResponse, LocationResponse};

/// Config holds process settings taken from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub config_file: String,
    pub templates_dir: String,
    pub community_db: String,
    pub community_dirs: Vec<String>,
    pub listen_addr: String,
    pub asrank_url: String,
    pub http_timeout_secs: u64,
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            config_file: get_env("LG_CONFIG_FILE", "config.yml"),
            templates_dir: get_env("LG_TEMPLATES_DIR", "templates"),
            community_db: get_env("LG_COMMUNITY_DB", "mapsdb/maps.db"),
            community_dirs: split_list(&get_env("LG_COMMUNITY_DIRS", "mapsdb/asns,mapsdb/override")),
            listen_addr: get_env("LG_LISTEN_ADDR", "0.0.0.0:8080"),
            asrank_url: get_env("LG_ASRANK_URL", "https://api.asrank.caida.org/v2/graphql"),
            http_timeout_secs: get_env("LG_HTTP_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            cors_origins: split_list(&get_env("LG_CORS_ORIGINS", "http://localhost")),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ========== Looking glass file ==========

#[derive(Debug, Clone, Deserialize)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationConfig {
    pub groups: HashMap<String, AuthCredentials>,
}

pub const FALLBACK_AUTH_GROUP: &str = "fallback";

/// Source address or interface for ping and traceroute, per destination IP version
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub ipv6: Option<String>,
}

impl SourcesConfig {
    pub fn for_version(&self, version: IpVersion) -> Option<&str> {
        match version {
            IpVersion::V4 => self.ipv4.as_deref(),
            IpVersion::V6 => self.ipv6.as_deref(),
        }
        .filter(|s| !s.is_empty())
    }
}

/// LocationProfile is a vantage point and the device behind it
#[derive(Debug, Clone, Deserialize)]
pub struct LocationProfile {
    #[serde(skip_deserializing)]
    pub code: String,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_iso: String,
    pub device: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub authentication: Option<String>,
    #[serde(default)]
    pub source: SourcesConfig,
}

/// CLI text for one vendor, per destination IP version
#[derive(Debug, Clone, Deserialize)]
pub struct CommandVariants {
    pub ipv4: String,
    pub ipv6: String,
}

impl CommandVariants {
    pub fn for_version(&self, version: IpVersion) -> &str {
        match version {
            IpVersion::V4 => &self.ipv4,
            IpVersion::V6 => &self.ipv6,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub ping: HashMap<DeviceType, CommandVariants>,
    #[serde(default)]
    pub traceroute: HashMap<DeviceType, CommandVariants>,
    #[serde(default)]
    pub bgp: HashMap<DeviceType, CommandVariants>,
}

impl CommandsConfig {
    pub fn for_kind(&self, command: CommandKind) -> &HashMap<DeviceType, CommandVariants> {
        match command {
            CommandKind::Ping => &self.ping,
            CommandKind::Traceroute => &self.traceroute,
            CommandKind::Bgp => &self.bgp,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheLayerConfig {
    pub enabled: bool,
    pub ttl: u64,
}

impl CacheLayerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    #[serde(default = "default_commands_cache")]
    pub commands: CacheLayerConfig,
    #[serde(default = "default_lookup_cache")]
    pub asn: CacheLayerConfig,
    #[serde(default = "default_lookup_cache")]
    pub ptr: CacheLayerConfig,
    #[serde(default = "default_lookup_cache")]
    pub ip2asn: CacheLayerConfig,
    /// Shared Redis store; without it each process keeps its own in-memory cache
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_dsn")]
    pub dsn: String,
    /// Connect and per-command timeout, in seconds
    #[serde(default = "default_redis_timeout")]
    pub timeout: u64,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_redis_dsn() -> String {
    "redis://localhost:6379/".to_string()
}

fn default_redis_timeout() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_cache_namespace(),
            commands: default_commands_cache(),
            asn: default_lookup_cache(),
            ptr: default_lookup_cache(),
            ip2asn: default_lookup_cache(),
            redis: None,
        }
    }
}

fn default_cache_namespace() -> String {
    "lgapi".to_string()
}

fn default_commands_cache() -> CacheLayerConfig {
    CacheLayerConfig { enabled: false, ttl: 180 }
}

fn default_lookup_cache() -> CacheLayerConfig {
    CacheLayerConfig { enabled: true, ttl: 3600 }
}

/// Per-command limit for multi-target requests
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CommandLimit {
    #[serde(default = "default_limit")]
    pub ping: usize,
    #[serde(default = "default_limit")]
    pub bgp: usize,
}

impl Default for CommandLimit {
    fn default() -> Self {
        Self { ping: default_limit(), bgp: default_limit() }
    }
}

impl CommandLimit {
    pub fn for_kind(&self, command: CommandKind) -> usize {
        match command {
            CommandKind::Bgp => self.bgp,
            _ => self.ping,
        }
    }
}

fn default_limit() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub max_sources: CommandLimit,
    #[serde(default = "default_max_destinations")]
    pub max_destinations: CommandLimit,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sources: CommandLimit::default(),
            max_destinations: default_max_destinations(),
        }
    }
}

fn default_max_destinations() -> CommandLimit {
    CommandLimit { ping: 5, bgp: 5 }
}

/// Session timeouts in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_timeout")]
    pub default: u64,
    #[serde(default = "default_traceroute_timeout")]
    pub traceroute: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default: default_timeout(),
            traceroute: default_traceroute_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn for_command(&self, command: CommandKind) -> Duration {
        match command {
            CommandKind::Traceroute => Duration::from_secs(self.traceroute),
            _ => Duration::from_secs(self.default),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_traceroute_timeout() -> u64 {
    600
}

/// Which traceroute hops get a reverse DNS lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    Off,
    #[default]
    Missing,
    All,
}

/// Data source for IP to ASN lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpToAsnSource {
    #[default]
    Cymru,
    Routeviews,
}

/// LgConfig is the looking glass file. Validated once at load and read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct LgConfig {
    #[serde(default = "default_title")]
    pub title: String,
    pub authentication: AuthenticationConfig,
    pub locations: BTreeMap<String, LocationProfile>,
    pub commands: CommandsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub resolve_traceroute_hops: ResolveMode,
    #[serde(default)]
    pub ip_to_asn_source: IpToAsnSource,
}

fn default_title() -> String {
    "Looking Glass API".to_string()
}

impl LgConfig {
    /// Read and validate the looking glass file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read looking glass config {}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid looking glass config {}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut cfg: LgConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.authentication.groups.contains_key(FALLBACK_AUTH_GROUP) {
            return Err(ConfigError::Invalid(
                "The 'fallback' group must exist under 'authentication.groups'".to_string(),
            ));
        }

        for (code, location) in self.locations.iter_mut() {
            location.code = code.clone();

            if let Some(group) = &location.authentication {
                if !self.authentication.groups.contains_key(group) {
                    return Err(ConfigError::Invalid(format!(
                        "Location {} references unknown authentication group '{}'",
                        code, group
                    )));
                }
            }

            for command in CommandKind::ALL {
                if !self.commands.for_kind(command).contains_key(&location.device_type) {
                    tracing::warn!(
                        "Location {} ({}) has no '{}' command configured",
                        code,
                        location.device_type,
                        command
                    );
                }
            }
        }

        Ok(())
    }

    pub fn location(&self, code: &str) -> Result<&LocationProfile, ConfigError> {
        self.locations
            .get(code)
            .ok_or_else(|| ConfigError::UnknownLocation(code.to_string()))
    }

    pub fn command_variants(
        &self,
        command: CommandKind,
        device_type: DeviceType,
    ) -> Result<&CommandVariants, ConfigError> {
        self.commands
            .for_kind(command)
            .get(&device_type)
            .ok_or(ConfigError::UnsupportedCommand { command, device_type })
    }

    /// Credentials for a location's auth group, falling back to the 'fallback' group
    pub fn credentials(&self, auth_group: Option<&str>) -> Option<&AuthCredentials> {
        auth_group
            .and_then(|group| self.authentication.groups.get(group))
            .or_else(|| self.authentication.groups.get(FALLBACK_AUTH_GROUP))
    }

    pub fn location_list(&self) -> Vec<LocationResponse> {
        self.locations
            .iter()
            .map(|(code, location)| LocationResponse {
                code: code.clone(),
                name: location.name.clone(),
                region: location.region.clone(),
            })
            .collect()
    }

    /// Locations grouped by region, regions in first-seen order
    pub fn locations_by_region(&self) -> Vec<LocationRegionResponse> {
        let mut regions: Vec<LocationRegionResponse> = Vec::new();
        for location in self.location_list() {
            let region = if location.region.is_empty() {
                "No Region".to_string()
            } else {
                location.region.clone()
            };
            match regions.iter_mut().find(|r| r.name == region) {
                Some(existing) => existing.locations.push(location),
                None => regions.push(LocationRegionResponse {
                    name: region,
                    locations: vec![location],
                }),
            }
        }
        regions
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
title: Test Looking Glass
authentication:
  groups:
    fallback:
      username: netuser
      password: secret
    juniper:
      username: jnpr
      password: jsecret
locations:
  LON:
    name: London
    region: Western Europe
    country: United Kingdom
    country_iso: GB
    device: lon-rtr1.example.net
    type: cisco_iosxr
    source:
      ipv4: 192.0.2.1
      ipv6: 2001:db8::1
  FRA:
    name: Frankfurt
    region: Western Europe
    device: fra-rtr1.example.net
    type: juniper_junos
    authentication: juniper
    source:
      ipv4: lo0.0
  SIN:
    name: Singapore
    region: Asia
    device: sin-rtr1.example.net
    type: arista_eos
commands:
  ping:
    cisco_iosxr:
      ipv4: ping IPADDRESS source SOURCE count 5
      ipv6: ping ipv6 IPADDRESS source SOURCE count 5
    juniper_junos:
      ipv4: ping IPADDRESS source SOURCE count 5
      ipv6: ping inet6 IPADDRESS source SOURCE count 5
    arista_eos:
      ipv4: ping IPADDRESS repeat 5
      ipv6: ping ipv6 IPADDRESS repeat 5
  traceroute:
    cisco_iosxr:
      ipv4: traceroute IPADDRESS source SOURCE
      ipv6: traceroute ipv6 IPADDRESS source SOURCE
    juniper_junos:
      ipv4: traceroute IPADDRESS source SOURCE
      ipv6: traceroute inet6 IPADDRESS source SOURCE
  bgp:
    cisco_iosxr:
      ipv4: show bgp ipv4 unicast IPADDRESS
      ipv6: show bgp ipv6 unicast IPADDRESS
    juniper_junos:
      ipv4: show route IPADDRESS protocol bgp detail
      ipv6: show route IPADDRESS protocol bgp detail
    arista_eos:
      ipv4: show ip bgp IPADDRESS
      ipv6: show ipv6 bgp IPADDRESS
cache:
  enabled: true
  commands:
    enabled: true
    ttl: 120
resolve_traceroute_hops: missing
"#;

    pub(crate) fn sample_config() -> LgConfig {
        LgConfig::from_yaml(SAMPLE).unwrap()
    }

    #[test]
    fn test_load_sample() {
        let cfg = sample_config();
        assert_eq!(cfg.title, "Test Looking Glass");
        assert_eq!(cfg.locations.len(), 3);

        let lon = cfg.location("LON").unwrap();
        assert_eq!(lon.code, "LON");
        assert_eq!(lon.device_type, DeviceType::CiscoIosxr);
        assert_eq!(lon.source.for_version(IpVersion::V6), Some("2001:db8::1"));

        let sin = cfg.location("SIN").unwrap();
        assert_eq!(sin.source.for_version(IpVersion::V4), None);

        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.commands.ttl, 120);
        // lookup layers keep their defaults
        assert!(cfg.cache.asn.enabled);
        assert_eq!(cfg.cache.ptr.ttl, 3600);
        assert_eq!(cfg.limits.max_destinations.bgp, 5);
        assert_eq!(cfg.timeouts.for_command(CommandKind::Traceroute), Duration::from_secs(600));
        assert_eq!(cfg.timeouts.for_command(CommandKind::Bgp), Duration::from_secs(60));
        assert_eq!(cfg.ip_to_asn_source, IpToAsnSource::Cymru);
        assert!(cfg.cache.redis.is_none());
    }

    #[test]
    fn test_redis_section() {
        let with_redis = SAMPLE.replace(
            "cache:\n  enabled: true\n",
            "cache:\n  enabled: true\n  redis:\n    dsn: redis://cache.example.net:6380/2\n",
        );
        let cfg = LgConfig::from_yaml(&with_redis).unwrap();
        let redis = cfg.cache.redis.as_ref().unwrap();
        assert_eq!(redis.dsn, "redis://cache.example.net:6380/2");
        // default timeout
        assert_eq!(redis.timeout(), Duration::from_secs(5));

        let defaults = SAMPLE.replace("cache:\n  enabled: true\n", "cache:\n  enabled: true\n  redis: {}\n");
        let cfg = LgConfig::from_yaml(&defaults).unwrap();
        assert_eq!(cfg.cache.redis.unwrap().dsn, "redis://localhost:6379/");
    }

    #[test]
    fn test_unknown_location_and_command() {
        let cfg = sample_config();
        assert_eq!(
            cfg.location("XXX").unwrap_err(),
            ConfigError::UnknownLocation("XXX".into())
        );
        assert!(matches!(
            cfg.command_variants(CommandKind::Traceroute, DeviceType::AristaEos),
            Err(ConfigError::UnsupportedCommand { .. })
        ));
    }

    #[test]
    fn test_unknown_device_type_rejected() {
        let bad = SAMPLE.replace("type: arista_eos", "type: arista");
        assert!(matches!(LgConfig::from_yaml(&bad), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_fallback_rejected() {
        let bad = SAMPLE.replace("    fallback:", "    other:");
        assert!(LgConfig::from_yaml(&bad).is_err());
    }

    #[test]
    fn test_unknown_auth_group_rejected() {
        let bad = SAMPLE.replace("authentication: juniper", "authentication: nope");
        let err = LgConfig::from_yaml(&bad).unwrap_err();
        assert!(err.to_string().contains("unknown authentication group"));
    }

    #[test]
    fn test_credentials_fallback() {
        let cfg = sample_config();
        assert_eq!(cfg.credentials(Some("juniper")).unwrap().username, "jnpr");
        assert_eq!(cfg.credentials(None).unwrap().username, "netuser");
        assert_eq!(cfg.credentials(Some("missing")).unwrap().username, "netuser");
    }

    #[test]
    fn test_locations_by_region() {
        let cfg = sample_config();
        let regions = cfg.locations_by_region();
        // BTreeMap order: FRA, LON, SIN
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].name, "Western Europe");
        assert_eq!(regions[0].locations.len(), 2);
        assert_eq!(regions[1].name, "Asia");
        assert_eq!(regions[1].locations[0].code, "SIN");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
