use crate::config::LgConfig;
use crate::error::ConfigError;
use crate::models::{CommandKind, IpVersion};

pub const ADDRESS_PLACEHOLDER: &str = "IPADDRESS";
pub const SOURCE_PLACEHOLDER: &str = "SOURCE";

/// Build the CLI text a location's device runs for `command` towards `destination`.
///
/// The IP version of the destination picks the v4/v6 variant. `SOURCE` is only
/// substituted for ping and traceroute, and only when the location has a source
/// configured for that IP version; otherwise the placeholder is left as-is.
pub fn build_cli_cmd(
    cfg: &LgConfig,
    location: &str,
    command: CommandKind,
    destination: &str,
) -> Result<String, ConfigError> {
    let loc_cfg = cfg.location(location)?;
    let variants = cfg.command_variants(command, loc_cfg.device_type)?;

    let ip_version = IpVersion::of(destination);
    let mut cli_cmd = variants
        .for_version(ip_version)
        .replace(ADDRESS_PLACEHOLDER, destination);

    if command.uses_source() {
        if let Some(source) = loc_cfg.source.for_version(ip_version) {
            cli_cmd = cli_cmd.replace(SOURCE_PLACEHOLDER, source);
        }
    }

    Ok(cli_cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[test]
    fn test_ping_v4_with_source() {
        let cfg = sample_config();
        let cmd = build_cli_cmd(&cfg, "LON", CommandKind::Ping, "8.8.8.8").unwrap();
        assert_eq!(cmd, "ping 8.8.8.8 source 192.0.2.1 count 5");
    }

    #[test]
    fn test_traceroute_v6_picks_v6_variant_and_source() {
        let cfg = sample_config();
        let cmd = build_cli_cmd(&cfg, "LON", CommandKind::Traceroute, "2001:4860:4860::8888").unwrap();
        assert_eq!(cmd, "traceroute ipv6 2001:4860:4860::8888 source 2001:db8::1");
    }

    #[test]
    fn test_bgp_prefix() {
        let cfg = sample_config();
        let cmd = build_cli_cmd(&cfg, "FRA", CommandKind::Bgp, "8.8.8.0/24").unwrap();
        assert_eq!(cmd, "show route 8.8.8.0/24 protocol bgp detail");
    }

    #[test]
    fn test_missing_source_leaves_placeholder() {
        let cfg = sample_config();
        // FRA has no ipv6 source configured
        let cmd = build_cli_cmd(&cfg, "FRA", CommandKind::Ping, "2001:db8::53").unwrap();
        assert_eq!(cmd, "ping inet6 2001:db8::53 source SOURCE count 5");
    }

    #[test]
    fn test_malformed_destination_uses_v4_variant() {
        let cfg = sample_config();
        let cmd = build_cli_cmd(&cfg, "LON", CommandKind::Ping, "not-an-ip").unwrap();
        assert_eq!(cmd, "ping not-an-ip source 192.0.2.1 count 5");
    }

    #[test]
    fn test_no_unresolved_placeholders() {
        let cfg = sample_config();
        for location in ["LON", "FRA", "SIN"] {
            for command in CommandKind::ALL {
                for destination in ["1.1.1.1", "9.9.9.0/24"] {
                    let Ok(cmd) = build_cli_cmd(&cfg, location, command, destination) else {
                        continue;
                    };
                    assert!(!cmd.contains(ADDRESS_PLACEHOLDER), "{}", cmd);
                    let loc = cfg.location(location).unwrap();
                    if command != CommandKind::Bgp && loc.source.ipv4.is_some() {
                        assert!(!cmd.contains(SOURCE_PLACEHOLDER), "{}", cmd);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unknown_location_and_vendor_combination() {
        let cfg = sample_config();
        assert_eq!(
            build_cli_cmd(&cfg, "NYC", CommandKind::Ping, "1.1.1.1").unwrap_err(),
            ConfigError::UnknownLocation("NYC".into())
        );
        assert!(matches!(
            build_cli_cmd(&cfg, "SIN", CommandKind::Traceroute, "1.1.1.1"),
            Err(ConfigError::UnsupportedCommand { .. })
        ));
    }
}
