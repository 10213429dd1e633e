use std::net::IpAddr;

/// Validate an IPv4 or IPv6 address (e.g., "192.0.2.1", "2001:db8::1").
pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Validate a network in CIDR notation. Host bits may be set ("10.1.1.5/24" is accepted).
pub fn is_valid_cidr(value: &str) -> bool {
    let Some((addr, len)) = value.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max_len = if addr.is_ipv4() { 32 } else { 128 };
    len.parse::<u8>().is_ok_and(|len| len <= max_len)
}

/// Validate a BGP lookup target: an address or a network
pub fn is_valid_ip_or_network(value: &str) -> bool {
    is_valid_ip(value) || is_valid_cidr(value)
}

/// Check a multi-target request list: between 1 and `max` entries, each accepted by `valid`.
/// Returns a message naming the first problem.
pub fn check_target_list(
    field: &str,
    values: &[String],
    max: usize,
    valid: impl Fn(&str) -> bool,
) -> Result<(), String> {
    if values.is_empty() {
        return Err(format!("at least one entry is required in '{}'", field));
    }
    if values.len() > max {
        return Err(format!("at most {} entries are allowed in '{}'", max, field));
    }
    if let Some(bad) = values.iter().find(|v| !valid(v.as_str())) {
        return Err(format!("invalid value in '{}': {}", field, bad));
    }
    Ok(())
}
