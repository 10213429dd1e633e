use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::{group_by, Enricher};
use crate::config::ResolveMode;
use crate::models::{DeviceType, TracerouteData, TracerouteHop};
use crate::parsing::FlatRecord;

const PROBE_PATTERN: &str = r"^(?:(?P<fqdn>[\w\.-]+) \((?P<ip>(?:\d{1,3}\.){3}\d{1,3}|(?:[a-fA-F0-9:]+:+)+[a-fA-F0-9]+)\)|(?P<ip_only>(?:\d{1,3}\.){3}\d{1,3}|(?:[a-fA-F0-9:]+:+)+[a-fA-F0-9]+))?\s*(?P<rtt>\d+\.\d+)?$";

fn probe_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PROBE_PATTERN).expect("valid probe pattern"))
}

// RTT unit between probes; "ms" inside a hostname is not a separator
fn unit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\bms(?:\s+|$)").expect("valid rtt unit pattern"))
}

/// Format like C's `%g`: six significant digits, trailing zeros removed
fn format_g(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }

    let exponent = value.abs().log10().floor() as i32;
    if !(-4..6).contains(&exponent) {
        let formatted = format!("{:.5e}", value);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = trim_fraction(mantissa);
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }

    let decimals = (5 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// `"12.345"` becomes `"12.345 msec"`. Values that are not numbers are kept as-is.
pub fn format_rtt(rtt: &str) -> String {
    match rtt.trim().parse::<f64>() {
        Ok(value) => format!("{} msec", format_g(value)),
        Err(_) => rtt.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Flatten multi-probe hops (`hop_number`, `probes` text) into one entry per
/// responding address.
///
/// Each `*` becomes its own entry with no address. Consecutive probes answered
/// by the same address and name collapse into one entry with their RTTs joined.
/// Only the first entry of a physical hop keeps the hop number.
pub fn reshape_junos_hops(hops: &[(String, String)]) -> Vec<TracerouteHop> {
    let (probe_re, unit_re) = (probe_regex(), unit_regex());
    let mut flat: Vec<TracerouteHop> = Vec::new();

    for (number, probes) in hops {
        let mut hop_number = non_empty(Some(number.as_str()));
        let mut last_ip: Option<String> = None;
        let mut last_fqdn: Option<String> = None;

        for segment in unit_re.split(probes).map(str::trim).filter(|s| !s.is_empty()) {
            for _ in 0..segment.matches('*').count() {
                flat.push(TracerouteHop {
                    hop_number: hop_number.take(),
                    rtt: Some("*".to_string()),
                    ..Default::default()
                });
            }

            let segment = segment.replace('*', "");
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let Some(caps) = probe_re.captures(segment) else {
                continue;
            };
            let ip = caps
                .name("ip")
                .or_else(|| caps.name("ip_only"))
                .map(|m| m.as_str().to_string());
            let fqdn = caps
                .name("fqdn")
                .map(|m| m.as_str().to_string())
                .filter(|fqdn| Some(fqdn) != ip.as_ref());
            let rtt = caps.name("rtt").map(|m| format_rtt(m.as_str()));

            match (&ip, rtt) {
                (Some(ip), Some(rtt)) => flat.push(TracerouteHop {
                    hop_number: hop_number.take(),
                    ip_address: Some(ip.clone()),
                    rtt: Some(rtt),
                    fqdn: fqdn.clone(),
                    info: None,
                }),
                (None, Some(rtt)) if last_ip.is_some() => flat.push(TracerouteHop {
                    hop_number: hop_number.take(),
                    ip_address: last_ip.clone(),
                    rtt: Some(rtt),
                    fqdn: last_fqdn.clone(),
                    info: None,
                }),
                _ => {}
            }

            if ip.is_some() {
                last_ip = ip;
                last_fqdn = fqdn;
            }
        }
    }

    let mut combined: Vec<TracerouteHop> = Vec::new();
    for entry in flat {
        match combined.last_mut() {
            Some(prev)
                if entry.ip_address.is_some()
                    && prev.ip_address == entry.ip_address
                    && prev.fqdn == entry.fqdn =>
            {
                let rtt = entry.rtt.unwrap_or_default();
                match prev.rtt.as_mut() {
                    Some(existing) => {
                        existing.push(' ');
                        existing.push_str(&rtt);
                    }
                    None => prev.rtt = Some(rtt),
                }
            }
            _ => combined.push(entry),
        }
    }

    let mut last_hop_number: Option<String> = None;
    for entry in combined.iter_mut() {
        if entry.hop_number.is_some() && entry.hop_number == last_hop_number {
            entry.hop_number = None;
        } else if entry.hop_number.is_some() {
            last_hop_number = entry.hop_number.clone();
        }
    }

    combined
}

fn hop_from_record(record: &FlatRecord) -> TracerouteHop {
    let ip_address = non_empty(record.get("ip_address").map(String::as_str));
    let fqdn = non_empty(record.get("fqdn").map(String::as_str)).filter(|f| Some(f) != ip_address.as_ref());
    TracerouteHop {
        hop_number: non_empty(record.get("hop_number").map(String::as_str)),
        ip_address,
        rtt: non_empty(record.get("rtt").map(String::as_str)),
        fqdn,
        info: None,
    }
}

pub(crate) fn build_hops(device_type: DeviceType, records: &[FlatRecord]) -> Vec<TracerouteHop> {
    if device_type == DeviceType::JuniperJunos {
        let hops: Vec<(String, String)> = records
            .iter()
            .map(|r| {
                (
                    r.get("hop_number").cloned().unwrap_or_default(),
                    r.get("probes").cloned().unwrap_or_default(),
                )
            })
            .collect();
        reshape_junos_hops(&hops)
    } else {
        records.iter().map(hop_from_record).collect()
    }
}

impl Enricher {
    /// Enrich one record set per location. PTR and origin lookups run once
    /// per distinct hop address across the whole batch.
    pub(super) async fn enrich_traceroute_batch(
        &self,
        batch: Vec<(DeviceType, Vec<FlatRecord>)>,
    ) -> Vec<Vec<TracerouteData>> {
        let mut batch: Vec<Vec<TracerouteData>> = batch
            .into_iter()
            .map(|(device_type, records)| {
                group_by(records, "destination")
                    .into_iter()
                    .map(|(destination, members)| TracerouteData {
                        ip_address: destination,
                        hops: build_hops(device_type, &members),
                    })
                    .collect()
            })
            .collect();

        let hops = || batch.iter().flatten().flat_map(|r| r.hops.iter());

        let resolve: BTreeSet<String> = hops()
            .filter(|hop| match self.resolve_mode {
                ResolveMode::Off => false,
                ResolveMode::Missing => hop.fqdn.is_none(),
                ResolveMode::All => true,
            })
            .filter_map(|hop| hop.ip_address.clone())
            .collect();
        let addresses: BTreeSet<String> = hops().filter_map(|hop| hop.ip_address.clone()).collect();

        let (names, origins) = tokio::join!(self.reverse_dns_many(&resolve), self.ip_to_asn_many(&addresses));

        let asns: BTreeSet<u32> = origins.values().filter_map(|info| info.asn).collect();
        let asn_infos = self.asn_infos(&asns).await;

        for hop in batch.iter_mut().flatten().flat_map(|r| r.hops.iter_mut()) {
            let Some(ip) = hop.ip_address.as_deref() else {
                continue;
            };
            if let Some(fqdn) = names.get(ip) {
                hop.fqdn = Some(fqdn.clone());
            }
            hop.info = origins.get(ip).cloned().map(|mut info| {
                info.asrank = info.asn.and_then(|asn| asn_infos.get(&asn).cloned());
                info
            });
        }

        batch
    }
}
