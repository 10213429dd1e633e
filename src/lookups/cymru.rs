use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;

use super::IpToAsnLookup;
use crate::models::IpAsnInfo;

/// Team Cymru IP to ASN over the origin DNS zones
#[derive(Clone)]
pub struct CymruLookup {
    resolver: TokioAsyncResolver,
}

impl CymruLookup {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

/// RouteViews IP to ASN over `asn.routeviews.org`. IPv4 only.
#[derive(Clone)]
pub struct RouteViewsLookup {
    resolver: TokioAsyncResolver,
}

impl RouteViewsLookup {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

fn reversed_v4(ip: std::net::Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
}

fn reversed_nibbles(ip: std::net::Ipv6Addr) -> String {
    let hex: String = ip.segments().iter().map(|s| format!("{:04x}", s)).collect();
    hex.chars()
        .rev()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn cymru_query_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}.origin.asn.cymru.com", reversed_v4(v4)),
        IpAddr::V6(v6) => format!("{}.origin6.asn.cymru.com", reversed_nibbles(v6)),
    }
}

fn routeviews_query_name(ip: IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(v4) => Some(format!("{}.asn.routeviews.org", reversed_v4(v4))),
        IpAddr::V6(_) => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// `"13335 | 1.1.1.0/24 | US | arin | 2010-07-14"`. Multi-origin replies keep the first ASN.
fn parse_cymru_txt(txt: &str) -> IpAsnInfo {
    let parts: Vec<&str> = txt.trim_matches('"').split('|').map(str::trim).collect();
    IpAsnInfo {
        asn: parts
            .first()
            .and_then(|p| p.split_whitespace().next())
            .and_then(|p| p.parse().ok()),
        bgp_prefix: non_empty(parts.get(1).copied()),
        registry: non_empty(parts.get(3).copied()),
        asrank: None,
    }
}

/// RouteViews answers with three strings: ASN, network, prefix length
fn parse_routeviews_txt(strings: &[String]) -> IpAsnInfo {
    let prefix = match (strings.get(1), strings.get(2)) {
        (Some(network), Some(len)) => Some(format!("{}/{}", network, len)),
        _ => None,
    };
    IpAsnInfo {
        asn: strings.first().and_then(|s| s.trim().parse().ok()),
        bgp_prefix: prefix,
        registry: None,
        asrank: None,
    }
}

/// First TXT record as its character strings. `None` on NXDOMAIN or no records.
async fn first_txt(resolver: &TokioAsyncResolver, name: &str) -> Result<Option<Vec<String>>> {
    let lookup = match resolver.txt_lookup(name).await {
        Ok(lookup) => lookup,
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => return Ok(None),
            _ => return Err(e.into()),
        },
    };

    Ok(lookup.iter().next().map(|txt| {
        txt.txt_data()
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }))
}

#[async_trait]
impl IpToAsnLookup for CymruLookup {
    async fn lookup(&self, ip: &str) -> Result<Option<IpAsnInfo>> {
        let addr: IpAddr = ip.parse()?;
        let name = cymru_query_name(addr);
        tracing::debug!("Cymru lookup {}", name);

        let strings = first_txt(&self.resolver, &name).await?;
        Ok(strings.map(|s| parse_cymru_txt(&s.concat())))
    }
}

#[async_trait]
impl IpToAsnLookup for RouteViewsLookup {
    async fn lookup(&self, ip: &str) -> Result<Option<IpAsnInfo>> {
        let addr: IpAddr = ip.parse()?;
        let Some(name) = routeviews_query_name(addr) else {
            return Ok(None);
        };
        tracing::debug!("RouteViews lookup {}", name);

        let strings = first_txt(&self.resolver, &name).await?;
        Ok(strings.map(|s| parse_routeviews_txt(&s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cymru_v4_name() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(cymru_query_name(ip), "4.3.2.1.origin.asn.cymru.com");
    }

    #[test]
    fn test_cymru_v6_name() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        let name = cymru_query_name(ip);
        assert!(name.starts_with("1.0.0.0.0.0.0.0"));
        assert!(name.ends_with("8.b.d.0.1.0.0.2.origin6.asn.cymru.com"));
        // 32 nibbles plus the zone labels
        assert_eq!(name.split('.').count(), 32 + 4);
    }

    #[test]
    fn test_routeviews_name() {
        let v4: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(routeviews_query_name(v4).unwrap(), "8.8.8.8.asn.routeviews.org");
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(routeviews_query_name(v6).is_none());
    }

    #[test]
    fn test_parse_cymru_reply() {
        let info = parse_cymru_txt("13335 | 1.1.1.0/24 | AU | apnic | 2011-08-11");
        assert_eq!(info.asn, Some(13335));
        assert_eq!(info.bgp_prefix.as_deref(), Some("1.1.1.0/24"));
        assert_eq!(info.registry.as_deref(), Some("apnic"));
        assert!(info.asrank.is_none());
    }

    #[test]
    fn test_parse_cymru_multi_origin_and_short_reply() {
        let info = parse_cymru_txt("\"64500 64501 | 192.0.2.0/24\"");
        assert_eq!(info.asn, Some(64500));
        assert_eq!(info.bgp_prefix.as_deref(), Some("192.0.2.0/24"));
        assert_eq!(info.registry, None);

        let empty = parse_cymru_txt("NA |  | | |");
        assert_eq!(empty.asn, None);
        assert_eq!(empty.bgp_prefix, None);
    }

    #[test]
    fn test_parse_routeviews_reply() {
        let strings: Vec<String> = vec!["15169".into(), "8.8.8.0".into(), "24".into()];
        let info = parse_routeviews_txt(&strings);
        assert_eq!(info.asn, Some(15169));
        assert_eq!(info.bgp_prefix.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(info.registry, None);
    }
}
