mod bgp;
mod ping;
mod traceroute;

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::cache::{CacheGate, CacheNamespace, CacheStore};
use crate::config::{CacheConfig, ResolveMode};
use crate::lookups::{AsnInfoLookup, CommunityLookup, IpToAsnLookup, ReverseDnsLookup};
use crate::models::{AsnInfo, CommandKind, DeviceType, IpAsnInfo, ParsedOutput};
use crate::parsing::FlatRecord;

/// External data sources used during enrichment
#[derive(Clone)]
pub struct Lookups {
    pub communities: Arc<dyn CommunityLookup>,
    pub asn_info: Arc<dyn AsnInfoLookup>,
    pub ip_to_asn: Arc<dyn IpToAsnLookup>,
    pub reverse_dns: Arc<dyn ReverseDnsLookup>,
}

/// One cache gate per lookup kind
#[derive(Clone)]
pub struct LookupCaches {
    pub asn: CacheGate,
    pub ptr: CacheGate,
    pub ip2asn: CacheGate,
}

impl LookupCaches {
    pub fn from_config(store: Arc<dyn CacheStore>, cfg: &CacheConfig) -> Self {
        Self {
            asn: CacheGate::from_config(store.clone(), cfg, CacheNamespace::Asn),
            ptr: CacheGate::from_config(store.clone(), cfg, CacheNamespace::Ptr),
            ip2asn: CacheGate::from_config(store, cfg, CacheNamespace::Ip2Asn),
        }
    }
}

/// Enricher turns flat template records into structured results.
///
/// Keys are deduplicated across the whole batch before any lookup is issued,
/// and each distinct key is looked up once, concurrently. Lookup failures are
/// absorbed: the affected value is simply left empty.
pub struct Enricher {
    lookups: Lookups,
    caches: LookupCaches,
    resolve_mode: ResolveMode,
}

impl Enricher {
    pub fn new(lookups: Lookups, caches: LookupCaches, resolve_mode: ResolveMode) -> Self {
        Self {
            lookups,
            caches,
            resolve_mode,
        }
    }

    pub async fn enrich(
        &self,
        command: CommandKind,
        device_type: DeviceType,
        records: Vec<FlatRecord>,
    ) -> ParsedOutput {
        self.enrich_batch(command, vec![(device_type, records)])
            .await
            .pop()
            .unwrap_or_else(|| ParsedOutput::empty(command))
    }

    /// Enrich several record sets (one per location) as a single batch.
    ///
    /// Community, ASN, PTR and origin keys are collected over every set first,
    /// so a key shared by two locations is looked up once. Output order
    /// follows input order.
    pub async fn enrich_batch(
        &self,
        command: CommandKind,
        batch: Vec<(DeviceType, Vec<FlatRecord>)>,
    ) -> Vec<ParsedOutput> {
        match command {
            CommandKind::Ping => batch
                .into_iter()
                .map(|(_, records)| ParsedOutput::Ping(ping::build_ping(records)))
                .collect(),
            CommandKind::Bgp => self
                .enrich_bgp_batch(batch.into_iter().map(|(_, records)| records).collect())
                .await
                .into_iter()
                .map(ParsedOutput::Bgp)
                .collect(),
            CommandKind::Traceroute => self
                .enrich_traceroute_batch(batch)
                .await
                .into_iter()
                .map(ParsedOutput::Traceroute)
                .collect(),
        }
    }

    async fn asn_info(&self, asn: u32) -> Option<AsnInfo> {
        let lookup = &self.lookups.asn_info;
        self.caches
            .asn
            .try_guard(&asn.to_string(), move || async move { lookup.lookup(asn).await })
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("AS Rank lookup for AS{} failed: {}", asn, e);
                None
            })
    }

    async fn reverse_dns(&self, ip: &str) -> Option<String> {
        let lookup = &self.lookups.reverse_dns;
        self.caches
            .ptr
            .try_guard(ip, move || async move { lookup.lookup(ip).await })
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("Reverse DNS lookup for {} failed: {}", ip, e);
                None
            })
    }

    async fn ip_to_asn(&self, ip: &str) -> Option<IpAsnInfo> {
        let lookup = &self.lookups.ip_to_asn;
        self.caches
            .ip2asn
            .try_guard(ip, move || async move { lookup.lookup(ip).await })
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("IP to ASN lookup for {} failed: {}", ip, e);
                None
            })
    }

    /// One concurrent AS metadata lookup per distinct ASN
    async fn asn_infos(&self, asns: &BTreeSet<u32>) -> HashMap<u32, AsnInfo> {
        let results = join_all(asns.iter().map(|&asn| async move { (asn, self.asn_info(asn).await) })).await;
        results
            .into_iter()
            .filter_map(|(asn, info)| info.map(|info| (asn, info)))
            .collect()
    }

    async fn reverse_dns_many(&self, ips: &BTreeSet<String>) -> HashMap<String, String> {
        let results = join_all(ips.iter().map(|ip| async move { (ip.clone(), self.reverse_dns(ip).await) })).await;
        results
            .into_iter()
            .filter_map(|(ip, fqdn)| fqdn.map(|fqdn| (ip, fqdn)))
            .collect()
    }

    async fn ip_to_asn_many(&self, ips: &BTreeSet<String>) -> HashMap<String, IpAsnInfo> {
        let results = join_all(ips.iter().map(|ip| async move { (ip.clone(), self.ip_to_asn(ip).await) })).await;
        results
            .into_iter()
            .filter_map(|(ip, info)| info.map(|info| (ip, info)))
            .collect()
    }
}

/// Group records by the value of `key`, groups in first-seen order
fn group_by(records: Vec<FlatRecord>, key: &str) -> Vec<(String, Vec<FlatRecord>)> {
    let mut groups: Vec<(String, Vec<FlatRecord>)> = Vec::new();
    for record in records {
        let value = record.get(key).cloned().unwrap_or_default();
        match groups.iter_mut().find(|(k, _)| *k == value) {
            Some((_, members)) => members.push(record),
            None => groups.push((value, vec![record])),
        }
    }
    groups
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::AsnOrganization;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Lookup double: answers from fixed tables and counts every call
    #[derive(Default)]
    pub(crate) struct FakeLookups {
        pub communities: HashMap<String, String>,
        pub asns: HashMap<u32, AsnInfo>,
        pub origins: HashMap<String, IpAsnInfo>,
        pub ptrs: HashMap<String, String>,
        pub failing: bool,
        pub community_calls: AtomicUsize,
        pub asn_calls: AtomicUsize,
        pub origin_calls: AtomicUsize,
        pub ptr_calls: AtomicUsize,
    }

    impl FakeLookups {
        fn check(&self) -> Result<()> {
            if self.failing {
                anyhow::bail!("lookup backend unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommunityLookup for FakeLookups {
        async fn lookup_many(&self, communities: &BTreeSet<String>) -> Result<HashMap<String, String>> {
            self.community_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(communities
                .iter()
                .filter_map(|c| self.communities.get(c).map(|d| (c.clone(), d.clone())))
                .collect())
        }
    }

    #[async_trait]
    impl AsnInfoLookup for FakeLookups {
        async fn lookup(&self, asn: u32) -> Result<Option<AsnInfo>> {
            self.asn_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.asns.get(&asn).cloned())
        }
    }

    #[async_trait]
    impl IpToAsnLookup for FakeLookups {
        async fn lookup(&self, ip: &str) -> Result<Option<IpAsnInfo>> {
            self.origin_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.origins.get(ip).cloned())
        }
    }

    #[async_trait]
    impl ReverseDnsLookup for FakeLookups {
        async fn lookup(&self, ip: &str) -> Result<Option<String>> {
            self.ptr_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.ptrs.get(ip).cloned())
        }
    }

    pub(crate) fn asn(name: &str, rank: i64) -> AsnInfo {
        AsnInfo {
            asn_name: name.to_string(),
            rank,
            organization: Some(AsnOrganization {
                org_name: format!("{} Inc.", name),
            }),
            country: None,
        }
    }

    pub(crate) fn fake_lookups() -> FakeLookups {
        let mut fake = FakeLookups::default();
        fake.communities.insert("13335:10000".into(), "Learned in Europe".into());
        fake.asns.insert(13335, asn("CLOUDFLARENET", 29));
        fake.asns.insert(64500, asn("EXAMPLE-TRANSIT", 5000));
        fake.asns.insert(174, asn("COGENT-174", 2));
        fake.origins.insert(
            "10.0.0.1".into(),
            IpAsnInfo {
                asn: Some(64500),
                bgp_prefix: Some("10.0.0.0/8".into()),
                registry: Some("arin".into()),
                asrank: None,
            },
        );
        fake.origins.insert(
            "1.1.1.1".into(),
            IpAsnInfo {
                asn: Some(13335),
                bgp_prefix: Some("1.1.1.0/24".into()),
                registry: Some("apnic".into()),
                asrank: None,
            },
        );
        fake.ptrs.insert("10.0.0.1".into(), "core1.example.net".into());
        fake.ptrs.insert("1.1.1.1".into(), "one.one.one.one".into());
        fake
    }

    pub(crate) fn enricher_with(
        fake: &Arc<FakeLookups>,
        cache_enabled: bool,
        resolve_mode: ResolveMode,
    ) -> Enricher {
        let store = Arc::new(MemoryCache::new());
        let gate = |ns| CacheGate::new(store.clone(), "test", ns, cache_enabled, Duration::from_secs(60));
        Enricher::new(
            Lookups {
                communities: fake.clone(),
                asn_info: fake.clone(),
                ip_to_asn: fake.clone(),
                reverse_dns: fake.clone(),
            },
            LookupCaches {
                asn: gate(CacheNamespace::Asn),
                ptr: gate(CacheNamespace::Ptr),
                ip2asn: gate(CacheNamespace::Ip2Asn),
            },
            resolve_mode,
        )
    }

    pub(crate) fn record(fields: &[(&str, &str)]) -> FlatRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_group_by_first_seen_order() {
        let records = vec![
            record(&[("prefix", "b"), ("n", "1")]),
            record(&[("prefix", "a"), ("n", "2")]),
            record(&[("prefix", "b"), ("n", "3")]),
        ];
        let groups = group_by(records, "prefix");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }

    #[tokio::test]
    async fn test_cached_asn_lookup_issued_once() {
        let fake = Arc::new(fake_lookups());
        let enricher = enricher_with(&fake, true, ResolveMode::Missing);

        let asns: BTreeSet<u32> = [13335, 64500].into_iter().collect();
        enricher.asn_infos(&asns).await;
        let infos = enricher.asn_infos(&asns).await;

        assert_eq!(infos.len(), 2);
        assert_eq!(fake.asn_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_lookups_are_absorbed_and_not_cached() {
        let fake = Arc::new(FakeLookups {
            failing: true,
            ..Default::default()
        });
        let enricher = enricher_with(&fake, true, ResolveMode::Missing);

        assert_eq!(enricher.asn_info(13335).await, None);
        assert_eq!(enricher.asn_info(13335).await, None);
        assert_eq!(fake.asn_calls.load(Ordering::SeqCst), 2);
        assert_eq!(enricher.reverse_dns("1.1.1.1").await, None);
        assert_eq!(enricher.ip_to_asn("1.1.1.1").await, None);
    }
}
