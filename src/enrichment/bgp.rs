use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{group_by, Enricher};
use crate::models::{AsnInfo, BgpCommunity, BgpData, BgpPath};
use crate::parsing::FlatRecord;

/// Numeric AS path tokens in order. Set markers, confederations and words are dropped.
pub(crate) fn parse_as_path(as_path: &str) -> Vec<u32> {
    as_path
        .split_whitespace()
        .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|token| token.parse().ok())
        .collect()
}

fn parse_best_path(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "false" | "no" | "0")
}

fn split_communities(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn path_from_record(record: &FlatRecord) -> (BgpPath, Vec<String>) {
    let communities = record
        .get("communities")
        .map(|c| split_communities(c))
        .unwrap_or_default();

    let path = BgpPath {
        communities: None,
        metric: record.get("metric").cloned(),
        local_pref: record.get("local_pref").cloned(),
        best_path: record.get("best_path").map(|v| parse_best_path(v)),
        next_hop: record.get("next_hop").cloned(),
        as_path: record.get("as_path").map(|p| parse_as_path(p)).unwrap_or_default(),
    };
    (path, communities)
}

/// Paths grouped by prefix, each with its raw community strings
type PrefixPaths = Vec<(String, Vec<(BgpPath, Vec<String>)>)>;

fn collect_prefixes(records: Vec<FlatRecord>) -> PrefixPaths {
    group_by(records, "prefix")
        .into_iter()
        .map(|(prefix, members)| (prefix, members.iter().map(path_from_record).collect()))
        .collect()
}

fn build_prefixes(
    prefixes: PrefixPaths,
    community_map: &HashMap<String, String>,
    asn_infos: &HashMap<u32, AsnInfo>,
) -> Vec<BgpData> {
    prefixes
        .into_iter()
        .map(|(prefix, paths)| {
            let mut as_paths: Vec<Vec<u32>> = Vec::new();
            let paths: Vec<BgpPath> = paths
                .into_iter()
                .map(|(mut path, communities)| {
                    if !path.as_path.is_empty() && !as_paths.contains(&path.as_path) {
                        as_paths.push(path.as_path.clone());
                    }
                    if !communities.is_empty() {
                        path.communities = Some(
                            communities
                                .into_iter()
                                .map(|community| BgpCommunity {
                                    description: community_map.get(&community).cloned(),
                                    community,
                                })
                                .collect(),
                        );
                    }
                    path
                })
                .collect();

            let asn_info: BTreeMap<_, _> = as_paths
                .iter()
                .flatten()
                .filter_map(|asn| asn_infos.get(asn).map(|info| (*asn, info.clone())))
                .collect();

            BgpData {
                prefix,
                paths,
                as_paths,
                asn_info,
            }
        })
        .collect()
}

impl Enricher {
    /// Enrich one record set per location. Communities and ASNs are
    /// deduplicated over the whole batch: one community query, one AS
    /// metadata lookup per distinct ASN.
    pub(super) async fn enrich_bgp_batch(&self, batch: Vec<Vec<FlatRecord>>) -> Vec<Vec<BgpData>> {
        let batch: Vec<PrefixPaths> = batch.into_iter().map(collect_prefixes).collect();

        let mut all_communities = BTreeSet::new();
        let mut all_asns = BTreeSet::new();
        for (path, communities) in batch.iter().flatten().flat_map(|(_, paths)| paths) {
            all_asns.extend(path.as_path.iter().copied());
            all_communities.extend(communities.iter().cloned());
        }

        let community_lookup = async {
            if all_communities.is_empty() {
                return HashMap::new();
            }
            self.lookups
                .communities
                .lookup_many(&all_communities)
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!("Community lookup failed: {}", e);
                    HashMap::new()
                })
        };
        let (community_map, asn_infos) = tokio::join!(community_lookup, self.asn_infos(&all_asns));

        batch
            .into_iter()
            .map(|prefixes| build_prefixes(prefixes, &community_map, &asn_infos))
            .collect()
    }
}
