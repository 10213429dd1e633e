pub mod asrank;
pub mod communities;
pub mod cymru;
pub mod resolver;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

use crate::models::{AsnInfo, IpAsnInfo};

pub use asrank::AsRankClient;
pub use communities::CommunityStore;
pub use cymru::{CymruLookup, RouteViewsLookup};
pub use resolver::DnsReverseLookup;

/// Community string to description, batched
#[async_trait]
pub trait CommunityLookup: Send + Sync {
    async fn lookup_many(&self, communities: &BTreeSet<String>) -> Result<HashMap<String, String>>;
}

/// AS metadata for one ASN. `Ok(None)` when the ASN is unknown.
#[async_trait]
pub trait AsnInfoLookup: Send + Sync {
    async fn lookup(&self, asn: u32) -> Result<Option<AsnInfo>>;
}

/// Origin ASN, covering prefix and registry for one address
#[async_trait]
pub trait IpToAsnLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<Option<IpAsnInfo>>;
}

/// PTR name for one address, without the trailing dot
#[async_trait]
pub trait ReverseDnsLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<Option<String>>;
}
