use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;

use super::ReverseDnsLookup;

/// Build the shared resolver from the system configuration, or public defaults
pub fn system_resolver() -> TokioAsyncResolver {
    match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            tracing::warn!("Could not read system resolver config, using defaults: {}", e);
            TokioAsyncResolver::tokio(Default::default(), Default::default())
        }
    }
}

/// PTR lookups through the shared resolver
#[derive(Clone)]
pub struct DnsReverseLookup {
    resolver: TokioAsyncResolver,
}

impl DnsReverseLookup {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

fn ptr_to_fqdn(name: &str) -> Option<String> {
    let fqdn = name.trim_end_matches('.');
    if fqdn.is_empty() {
        None
    } else {
        Some(fqdn.to_string())
    }
}

#[async_trait]
impl ReverseDnsLookup for DnsReverseLookup {
    async fn lookup(&self, ip: &str) -> Result<Option<String>> {
        let addr: IpAddr = ip.parse()?;
        tracing::debug!("Reverse DNS lookup {}", addr);

        match self.resolver.reverse_lookup(addr).await {
            Ok(lookup) => Ok(lookup.iter().next().and_then(|ptr| ptr_to_fqdn(&ptr.to_string()))),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
                _ => Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_to_fqdn() {
        assert_eq!(ptr_to_fqdn("dns.google.").as_deref(), Some("dns.google"));
        assert_eq!(ptr_to_fqdn("one.one.one.one").as_deref(), Some("one.one.one.one"));
        assert_eq!(ptr_to_fqdn("."), None);
    }
}
