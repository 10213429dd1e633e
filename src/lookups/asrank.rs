use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::AsnInfoLookup;
use crate::models::AsnInfo;

/// CAIDA AS Rank GraphQL client
pub struct AsRankClient {
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<AsnData>,
}

#[derive(Debug, Deserialize)]
struct AsnData {
    asn: Option<AsnInfo>,
}

impl AsRankClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: &str, client: Client) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }
}

fn graphql_query(asn: u32) -> String {
    format!(
        r#"{{
        asn(asn:"{}") {{
            asnName
            rank
            organization {{
                orgName
            }}
            country {{
                iso
                name
            }}
        }}
    }}"#,
        asn
    )
}

/// Pull the ASN record out of a GraphQL body. A null `data.asn` means unknown.
fn parse_response(body: &str) -> Result<Option<AsnInfo>> {
    let resp: GraphQlResponse = serde_json::from_str(body)?;
    Ok(resp.data.and_then(|d| d.asn))
}

#[async_trait]
impl AsnInfoLookup for AsRankClient {
    async fn lookup(&self, asn: u32) -> Result<Option<AsnInfo>> {
        tracing::debug!("AS Rank lookup AS{}", asn);

        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "query": graphql_query(asn) }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("AS Rank API error {}: {}", status, body));
        }

        parse_response(&resp.text().await?)
    }
}
