//! Proxy provider client
//!
//! Lists candidate proxies from the provider's HTTP API. The provider is
//! always reached directly, since it is the source of the proxies themselves.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{RelayError, Result};
use crate::models::{ProviderListing, ProxyRecord};

/// Source of candidate proxies for a region.
///
/// Never fails: any transport or decoding problem yields an empty list and a
/// log line. Fetching has no effect on the live pool.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self, region: &str) -> Vec<ProxyRecord>;
}

/// Provider client configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub listing_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://proxy.webshare.io/api/v2/proxy/list".to_string(),
            api_key: String::new(),
            page_size: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the provider's listing endpoint
pub struct ProviderClient {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client, config })
    }

    /// Request one listing page, optionally asking the provider to filter by region
    async fn fetch_listing(&self, region: Option<&str>) -> Result<ProviderListing> {
        let page_size = self.config.page_size.to_string();
        let mut params = vec![("mode", "direct"), ("page", "1"), ("page_size", page_size.as_str())];
        if let Some(region) = region {
            params.push(("country_code", region));
        }

        let response = self
            .client
            .get(&self.config.listing_url)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::ProxyFetch(format!(
                "provider returned {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        let listing = response
            .json::<ProviderListing>()
            .await
            .map_err(|e| RelayError::ProxyFetch(format!("malformed listing: {}", e)))?;
        Ok(listing)
    }

    async fn try_fetch(&self, region: &str) -> Result<Vec<ProxyRecord>> {
        let listing = match self.fetch_listing(Some(region)).await {
            Ok(listing) => listing,
            Err(e) => {
                info!("Regional filter rejected ({}), fetching unfiltered list", e);
                self.fetch_listing(None).await?
            }
        };

        let total = listing.results.len();
        let all: Vec<ProxyRecord> = listing.results.into_iter().map(ProxyRecord::from).collect();
        let (matching, others): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|p| p.matches_region(region));

        info!(
            total,
            matching = matching.len(),
            region,
            "Fetched proxy listing"
        );

        if matching.is_empty() && !others.is_empty() {
            let mut regions: Vec<String> = others
                .iter()
                .map(|p| p.region_code.clone().unwrap_or_else(|| "N/A".into()).to_uppercase())
                .collect();
            regions.sort();
            regions.dedup();
            warn!(region, available = %regions.join(", "), "No proxies match region");
        }

        Ok(matching)
    }
}

#[async_trait]
impl ProxySource for ProviderClient {
    #[instrument(skip(self))]
    async fn fetch(&self, region: &str) -> Vec<ProxyRecord> {
        if self.config.api_key.is_empty() {
            error!("Proxy provider API key is not set");
            return Vec::new();
        }

        debug!("Fetching proxies from {}", self.config.listing_url);
        match self.try_fetch(region).await {
            Ok(proxies) => proxies,
            Err(e) => {
                let e = match e {
                    RelayError::ProxyFetch(_) => e,
                    other => RelayError::ProxyFetch(other.to_string()),
                };
                error!(error = %e, "Failed to fetch proxies");
                Vec::new()
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing() -> serde_json::Value {
        json!({
            "count": 4,
            "results": [
                { "proxy_address": "1.1.1.1", "port": 8001, "username": "u", "password": "p", "country_code": "BR" },
                { "proxy_address": "2.2.2.2", "port": 8002, "username": "u", "password": "p", "country_code": "US" },
                { "proxy_address": "3.3.3.3", "port": 8003, "username": "u", "password": "p", "country": "Brazil" },
                { "proxy_address": "4.4.4.4", "port": 8004, "username": "u", "password": "p", "country_code": "br" }
            ]
        })
    }

    fn client_for(server: &MockServer, api_key: &str) -> ProviderClient {
        ProviderClient::new(ProviderConfig {
            listing_url: format!("{}/api/v2/proxy/list", server.uri()),
            api_key: api_key.to_string(),
            page_size: 100,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_filters_by_region() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/proxy/list"))
            .and(header("Authorization", "Token secret"))
            .and(query_param("mode", "direct"))
            .and(query_param("page_size", "100"))
            .and(query_param("country_code", "BR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .expect(1)
            .mount(&server)
            .await;

        let proxies = client_for(&server, "secret").fetch("BR").await;
        let hosts: Vec<_> = proxies.iter().map(|p| p.host.as_str()).collect();
        assert_eq!(hosts, vec!["1.1.1.1", "3.3.3.3", "4.4.4.4"]);
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_unfiltered_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("country_code", "BR"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid filter"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("country_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .expect(1)
            .mount(&server)
            .await;

        let proxies = client_for(&server, "secret").fetch("BR").await;
        assert_eq!(proxies.len(), 3);
        assert!(proxies.iter().all(|p| p.matches_region("BR")));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detail": "nope" })))
            .mount(&server)
            .await;

        assert!(client_for(&server, "secret").fetch("BR").await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_key_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client_for(&server, "").fetch("BR").await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_provider_yields_empty() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ProviderClient::new(ProviderConfig {
            listing_url: format!("http://{}/list", addr),
            api_key: "secret".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(client.fetch("BR").await.is_empty());
    }
}
