use serde::{Deserialize, Serialize};

/// Outbound proxy as handed out by the provider.
///
/// Immutable once fetched; the endpoint URL is derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub region_code: Option<String>,
}

impl ProxyRecord {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        region_code: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            region_code,
        }
    }

    /// `host:port`, used for socket connects
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL with credentials embedded
    pub fn endpoint_url(&self) -> String {
        if self.username.is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            format!(
                "http://{}:{}@{}:{}",
                self.username, self.password, self.host, self.port
            )
        }
    }

    /// Proxy URL safe for logs
    pub fn masked_url(&self) -> String {
        if self.username.is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            format!("http://{}:****@{}:{}", self.username, self.host, self.port)
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Case-insensitive region match, accepting the country's English name as an alias
    pub fn matches_region(&self, region: &str) -> bool {
        match &self.region_code {
            Some(code) => region_matches(code, region),
            None => false,
        }
    }
}

impl std::fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Compare a provider-reported country against a two-letter region code
pub fn region_matches(reported: &str, region: &str) -> bool {
    let reported = reported.trim().to_uppercase();
    let region = region.trim().to_uppercase();
    if reported == region {
        return true;
    }
    region_name(&region).is_some_and(|name| reported == name)
}

fn region_name(code: &str) -> Option<&'static str> {
    match code {
        "BR" => Some("BRAZIL"),
        "US" => Some("UNITED STATES"),
        "PT" => Some("PORTUGAL"),
        "AR" => Some("ARGENTINA"),
        "MX" => Some("MEXICO"),
        "DE" => Some("GERMANY"),
        "GB" => Some("UNITED KINGDOM"),
        _ => None,
    }
}

/// One entry of the provider's listing response
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderProxy {
    pub proxy_address: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl From<ProviderProxy> for ProxyRecord {
    fn from(p: ProviderProxy) -> Self {
        let region_code = p
            .country_code
            .filter(|c| !c.trim().is_empty())
            .or(p.country);
        ProxyRecord {
            host: p.proxy_address,
            port: p.port,
            username: p.username,
            password: p.password,
            region_code,
        }
    }
}

/// Provider listing page
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderListing {
    #[serde(default)]
    pub count: Option<u64>,
    pub results: Vec<ProviderProxy>,
}
