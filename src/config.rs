use crate::error::{RelayError, Result};
use crate::lookup::{LookupApiConfig, QueryPolicy};
use crate::proxy::{PoolManagerConfig, ProviderConfig};
use crate::transport::TelegramConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram Bot API configuration
    pub telegram: TelegramSettings,
    /// Lookup API configuration
    pub lookup: LookupSettings,
    /// Outbound proxy configuration
    pub proxy: ProxySettings,
    /// Message delivery configuration
    pub output: OutputConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    /// Bot token (required)
    pub token: String,
    /// Bot API base URL
    pub api_url: String,
    /// Long-poll duration in seconds
    pub poll_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct LookupSettings {
    /// Lookup API token (required)
    pub token: String,
    /// Lookup API endpoint
    pub base_url: String,
    /// Lookup module name
    pub module: String,
    /// Attempts per query
    pub max_attempts: u32,
    /// First attempt timeout in seconds
    pub first_timeout: u64,
    /// Retry timeout in seconds
    pub retry_timeout: u64,
    /// Backoff step in milliseconds
    pub backoff_step_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Route traffic through provider proxies
    pub enabled: bool,
    /// Provider API key
    pub api_key: String,
    /// Provider listing endpoint
    pub listing_url: String,
    /// Region code proxies must belong to
    pub region: String,
    /// Listing page size
    pub page_size: u32,
    /// Number of candidates probed per refresh
    pub validate_sample: usize,
    /// Probe timeout in seconds
    pub probe_timeout: u64,
    /// Target the probe tunnels to
    pub probe_url: String,
    /// Pool refresh interval in seconds
    pub refresh_interval: u64,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Maximum chars per delivered segment
    pub max_message_len: usize,
    /// Pause between segments in milliseconds
    pub message_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl LogConfig {
    /// Logging settings alone, readable before the rest of the configuration
    pub fn from_env() -> Self {
        Self {
            level: get_env_or("LOG_LEVEL", "info"),
            format: get_env_or("LOG_FORMAT", "pretty"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_api_url = get_env_or("TELEGRAM_API_URL", "https://api.telegram.org");
        let api_base_url = get_env_or("API_BASE_URL", "https://completa.workbuscas.com/api");
        let listing_url = get_env_or(
            "WEBSHARE_API_URL",
            "https://proxy.webshare.io/api/v2/proxy/list",
        );
        let probe_url = get_env_or("PROXY_PROBE_URL", "https://www.google.com");
        for url in [&telegram_api_url, &api_base_url, &listing_url, &probe_url] {
            Url::parse(url)?;
        }

        let max_message_len: usize = parse_env("MESSAGE_MAX_LEN", "3900")?;
        if max_message_len == 0 {
            return Err(RelayError::InvalidConfig(
                "MESSAGE_MAX_LEN must be greater than zero".into(),
            ));
        }

        let refresh_interval: u64 = parse_env("PROXY_REFRESH_INTERVAL", "1800")?;
        if refresh_interval == 0 {
            return Err(RelayError::InvalidConfig(
                "PROXY_REFRESH_INTERVAL must be greater than zero".into(),
            ));
        }

        Ok(Config {
            telegram: TelegramSettings {
                token: require_env("TELEGRAM_TOKEN")?,
                api_url: telegram_api_url,
                poll_timeout: parse_env("TELEGRAM_POLL_TIMEOUT", "30")?,
            },
            lookup: LookupSettings {
                token: require_env("API_TOKEN")?,
                base_url: api_base_url,
                module: get_env_or("API_MODULE", "cpf"),
                max_attempts: parse_env("QUERY_MAX_ATTEMPTS", "5")?,
                first_timeout: parse_env("QUERY_FIRST_TIMEOUT", "90")?,
                retry_timeout: parse_env("QUERY_RETRY_TIMEOUT", "60")?,
                backoff_step_ms: parse_env("QUERY_BACKOFF_STEP_MS", "2000")?,
            },
            proxy: ProxySettings {
                enabled: parse_flag(&get_env_or("USE_PROXY", "false")),
                api_key: get_env_or("WEBSHARE_API_KEY", ""),
                listing_url,
                region: get_env_or("PROXY_REGION", "BR").trim().to_uppercase(),
                page_size: parse_env("PROXY_PAGE_SIZE", "100")?,
                validate_sample: parse_env("PROXY_VALIDATE_SAMPLE", "10")?,
                probe_timeout: parse_env("PROXY_PROBE_TIMEOUT", "8")?,
                probe_url,
                refresh_interval,
            },
            output: OutputConfig {
                max_message_len,
                message_delay_ms: parse_env("MESSAGE_DELAY_MS", "200")?,
            },
            log: LogConfig::from_env(),
        })
    }

    /// Whether outbound proxies are actually used. A missing provider key
    /// turns proxy usage off.
    pub fn use_proxy(&self) -> bool {
        self.proxy.enabled && !self.proxy.api_key.trim().is_empty()
    }

    pub fn telegram_config(&self) -> TelegramConfig {
        TelegramConfig {
            api_url: self.telegram.api_url.clone(),
            token: self.telegram.token.clone(),
            poll_timeout: Duration::from_secs(self.telegram.poll_timeout),
        }
    }

    pub fn lookup_api_config(&self) -> LookupApiConfig {
        LookupApiConfig {
            base_url: self.lookup.base_url.clone(),
            token: self.lookup.token.clone(),
            module: self.lookup.module.clone(),
        }
    }

    pub fn query_policy(&self) -> QueryPolicy {
        QueryPolicy {
            max_attempts: self.lookup.max_attempts,
            first_timeout: Duration::from_secs(self.lookup.first_timeout),
            retry_timeout: Duration::from_secs(self.lookup.retry_timeout),
            backoff_step: Duration::from_millis(self.lookup.backoff_step_ms),
        }
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            listing_url: self.proxy.listing_url.clone(),
            api_key: self.proxy.api_key.clone(),
            page_size: self.proxy.page_size,
            ..ProviderConfig::default()
        }
    }

    pub fn pool_manager_config(&self) -> PoolManagerConfig {
        PoolManagerConfig {
            region: self.proxy.region.clone(),
            validate_sample: self.proxy.validate_sample,
            probe_timeout: Duration::from_secs(self.proxy.probe_timeout),
            ..PoolManagerConfig::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.proxy.refresh_interval)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.output.message_delay_ms)
    }
}

/// `true`, `1` and `yes` enable a flag, case-insensitively
fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RelayError::MissingEnvVar(key.to_string())),
    }
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RelayError::InvalidConfig(format!("{} must be a valid number", key)))
}
