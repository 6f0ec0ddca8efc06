use thiserror::Error;

/// Unified error type for the lookup relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Proxy pool errors
    #[error("Proxy fetch failed: {0}")]
    ProxyFetch(String),

    #[error("Proxy validation failed for {proxy}: {reason}")]
    ProxyValidation { proxy: String, reason: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Lookup errors
    #[error("Query transport failed: {0}")]
    QueryTransport(String),

    #[error("Query rejected with application status {status}")]
    QueryApplication { status: i64 },

    // Output errors
    #[error("Segment of {len} chars exceeds limit of {limit}")]
    ChunkSizeViolation { len: usize, limit: usize },

    // Inbound transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport fatal error: {0}")]
    TransportFatal(String),

    #[error("Transport rebuild failed: {0}")]
    SupervisorRebuild(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Whether this error is a transport-level fault that warrants rebuilding
    /// the inbound connection (timeout, refused connection, fatal transport).
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Timeout
            | RelayError::ConnectionRefused(_)
            | RelayError::TransportFatal(_) => true,
            RelayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Short machine-friendly label, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::ProxyFetch(_) => "proxy_fetch",
            RelayError::ProxyValidation { .. } => "proxy_validation",
            RelayError::InvalidProxyAddress(_) => "invalid_proxy",
            RelayError::QueryTransport(_) => "query_transport",
            RelayError::QueryApplication { .. } => "query_application",
            RelayError::ChunkSizeViolation { .. } => "chunk_size",
            RelayError::Transport(_) => "transport",
            RelayError::TransportFatal(_) => "transport_fatal",
            RelayError::SupervisorRebuild(_) => "supervisor_rebuild",
            RelayError::InvalidConfig(_) | RelayError::MissingEnvVar(_) => "config",
            RelayError::Timeout => "timeout",
            RelayError::ConnectionRefused(_) => "connection_refused",
            RelayError::Io(_) => "io",
            RelayError::Http(_) => "http",
            RelayError::Json(_) => "json",
        }
    }
}

// Classify reqwest failures so the supervisor can tell faults apart.
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RelayError::Timeout;
        }
        if err.is_connect() {
            let msg = error_chain(&err);
            if msg.to_lowercase().contains("refused") {
                return RelayError::ConnectionRefused(msg);
            }
            return RelayError::TransportFatal(msg);
        }
        if err.is_decode() {
            return RelayError::Http(format!("invalid response body: {}", err));
        }
        // Reset or dropped mid-request, including a proxy closing the tunnel
        if err.is_request() || err.is_body() {
            return RelayError::TransportFatal(error_chain(&err));
        }
        RelayError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidConfig(err.to_string())
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}
