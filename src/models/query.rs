use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Application status the lookup API uses for success
pub const LOOKUP_STATUS_OK: i64 = 200;

/// Decoded lookup API response: an application status plus the record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub status: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl LookupResponse {
    pub fn is_ok(&self) -> bool {
        self.status == LOOKUP_STATUS_OK
    }

    /// Whether the payload carries any record section worth presenting
    pub fn has_record(&self) -> bool {
        ["DadosBasicos", "dados", "data"]
            .iter()
            .any(|key| self.payload.get(*key).is_some_and(|v| !v.is_null()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Well-formed answer with a non-OK status; never retried
    Rejected { status: i64 },
    /// Timeout, refusal, reset or undecodable response; retried
    TransportFailure { reason: String },
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Rejected { .. } => "rejected",
            AttemptOutcome::TransportFailure { .. } => "transport_failure",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ephemeral record of a single query attempt, reported to logs and discarded
#[derive(Debug, Clone)]
pub struct QueryAttempt {
    pub attempt_number: u32,
    pub timeout: Duration,
    /// `host:port` of the proxy used, `None` for a direct connection
    pub proxy_used: Option<String>,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}
