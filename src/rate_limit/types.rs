use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Rule applied when a configured rate string cannot be parsed
pub const DEFAULT_RULE: RateRule = RateRule {
    limit: 1000,
    period: Duration::from_secs(3600),
};

/// Errors produced while parsing a `<count>-<unit>` rate string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateRuleError {
    #[error("rate '{0}' is not of the form <count>-<unit>")]
    Malformed(String),

    #[error("rate count '{0}' is not a positive integer")]
    InvalidCount(String),

    #[error("rate unit '{0}' is not one of S, M, H, D")]
    UnknownUnit(String),
}

/// A fixed-window quota: at most `limit` requests per `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub limit: u64,
    pub period: Duration,
}

impl RateRule {
    /// Parse a rate string, substituting [`DEFAULT_RULE`] when it is invalid
    pub fn parse_or_default(spec: &str) -> Self {
        spec.parse().unwrap_or_else(|e| {
            tracing::warn!(rate = %spec, error = %e, "Invalid rate, using default of 1000 per hour");
            DEFAULT_RULE
        })
    }
}

impl FromStr for RateRule {
    type Err = RateRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('-')
            .ok_or_else(|| RateRuleError::Malformed(s.to_string()))?;

        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RateRuleError::InvalidCount(count.to_string()));
        }
        let limit: u64 = count
            .parse()
            .map_err(|_| RateRuleError::InvalidCount(count.to_string()))?;
        if limit == 0 {
            return Err(RateRuleError::InvalidCount(count.to_string()));
        }

        let period = match unit {
            "S" => Duration::from_secs(1),
            "M" => Duration::from_secs(60),
            "H" => Duration::from_secs(60 * 60),
            "D" => Duration::from_secs(24 * 60 * 60),
            other => return Err(RateRuleError::UnknownUnit(other.to_string())),
        };

        Ok(Self { limit, period })
    }
}

impl fmt::Display for RateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}s", self.limit, self.period.as_secs())
    }
}

/// Named rate limiting scope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Global,
    Auth,
    Api,
    Upload,
}

impl Tier {
    /// Select the tier for a request from its method and path.
    ///
    /// `/auth/*` is `Auth`, a `POST` under `upload_path` is `Upload`, any
    /// other `/api/*` path is `Api`, and everything else is `Global`.
    pub fn resolve(method: &http::Method, path: &str, upload_path: &str) -> Self {
        if path.starts_with("/auth/") {
            Tier::Auth
        } else if method == http::Method::POST && path.starts_with(upload_path) {
            Tier::Upload
        } else if path.starts_with("/api/") {
            Tier::Api
        } else {
            Tier::Global
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Auth => "auth",
            Tier::Api => "api",
            Tier::Upload => "upload",
        }
    }

    /// Suffix appended to a client key when this tier has its own bucket
    fn key_suffix(&self) -> &'static str {
        match self {
            Tier::Global => "",
            Tier::Auth => ":auth",
            Tier::Api => ":api",
            Tier::Upload => ":upload",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a rate limiting subject within one bucket.
///
/// `<ip>` or `<ip>:<user_id>`, followed by the bucket's tier suffix when the
/// bucket is not the global one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(ip: &str, user_id: Option<&str>, bucket: Tier) -> Self {
        let base = match user_id {
            Some(user) => format!("{}:{}", ip, user),
            None => ip.to_string(),
        };
        Self(format!("{}{}", base, bucket.key_suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one counter increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    /// Count after this increment, within the current window
    pub count: u64,
    /// Time until the window resets
    pub ttl: Duration,
}

/// Rate limit result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u64,
    /// Total limit
    pub limit: u64,
    /// When the limit resets (seconds from now)
    pub reset_after: u64,
    /// Bucket that was charged
    pub tier: Tier,
}

impl RateLimitResult {
    /// Evaluate an increment against a rule.
    pub fn evaluate(rule: &RateRule, increment: Increment, tier: Tier) -> Self {
        // Whole seconds, rounded up, at least one
        let reset_after = increment.ttl.as_millis().div_ceil(1000).max(1) as u64;

        Self {
            allowed: increment.count <= rule.limit,
            remaining: rule.limit.saturating_sub(increment.count),
            limit: rule.limit,
            reset_after,
            tier,
        }
    }
}
