use super::store::{CountingStore, StoreKind};
use super::types::{ClientKey, RateLimitResult, RateRule, Tier};
use crate::config::RateLimitingConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::identity::resolve_client_ip;
use http::{HeaderMap, Method};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rules for every tier, frozen at startup.
///
/// A tier without its own rule is charged against the global bucket.
#[derive(Debug, Clone)]
pub struct TierRules {
    global: RateRule,
    auth: Option<RateRule>,
    api: Option<RateRule>,
    upload: Option<RateRule>,
}

impl TierRules {
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        let global = RateRule::parse_or_default(&config.global);
        let tier_rule = |tier: Tier, spec: &str| -> Option<RateRule> {
            // Same text as the global rate shares the global bucket
            if spec == config.global {
                return None;
            }
            match spec.parse::<RateRule>() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(
                        tier = %tier,
                        rate = %spec,
                        error = %e,
                        "Invalid tier rate, applying the global limit instead"
                    );
                    None
                }
            }
        };

        Self {
            global,
            auth: tier_rule(Tier::Auth, &config.auth),
            api: tier_rule(Tier::Api, &config.api),
            upload: tier_rule(Tier::Upload, &config.upload),
        }
    }

    /// The bucket charged for a tier and the rule that governs it
    pub fn bucket_for(&self, tier: Tier) -> (Tier, RateRule) {
        let own = match tier {
            Tier::Global => None,
            Tier::Auth => self.auth,
            Tier::Api => self.api,
            Tier::Upload => self.upload,
        };

        match own {
            Some(rule) => (tier, rule),
            None => (Tier::Global, self.global),
        }
    }
}

/// Tiered fixed-window rate limiter over a [`CountingStore`]
pub struct RateLimiterService {
    store: Arc<dyn CountingStore>,
    rules: TierRules,
    trust_proxy: bool,
    upload_path: String,
}

impl RateLimiterService {
    pub fn new(store: Arc<dyn CountingStore>, config: &RateLimitingConfig) -> Self {
        let rules = TierRules::from_config(config);
        info!(
            global = %config.global,
            auth = %config.auth,
            api = %config.api,
            upload = %config.upload,
            store = ?store.kind(),
            "Rate limiting enabled"
        );

        Self {
            store,
            rules,
            trust_proxy: config.trust_proxy,
            upload_path: config.upload_path.clone(),
        }
    }

    /// Charge one request against its bucket.
    ///
    /// Returns `Ok(None)` for requests exempted by the whitelist. Store
    /// failures are returned as errors, never treated as allow or deny.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<Option<RateLimitResult>> {
        if ctx.skip_rate_limit {
            debug!(path = %path, "Rate limiting skipped for whitelisted client");
            return Ok(None);
        }

        let ip = resolve_client_ip(headers, ctx.peer, self.trust_proxy);
        let tier = Tier::resolve(method, path, &self.upload_path);
        let (bucket, rule) = self.rules.bucket_for(tier);
        let user_id = ctx.auth.as_ref().map(|auth| auth.user_id.as_str());
        let key = ClientKey::new(&ip, user_id, bucket);

        let increment = self.store.increment(key.as_str(), rule.period).await?;
        let result = RateLimitResult::evaluate(&rule, increment, bucket);

        if result.allowed {
            debug!(
                key = %key,
                tier = %tier,
                count = increment.count,
                limit = rule.limit,
                "Rate limit check passed"
            );
        } else {
            warn!(
                key = %key,
                tier = %tier,
                count = increment.count,
                limit = rule.limit,
                "Rate limit exceeded"
            );
        }

        Ok(Some(result))
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store.kind()
    }

    pub fn rules(&self) -> &TierRules {
        &self.rules
    }
}
