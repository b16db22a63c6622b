//! User accounts, subscription tiers and usage counters.
//!
//! Accounts are created by the account service; the only mutations made
//! here are the quota counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// `-1` in any limit field means unlimited.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Test,
    Premium,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Test => "test",
            Self::Premium => "premium",
            Self::Pro => "pro",
        }
    }

    /// Unknown tiers downgrade to free rather than erroring out.
    pub fn parse_tier(s: &str) -> Self {
        match s {
            "test" => Self::Test,
            "premium" => Self::Premium,
            "pro" => Self::Pro,
            _ => Self::Free,
        }
    }

    /// Built-in per-tier limits, overridable per user via `custom_limits`.
    pub fn default_limits(&self) -> EffectiveLimits {
        match self {
            Self::Free => EffectiveLimits {
                daily_requests: 0,
                monthly_requests: 0,
                max_mods_per_request: 0,
                ai_token_limit: 0,
            },
            Self::Test => EffectiveLimits {
                daily_requests: 5,
                monthly_requests: 30,
                max_mods_per_request: 40,
                ai_token_limit: 200_000,
            },
            Self::Premium => EffectiveLimits {
                daily_requests: 25,
                monthly_requests: 300,
                max_mods_per_request: 150,
                ai_token_limit: 2_000_000,
            },
            Self::Pro => EffectiveLimits {
                daily_requests: UNLIMITED,
                monthly_requests: UNLIMITED,
                max_mods_per_request: 250,
                ai_token_limit: UNLIMITED,
            },
        }
    }
}

/// Per-user overrides stored as JSON; each set field replaces the tier value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mods_per_request: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_token_limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub daily_requests: i64,
    pub monthly_requests: i64,
    pub max_mods_per_request: i64,
    pub ai_token_limit: i64,
}

impl EffectiveLimits {
    pub fn apply_overrides(mut self, custom: &CustomLimits) -> Self {
        if let Some(v) = custom.daily_requests {
            self.daily_requests = v;
        }
        if let Some(v) = custom.monthly_requests {
            self.monthly_requests = v;
        }
        if let Some(v) = custom.max_mods_per_request {
            self.max_mods_per_request = v;
        }
        if let Some(v) = custom.ai_token_limit {
            self.ai_token_limit = v;
        }
        self
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub subscription_tier: String,
    pub daily_requests_used: i64,
    pub monthly_requests_used: i64,
    pub ai_tokens_used: i64,
    pub last_request_date: Option<NaiveDate>,
    pub custom_limits: Option<String>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub subscription_tier: SubscriptionTier,
    pub daily_requests_used: i64,
    pub monthly_requests_used: i64,
    pub ai_tokens_used: i64,
    pub last_request_date: Option<NaiveDate>,
    pub custom_limits: Option<CustomLimits>,
}

impl User {
    pub fn effective_limits(&self) -> EffectiveLimits {
        let base = self.subscription_tier.default_limits();
        match &self.custom_limits {
            Some(custom) => base.apply_overrides(custom),
            None => base,
        }
    }
}

impl TryFrom<UserRow> for User {
    type Error = serde_json::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let custom_limits = match row.custom_limits.as_deref() {
            Some(raw) if !raw.is_empty() => Some(serde_json::from_str(raw)?),
            _ => None,
        };
        Ok(Self {
            id: row.id,
            subscription_tier: SubscriptionTier::parse_tier(&row.subscription_tier),
            daily_requests_used: row.daily_requests_used,
            monthly_requests_used: row.monthly_requests_used,
            ai_tokens_used: row.ai_tokens_used,
            last_request_date: row.last_request_date,
            custom_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_is_fully_locked() {
        let limits = SubscriptionTier::Free.default_limits();
        assert_eq!(limits.daily_requests, 0);
        assert_eq!(limits.monthly_requests, 0);
        assert_eq!(limits.max_mods_per_request, 0);
        assert_eq!(limits.ai_token_limit, 0);
    }

    #[test]
    fn custom_limits_override_per_field() {
        let user = User {
            id: "u1".into(),
            subscription_tier: SubscriptionTier::Test,
            daily_requests_used: 0,
            monthly_requests_used: 0,
            ai_tokens_used: 0,
            last_request_date: None,
            custom_limits: Some(CustomLimits {
                daily_requests: Some(100),
                ..CustomLimits::default()
            }),
        };
        let limits = user.effective_limits();
        assert_eq!(limits.daily_requests, 100);
        // untouched fields keep tier defaults
        assert_eq!(limits.monthly_requests, 30);
    }

    #[test]
    fn unknown_tier_parses_as_free() {
        assert_eq!(SubscriptionTier::parse_tier("enterprise"), SubscriptionTier::Free);
    }
}
