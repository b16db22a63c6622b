//! Quota gate: tier policy and usage counters.
//!
//! Checked before any paid call; counters move only after a successful
//! terminal `complete`. Daily/monthly resets are conditional updates keyed
//! on the stored request date, so concurrent requests crossing a midnight or
//! month boundary cannot lose a reset.

use chrono::{Datelike, Utc};
use sqlx::SqlitePool;

use crate::models::user::{SubscriptionTier, UNLIMITED, User, UserRow};
use crate::utils::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("unknown user")]
    UnknownUser,

    #[error("{0}")]
    TierForbidden(String),

    #[error("daily request limit reached")]
    DailyExceeded,

    #[error("monthly request limit reached")]
    MonthlyExceeded,

    #[error("AI token budget exhausted")]
    TokensExceeded,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt user record: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<QuotaError> for ApiError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::UnknownUser => ApiError::unauthorized("unknown user"),
            QuotaError::TierForbidden(msg) => ApiError::tier_forbidden(msg),
            QuotaError::DailyExceeded => {
                ApiError::daily_exceeded("daily request limit reached")
            },
            QuotaError::MonthlyExceeded => {
                ApiError::monthly_exceeded("monthly request limit reached")
            },
            QuotaError::TokensExceeded => {
                ApiError::tokens_exceeded("AI token budget exhausted")
            },
            QuotaError::Database(e) => ApiError::internal(format!("database error: {}", e)),
            QuotaError::Decode(e) => ApiError::internal(format!("corrupt user record: {}", e)),
        }
    }
}

pub struct QuotaGate {
    pool: SqlitePool,
}

impl QuotaGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Admit or reject a request before any paid work happens.
    ///
    /// Resets stale counters (new UTC day / new month), then checks the
    /// requested pack size and every counter against the user's effective
    /// limits. Returns the refreshed user on success.
    pub async fn check(&self, user_id: &str, requested_max_mods: i64) -> Result<User, QuotaError> {
        self.fetch_user(user_id).await?.ok_or(QuotaError::UnknownUser)?;

        self.reset_stale_counters(user_id).await?;
        let user = self
            .fetch_user(user_id)
            .await?
            .ok_or(QuotaError::UnknownUser)?;

        if user.subscription_tier == SubscriptionTier::Free {
            return Err(QuotaError::TierForbidden(
                "AI features require a paid subscription".to_string(),
            ));
        }

        let limits = user.effective_limits();

        if limits.max_mods_per_request != UNLIMITED
            && requested_max_mods > limits.max_mods_per_request
        {
            return Err(QuotaError::TierForbidden(format!(
                "requested {} mods, tier allows {} per request",
                requested_max_mods, limits.max_mods_per_request
            )));
        }

        if limits.daily_requests != UNLIMITED && user.daily_requests_used >= limits.daily_requests
        {
            return Err(QuotaError::DailyExceeded);
        }

        if limits.monthly_requests != UNLIMITED
            && user.monthly_requests_used >= limits.monthly_requests
        {
            return Err(QuotaError::MonthlyExceeded);
        }

        if limits.ai_token_limit != UNLIMITED && user.ai_tokens_used >= limits.ai_token_limit {
            return Err(QuotaError::TokensExceeded);
        }

        Ok(user)
    }

    /// Charge a successful completion: +1 daily, +1 monthly, plus the
    /// LLM-reported tokens.
    pub async fn commit(&self, user_id: &str, tokens: i64) -> Result<(), QuotaError> {
        let today = Utc::now().date_naive();
        sqlx::query(
            "UPDATE users SET daily_requests_used = daily_requests_used + 1, \
             monthly_requests_used = monthly_requests_used + 1, \
             ai_tokens_used = ai_tokens_used + ?, last_request_date = ? WHERE id = ?",
        )
        .bind(tokens.max(0))
        .bind(today)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Conditional resets: the WHERE clauses compare against the stored
    /// date, so two racing requests cannot both skip or double a reset.
    async fn reset_stale_counters(&self, user_id: &str) -> Result<(), QuotaError> {
        let now = Utc::now();
        let today = now.date_naive();
        let month_key = format!("{:04}-{:02}", now.year(), now.month());

        sqlx::query(
            "UPDATE users SET daily_requests_used = 0 \
             WHERE id = ? AND (last_request_date IS NULL OR last_request_date <> ?)",
        )
        .bind(user_id)
        .bind(today)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE users SET monthly_requests_used = 0, ai_tokens_used = 0 \
             WHERE id = ? AND (last_request_date IS NULL OR strftime('%Y-%m', last_request_date) <> ?)",
        )
        .bind(user_id)
        .bind(&month_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<User>, QuotaError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, subscription_tier, daily_requests_used, monthly_requests_used, \
             ai_tokens_used, last_request_date, custom_limits FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose().map_err(Into::into)
    }
}
