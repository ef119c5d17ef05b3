//! Hexagonal ports. Storage, the completion provider and the messenger live
//! behind these traits and are implemented in adapter crates.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::{Account, Resolved, Turn, UserId},
    referral::{ReferralBonus, ReferralCode, ReferralOutcome},
    Result,
};

/// Persistent subscription, quota and referral state.
///
/// The only shared mutable resource. Implementations must make
/// `increment_usage` atomic at least per row and must not cache accounts
/// across calls.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch the account, creating it with a trial until `now + trial` if absent.
    async fn resolve(&self, user_id: UserId, now: DateTime<Utc>, trial: Duration)
        -> Result<Resolved>;

    /// Fetch without creating.
    async fn find(&self, user_id: UserId) -> Result<Option<Account>>;

    /// Credit both sides of a referral. No-op for unknown or self-referential codes.
    async fn apply_referral(
        &self,
        new_user: UserId,
        code: &ReferralCode,
        bonus: ReferralBonus,
    ) -> Result<ReferralOutcome>;

    /// Persist `is_pro = false` for one account.
    async fn clear_elevated(&self, user_id: UserId) -> Result<()>;

    async fn increment_usage(&self, user_id: UserId) -> Result<()>;

    /// Clear elevated access on every account whose expiry is before `now`.
    async fn expire_elevated(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Start a new allowance window, keeping banked referral credit.
    async fn reset_usage(&self) -> Result<u64>;

    /// Lazy expiry correction; returns whether the account changed.
    async fn correct_expiry(&self, account: &mut Account, now: DateTime<Utc>) -> Result<bool> {
        if !account.pro_expired(now) {
            return Ok(false);
        }
        self.clear_elevated(account.user_id).await?;
        account.is_pro = false;
        Ok(true)
    }
}

/// Append-only record of every turn.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn record(&self, turn: &Turn) -> Result<()>;
}

/// A single upstream text-completion call.
///
/// Implementations report failures; timeout and fallback live in
/// [`crate::completion::CompletionProxy`].
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, text: &str) -> Result<String>;
}
