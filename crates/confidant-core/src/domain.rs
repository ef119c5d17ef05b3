use std::fmt;

use chrono::{DateTime, Utc};

/// Telegram user id (numeric, externally assigned).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Subscription and quota state of one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub user_id: UserId,
    /// Elevated access (PRO).
    pub is_pro: bool,
    /// Completions consumed. Negative values are banked referral credit.
    pub usage_count: i64,
    pub pro_until: Option<DateTime<Utc>>,
    pub referral_code: String,
}

impl Account {
    /// Elevated access whose expiry has passed at `now`.
    pub fn pro_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pro && self.pro_until.is_some_and(|until| until < now)
    }
}

/// Result of `resolve`: the account plus whether this call created it.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub account: Account,
    pub created: bool,
}

/// Marker stored as the outbound text of a crisis-intercepted turn.
pub const BLOCKED_TURN_MARKER: &str = "БЛОК: опасная тема - перенаправление к специалисту";

/// One inbound message and what the bot answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub user_id: UserId,
    pub inbound: String,
    pub outbound: String,
}

/// Inbound message event as handed over by the messaging adapter.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub display_name: String,
    pub text: String,
}
