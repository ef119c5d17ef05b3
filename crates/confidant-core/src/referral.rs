//! Referral codes: minting, parsing, and the outcome of crediting one.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

use crate::domain::UserId;

const PREFIX: &str = "REF";

/// A well-formed referral code (`REF` + user id + three digits).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Mint a code for a new account.
    ///
    /// The suffix is always three digits, so the user id is recoverable from the
    /// code and two accounts can never share one.
    pub fn mint(user_id: UserId) -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(100..=999);
        Self(format!("{PREFIX}{}{suffix}", user_id.0))
    }

    /// Parse a code supplied by a user. `None` means malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^REF\d{4,}$").expect("valid referral regex"));
        let raw = raw.trim();
        re.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allowance credited on a successful referral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferralBonus {
    pub referrer: i64,
    pub referee: i64,
}

impl Default for ReferralBonus {
    fn default() -> Self {
        Self {
            referrer: 5,
            referee: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferralOutcome {
    Credited { referrer: UserId },
    UnknownCode,
    SelfReferral,
    Malformed,
}
