use std::{ops::RangeInclusive, time::Duration};

use crate::{errors::Error, referral::ReferralBonus, Result};

const DEFAULT_DB_URL: &str = "sqlite:confidant.db";
const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_COMPLETION_MODEL: &str = "deepseek-chat";
const DEFAULT_PURCHASE_CONTACT: &str = "@assistantai_gpt";
const DEFAULT_PURCHASE_URL: &str = "https://example.com/buy";
const DEFAULT_PRO_PRICE: &str = "299₽/месяц";

const MAX_TRIAL_DAYS: i64 = 3650;
const MAX_REFERRAL_BONUS: i64 = 1000;
const MAX_USAGE_RESET_HOURS: u64 = 24 * 366;
const MAX_EXPIRY_SWEEP_MINUTES: u64 = 60 * 24 * 366;

/// Typed configuration, sourced from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,

    // Storage
    pub database_url: String,
    pub db_max_connections: u32,

    // Completion provider
    pub completion_api_key: String,
    pub completion_base_url: String,
    pub completion_model: String,
    pub completion_max_tokens: u32,
    pub completion_temperature: f32,
    pub completion_timeout: Duration,

    // Entitlements
    pub free_message_limit: i64,
    pub trial_days: i64,
    pub referral_bonus: ReferralBonus,

    // Maintenance (None = disabled)
    pub usage_reset_interval: Option<Duration>,
    pub expiry_sweep_interval: Option<Duration>,

    // Purchase text
    pub purchase_contact: String,
    pub purchase_url: String,
    pub pro_price: String,
}

impl Config {
    /// Load from the process environment, after an optional `.env`.
    pub fn load() -> Result<Self> {
        // Existing variables win over `.env` entries.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let telegram_bot_token = env.required("BOT_TOKEN")?;
        let completion_api_key = env.required("DEEPSEEK_API_KEY")?;

        let database_url = env.string("DB_URL").unwrap_or(DEFAULT_DB_URL.to_string());
        let db_max_connections = env.parse::<u32>("DB_MAX_CONNECTIONS")?.unwrap_or(5).max(1);

        let completion_base_url = env
            .string("COMPLETION_BASE_URL")
            .unwrap_or(DEFAULT_COMPLETION_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let completion_model = env
            .string("COMPLETION_MODEL")
            .unwrap_or(DEFAULT_COMPLETION_MODEL.to_string());
        let completion_max_tokens = env.parse::<u32>("COMPLETION_MAX_TOKENS")?.unwrap_or(500);
        let completion_temperature = env.parse::<f32>("COMPLETION_TEMPERATURE")?.unwrap_or(0.7);
        let timeout_secs = env.parse::<u64>("COMPLETION_TIMEOUT_SECS")?.unwrap_or(10);
        if timeout_secs == 0 {
            return Err(Error::Config(
                "COMPLETION_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        let free_message_limit = env.parse::<i64>("FREE_MESSAGE_LIMIT")?.unwrap_or(10);
        if free_message_limit <= 0 {
            return Err(Error::Config(
                "FREE_MESSAGE_LIMIT must be positive".to_string(),
            ));
        }
        let trial_days = env.bounded("TRIAL_DAYS", 1, 0..=MAX_TRIAL_DAYS)?;

        let defaults = ReferralBonus::default();
        let referral_bonus = ReferralBonus {
            referrer: env.bounded("REFERRER_BONUS", defaults.referrer, 0..=MAX_REFERRAL_BONUS)?,
            referee: env.bounded("REFEREE_BONUS", defaults.referee, 0..=MAX_REFERRAL_BONUS)?,
        };

        // Zero disables a sweep.
        let reset_hours = env.bounded("USAGE_RESET_HOURS", 0, 0..=MAX_USAGE_RESET_HOURS)?;
        let usage_reset_interval =
            (reset_hours > 0).then(|| Duration::from_secs(reset_hours * 3600));
        let sweep_minutes = env.bounded("EXPIRY_SWEEP_MINUTES", 0, 0..=MAX_EXPIRY_SWEEP_MINUTES)?;
        let expiry_sweep_interval =
            (sweep_minutes > 0).then(|| Duration::from_secs(sweep_minutes * 60));

        Ok(Self {
            telegram_bot_token,
            database_url,
            db_max_connections,
            completion_api_key,
            completion_base_url,
            completion_model,
            completion_max_tokens,
            completion_temperature,
            completion_timeout: Duration::from_secs(timeout_secs),
            free_message_limit,
            trial_days,
            referral_bonus,
            usage_reset_interval,
            expiry_sweep_interval,
            purchase_contact: env
                .string("PURCHASE_CONTACT")
                .unwrap_or(DEFAULT_PURCHASE_CONTACT.to_string()),
            purchase_url: env
                .string("PURCHASE_URL")
                .unwrap_or(DEFAULT_PURCHASE_URL.to_string()),
            pro_price: env
                .string("PRO_PRICE")
                .unwrap_or(DEFAULT_PRO_PRICE.to_string()),
        })
    }

    pub fn trial_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.trial_days)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.string(key)
            .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}")))
    }

    /// Parsed value with a default, rejected outside `range`.
    fn bounded<T>(&self, key: &str, default: T, range: RangeInclusive<T>) -> Result<T>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display,
    {
        let value = self.parse::<T>(key)?.unwrap_or(default);
        if !range.contains(&value) {
            return Err(Error::Config(format!(
                "{key} must be between {} and {}, got {value}",
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("BOT_TOKEN", "123:abc"), ("DEEPSEEK_API_KEY", "sk-x")];

    #[test]
    fn defaults_match_documented_values() {
        let cfg = load(&REQUIRED).unwrap();
        assert_eq!(cfg.database_url, "sqlite:confidant.db");
        assert_eq!(cfg.free_message_limit, 10);
        assert_eq!(cfg.trial_days, 1);
        assert_eq!(cfg.referral_bonus, ReferralBonus { referrer: 5, referee: 3 });
        assert_eq!(cfg.completion_timeout, Duration::from_secs(10));
        assert_eq!(cfg.completion_max_tokens, 500);
        assert_eq!(cfg.completion_model, "deepseek-chat");
        assert!(cfg.usage_reset_interval.is_none());
        assert!(cfg.expiry_sweep_interval.is_none());
        assert_eq!(cfg.trial_duration(), chrono::Duration::days(1));
    }

    #[test]
    fn missing_token_is_config_error() {
        let err = load(&[("DEEPSEEK_API_KEY", "sk-x")]).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("BOT_TOKEN")));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = load(&[("BOT_TOKEN", "  "), ("DEEPSEEK_API_KEY", "sk-x")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_and_intervals() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FREE_MESSAGE_LIMIT", "20"),
            ("REFERRER_BONUS", "7"),
            ("USAGE_RESET_HOURS", "24"),
            ("EXPIRY_SWEEP_MINUTES", "0"),
            ("COMPLETION_BASE_URL", "https://llm.local/"),
        ]);
        let cfg = load(&pairs).unwrap();
        assert_eq!(cfg.free_message_limit, 20);
        assert_eq!(cfg.referral_bonus.referrer, 7);
        assert_eq!(cfg.referral_bonus.referee, 3);
        assert_eq!(cfg.usage_reset_interval, Some(Duration::from_secs(86_400)));
        assert!(cfg.expiry_sweep_interval.is_none());
        assert_eq!(cfg.completion_base_url, "https://llm.local");
    }

    #[test]
    fn rejects_garbage_numbers_and_zero_limits() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FREE_MESSAGE_LIMIT", "ten"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FREE_MESSAGE_LIMIT", "0"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("COMPLETION_TIMEOUT_SECS", "0"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn rejects_out_of_range_durations_and_bonuses() {
        for (key, value) in [
            ("TRIAL_DAYS", "-1"),
            ("TRIAL_DAYS", "1000000000000000"),
            ("REFERRER_BONUS", "-5"),
            ("REFEREE_BONUS", "-3"),
            ("REFEREE_BONUS", "100000"),
            ("USAGE_RESET_HOURS", "18446744073709551615"),
            ("EXPIRY_SWEEP_MINUTES", "18446744073709551615"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            let err = load(&pairs).unwrap_err();
            assert!(
                matches!(&err, Error::Config(m) if m.contains(key)),
                "{key}={value}: {err}"
            );
        }

        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("TRIAL_DAYS", "3650"), ("REFEREE_BONUS", "0")]);
        let cfg = load(&pairs).unwrap();
        assert_eq!(cfg.trial_duration(), chrono::Duration::days(3650));
        assert_eq!(cfg.referral_bonus.referee, 0);
    }
}
