//! SQLite-backed entitlement store and conversation log.
//!
//! One pool is owned by [`SqliteStore`] and shared by cloning the store; there
//! is no process-wide connection.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use confidant_core::{
    domain::{Account, Resolved, Turn, UserId},
    errors::Error,
    ports::{ConversationLog, EntitlementStore},
    referral::{ReferralBonus, ReferralCode, ReferralOutcome},
    Result,
};

mod migrations;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(map_db_err)?;

        migrations::run(&pool).await?;
        info!("entitlement store ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All turns of one user, oldest first.
    pub async fn turns_for(&self, user_id: UserId) -> Result<Vec<Turn>> {
        let rows = sqlx::query(
            "SELECT user_id, inbound_text, outbound_text FROM turns WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.iter()
            .map(|r| {
                Ok(Turn {
                    user_id: UserId(r.try_get("user_id").map_err(map_db_err)?),
                    inbound: r.try_get("inbound_text").map_err(map_db_err)?,
                    outbound: r.try_get("outbound_text").map_err(map_db_err)?,
                })
            })
            .collect()
    }
}

const SELECT_ACCOUNT: &str =
    "SELECT user_id, is_pro, usage_count, pro_until, ref_code FROM accounts WHERE user_id = ?";

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let pro_until: Option<i64> = row.try_get("pro_until").map_err(map_db_err)?;
    Ok(Account {
        user_id: UserId(row.try_get("user_id").map_err(map_db_err)?),
        is_pro: row.try_get("is_pro").map_err(map_db_err)?,
        usage_count: row.try_get("usage_count").map_err(map_db_err)?,
        pro_until: pro_until.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        referral_code: row.try_get("ref_code").map_err(map_db_err)?,
    })
}

/// SQLite primary result codes that mean the database cannot be used right
/// now: BUSY, LOCKED, IOERR, FULL, CANTOPEN.
const UNAVAILABLE_CODES: [i32; 5] = [5, 6, 10, 13, 14];

/// Connection-class failures and lock/open/disk result codes mean the store is
/// unreachable; anything else is an unexpected storage error.
pub(crate) fn map_db_err(e: sqlx::Error) -> Error {
    let unavailable = match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        // Extended codes carry the primary code in the low byte.
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| UNAVAILABLE_CODES.contains(&(code & 0xff))),
        _ => false,
    };
    if unavailable {
        Error::StoreUnavailable(e.to_string())
    } else {
        Error::Storage(e.to_string())
    }
}

#[async_trait]
impl EntitlementStore for SqliteStore {
    async fn resolve(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        trial: Duration,
    ) -> Result<Resolved> {
        let code = ReferralCode::mint(user_id);
        let inserted = sqlx::query(
            "INSERT INTO accounts (user_id, is_pro, usage_count, pro_until, ref_code, created_at) \
             VALUES (?, 1, 0, ?, ?, ?) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id.0)
        .bind((now + trial).timestamp())
        .bind(code.as_str())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?
        .rows_affected();

        let row = sqlx::query(SELECT_ACCOUNT)
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(Resolved {
            account: account_from_row(&row)?,
            created: inserted == 1,
        })
    }

    async fn find(&self, user_id: UserId) -> Result<Option<Account>> {
        let row = sqlx::query(SELECT_ACCOUNT)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn apply_referral(
        &self,
        new_user: UserId,
        code: &ReferralCode,
        bonus: ReferralBonus,
    ) -> Result<ReferralOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let referrer: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM accounts WHERE ref_code = ?")
                .bind(code.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?;

        let Some(referrer) = referrer.map(UserId) else {
            return Ok(ReferralOutcome::UnknownCode);
        };
        if referrer == new_user {
            return Ok(ReferralOutcome::SelfReferral);
        }

        for (user, credit) in [(referrer, bonus.referrer), (new_user, bonus.referee)] {
            sqlx::query("UPDATE accounts SET usage_count = usage_count - ? WHERE user_id = ?")
                .bind(credit)
                .bind(user.0)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(ReferralOutcome::Credited { referrer })
    }

    async fn clear_elevated(&self, user_id: UserId) -> Result<()> {
        sqlx::query("UPDATE accounts SET is_pro = 0 WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn increment_usage(&self, user_id: UserId) -> Result<()> {
        let done =
            sqlx::query("UPDATE accounts SET usage_count = usage_count + 1 WHERE user_id = ?")
                .bind(user_id.0)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?
                .rows_affected();
        if done == 0 {
            warn!(%user_id, "usage increment matched no account");
        }
        Ok(())
    }

    async fn expire_elevated(&self, now: DateTime<Utc>) -> Result<u64> {
        let n = sqlx::query(
            "UPDATE accounts SET is_pro = 0 \
             WHERE is_pro = 1 AND pro_until IS NOT NULL AND pro_until < ?",
        )
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?
        .rows_affected();
        Ok(n)
    }

    async fn reset_usage(&self) -> Result<u64> {
        let n = sqlx::query("UPDATE accounts SET usage_count = 0 WHERE usage_count > 0")
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        Ok(n)
    }
}

#[async_trait]
impl ConversationLog for SqliteStore {
    async fn record(&self, turn: &Turn) -> Result<()> {
        sqlx::query(
            "INSERT INTO turns (user_id, inbound_text, outbound_text, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(turn.user_id.0)
        .bind(&turn.inbound)
        .bind(&turn.outbound)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }
}
