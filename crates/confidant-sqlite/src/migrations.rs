//! Schema migrations, tracked in `_migrations` so each runs once.

use sqlx::SqlitePool;
use tracing::info;

use confidant_core::Result;

use crate::map_db_err;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_accounts",
        "CREATE TABLE IF NOT EXISTS accounts (
            user_id     INTEGER PRIMARY KEY,
            is_pro      BOOLEAN NOT NULL DEFAULT 0,
            usage_count INTEGER NOT NULL DEFAULT 0,
            pro_until   INTEGER,
            ref_code    TEXT NOT NULL UNIQUE,
            created_at  INTEGER NOT NULL
        );",
    ),
    (
        "002_turns",
        "CREATE TABLE IF NOT EXISTS turns (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL,
            inbound_text  TEXT NOT NULL,
            outbound_text TEXT NOT NULL,
            created_at    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_user ON turns(user_id);",
    ),
];

pub(crate) async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .execute(pool)
    .await
    .map_err(map_db_err)?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<String> =
            sqlx::query_scalar("SELECT name FROM _migrations WHERE name = ?")
                .bind(*name)
                .fetch_optional(pool)
                .await
                .map_err(map_db_err)?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await.map_err(map_db_err)?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(*name)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;
        info!(migration = *name, "applied migration");
    }
    Ok(())
}
