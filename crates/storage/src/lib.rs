use std::{collections::HashMap, str::FromStr};

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use shared::domain::ConversationId;

/// Default store URL. An in-memory database lives exactly as long as its
/// pool, which is the session-scoped durability the unread ledger wants;
/// a file URL upgrades to cross-restart durability through the same path.
pub const DEFAULT_SESSION_URL: &str = "sqlite::memory:";

/// Persistence behind the unread ledger: the per-conversation count map
/// and its derived total, rewritten after every ledger mutation.
#[derive(Clone)]
pub struct SessionStore {
    pool: Pool<Sqlite>,
}

impl SessionStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory sqlite database exists per connection; more than one
        // connection in the pool would mean more than one database, and
        // recycling the connection would wipe it mid-session.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unread_counts (
                conversation_id TEXT PRIMARY KEY,
                count           INTEGER NOT NULL CHECK (count >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure unread_counts table exists")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unread_totals (
                id    INTEGER PRIMARY KEY CHECK (id = 1),
                total INTEGER NOT NULL CHECK (total >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure unread_totals table exists")?;

        Ok(())
    }

    /// Replaces the persisted map in one transaction. The stored total is
    /// recomputed from the map here, never trusted from the caller.
    pub async fn persist_unread(&self, counts: &HashMap<ConversationId, u32>) -> Result<u32> {
        let total: u32 = counts.values().sum();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM unread_counts")
            .execute(&mut *tx)
            .await?;
        for (conversation_id, count) in counts {
            sqlx::query("INSERT INTO unread_counts (conversation_id, count) VALUES (?, ?)")
                .bind(conversation_id.as_str())
                .bind(i64::from(*count))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("INSERT OR REPLACE INTO unread_totals (id, total) VALUES (1, ?)")
            .bind(i64::from(total))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(total)
    }

    /// Loads the map, reconciling the stored total against it: when the
    /// two disagree (a torn write from an earlier session), the map wins
    /// and the total row is rewritten.
    pub async fn load_unread(&self) -> Result<HashMap<ConversationId, u32>> {
        let rows = sqlx::query("SELECT conversation_id, count FROM unread_counts")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let conversation_id: String = row.try_get("conversation_id")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(ConversationId::new(conversation_id), count as u32);
        }

        let derived: u32 = counts.values().sum();
        if self.stored_total().await? != Some(derived) {
            sqlx::query("INSERT OR REPLACE INTO unread_totals (id, total) VALUES (1, ?)")
                .bind(i64::from(derived))
                .execute(&self.pool)
                .await?;
        }

        Ok(counts)
    }

    pub async fn stored_total(&self) -> Result<Option<u32>> {
        let row = sqlx::query("SELECT total FROM unread_totals WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<i64, _>("total")? as u32),
            None => None,
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
