// SQLite-backed moderation store.
//
// Tables:
// - chat_policies: Per-chat moderation policy
// - warnings: One row per warning; the live count is the row count
// - stop_words: Per-chat forbidden words (stored lowercase)
// - triggers: Per-chat keyword -> canned response
// - notes: Per-chat `#name` -> saved content

use crate::core::moderation::{ChatPolicy, ModerationStore, StoreError, WarningRecord};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use std::collections::{HashMap, HashSet};

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_policies (
                chat_id INTEGER PRIMARY KEY,
                warn_limit INTEGER NOT NULL,
                flood_message_limit INTEGER NOT NULL,
                flood_window_secs INTEGER NOT NULL,
                captcha_enabled BOOLEAN NOT NULL DEFAULT 0,
                captcha_timeout_secs INTEGER NOT NULL,
                link_filter_enabled BOOLEAN NOT NULL DEFAULT 0,
                welcome_message TEXT NOT NULL,
                audit_channel_id INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warnings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_warnings_chat_user
                ON warnings(chat_id, user_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stop_words (
                chat_id INTEGER NOT NULL,
                word TEXT NOT NULL,
                PRIMARY KEY (chat_id, word)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                chat_id INTEGER NOT NULL,
                keyword TEXT NOT NULL,
                response TEXT NOT NULL,
                PRIMARY KEY (chat_id, keyword)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                chat_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (chat_id, name)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::debug!("Moderation tables ready");
        Ok(())
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn get_policy(&self, chat_id: u64) -> Result<ChatPolicy, StoreError> {
        let row = sqlx::query("SELECT * FROM chat_policies WHERE chat_id = ?")
            .bind(chat_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        let Some(row) = row else {
            // Never configured
            return Ok(ChatPolicy::default());
        };

        Ok(ChatPolicy {
            warn_limit: row.get::<i64, _>("warn_limit") as u32,
            flood_message_limit: row.get::<i64, _>("flood_message_limit") as u32,
            flood_window_secs: row.get::<i64, _>("flood_window_secs") as u64,
            captcha_enabled: row.get("captcha_enabled"),
            captcha_timeout_secs: row.get::<i64, _>("captcha_timeout_secs") as u64,
            link_filter_enabled: row.get("link_filter_enabled"),
            welcome_message: row.get("welcome_message"),
            audit_channel_id: row
                .get::<Option<i64>, _>("audit_channel_id")
                .map(|id| id as u64),
        })
    }

    async fn save_policy(&self, chat_id: u64, policy: &ChatPolicy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_policies (
                chat_id, warn_limit, flood_message_limit, flood_window_secs,
                captcha_enabled, captcha_timeout_secs, link_filter_enabled,
                welcome_message, audit_channel_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                warn_limit = excluded.warn_limit,
                flood_message_limit = excluded.flood_message_limit,
                flood_window_secs = excluded.flood_window_secs,
                captcha_enabled = excluded.captcha_enabled,
                captcha_timeout_secs = excluded.captcha_timeout_secs,
                link_filter_enabled = excluded.link_filter_enabled,
                welcome_message = excluded.welcome_message,
                audit_channel_id = excluded.audit_channel_id
            "#,
        )
        .bind(chat_id as i64)
        .bind(policy.warn_limit as i64)
        .bind(policy.flood_message_limit as i64)
        .bind(policy.flood_window_secs as i64)
        .bind(policy.captcha_enabled)
        .bind(policy.captcha_timeout_secs as i64)
        .bind(policy.link_filter_enabled)
        .bind(&policy.welcome_message)
        .bind(policy.audit_channel_id.map(|id| id as i64))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn add_warning(&self, record: &WarningRecord) -> Result<u32, StoreError> {
        // Insert and count in one transaction so concurrent warnings each
        // see their own row in the returned count.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("INSERT INTO warnings (chat_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(record.chat_id as i64)
            .bind(record.user_id as i64)
            .bind(record.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM warnings WHERE chat_id = ? AND user_id = ?",
        )
        .bind(record.chat_id as i64)
        .bind(record.user_id as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(row.get::<i64, _>("count") as u32)
    }

    async fn count_warnings(&self, chat_id: u64, user_id: u64) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM warnings WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id as i64)
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.get::<i64, _>("count") as u32)
    }

    async fn remove_last_warning(&self, chat_id: u64, user_id: u64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM warnings WHERE id = (
                SELECT id FROM warnings
                WHERE chat_id = ? AND user_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(chat_id as i64)
        .bind(user_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_warnings(&self, chat_id: u64, user_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM warnings WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn stop_words(&self, chat_id: u64) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT word FROM stop_words WHERE chat_id = ?")
            .bind(chat_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows.iter().map(|row| row.get::<String, _>("word")).collect())
    }

    async fn add_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO stop_words (chat_id, word) VALUES (?, ?)")
            .bind(chat_id as i64)
            .bind(word)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM stop_words WHERE chat_id = ? AND word = ?")
            .bind(chat_id as i64)
            .bind(word)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn triggers(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT keyword, response FROM triggers WHERE chat_id = ?")
            .bind(chat_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("keyword"), row.get("response")))
            .collect())
    }

    async fn upsert_trigger(
        &self,
        chat_id: u64,
        keyword: &str,
        response: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let existing = sqlx::query("SELECT 1 FROM triggers WHERE chat_id = ? AND keyword = ?")
            .bind(chat_id as i64)
            .bind(keyword)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO triggers (chat_id, keyword, response)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id, keyword) DO UPDATE SET
                response = excluded.response
            "#,
        )
        .bind(chat_id as i64)
        .bind(keyword)
        .bind(response)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(existing.is_none())
    }

    async fn remove_trigger(&self, chat_id: u64, keyword: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM triggers WHERE chat_id = ? AND keyword = ?")
            .bind(chat_id as i64)
            .bind(keyword)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn notes(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT name, content FROM notes WHERE chat_id = ?")
            .bind(chat_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("name"), row.get("content")))
            .collect())
    }

    async fn upsert_note(&self, chat_id: u64, name: &str, content: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let existing = sqlx::query("SELECT 1 FROM notes WHERE chat_id = ? AND name = ?")
            .bind(chat_id as i64)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO notes (chat_id, name, content)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id, name) DO UPDATE SET
                content = excluded.content
            "#,
        )
        .bind(chat_id as i64)
        .bind(name)
        .bind(content)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(existing.is_none())
    }

    async fn remove_note(&self, chat_id: u64, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notes WHERE chat_id = ? AND name = ?")
            .bind(chat_id as i64)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }
}
