use crate::profile::{BufferedMessage, MessageBuffer, ProfileMode, ProfileMonitor, UserProfile};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteRow, Pool, Row, Sqlite};
use std::path::Path;

/// SQLite persistence for user profiles, monitors and message buffers.
#[derive(Clone)]
pub struct SqliteProfileStore {
    pool: Pool<Sqlite>,
}

impl SqliteProfileStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        // Every in-memory connection is its own database
        let max_connections = if path == Path::new(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to profile database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                nickname TEXT NOT NULL DEFAULT '',
                profile_text TEXT NOT NULL DEFAULT '',
                traits_json TEXT NOT NULL DEFAULT '[]',
                interests_json TEXT NOT NULL DEFAULT '[]',
                speaking_style TEXT NOT NULL DEFAULT '',
                emotional_tendency TEXT NOT NULL DEFAULT '',
                message_count INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                user_id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                group_ids_json TEXT NOT NULL DEFAULT '[]',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create monitors table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_buffers (
                user_id TEXT PRIMARY KEY,
                messages_json TEXT NOT NULL DEFAULT '[]',
                last_flush INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create message_buffers table")?;

        Ok(())
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let traits_json = serde_json::to_string(&profile.traits)?;
        let interests_json = serde_json::to_string(&profile.interests)?;

        sqlx::query(
            "INSERT INTO profiles
             (user_id, nickname, profile_text, traits_json, interests_json,
              speaking_style, emotional_tendency, message_count, last_updated, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
              nickname = excluded.nickname, profile_text = excluded.profile_text,
              traits_json = excluded.traits_json, interests_json = excluded.interests_json,
              speaking_style = excluded.speaking_style,
              emotional_tendency = excluded.emotional_tendency,
              message_count = excluded.message_count, last_updated = excluded.last_updated",
        )
        .bind(&profile.user_id)
        .bind(&profile.nickname)
        .bind(&profile.profile_text)
        .bind(&traits_json)
        .bind(&interests_json)
        .bind(&profile.speaking_style)
        .bind(&profile.emotional_tendency)
        .bind(profile.message_count as i64)
        .bind(profile.last_updated)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save profile")?;

        tracing::debug!(user = %profile.user_id, "Profile saved");
        Ok(())
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query profile")?;
        Ok(row.map(|r| profile_from_row(&r)))
    }

    pub async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query("SELECT * FROM profiles ORDER BY created_at, user_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query profiles")?;
        Ok(rows.iter().map(profile_from_row).collect())
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    pub async fn save_monitor(&self, monitor: &ProfileMonitor) -> Result<()> {
        let group_ids_json = serde_json::to_string(&monitor.group_ids)?;

        sqlx::query(
            "INSERT INTO monitors (user_id, mode, group_ids_json, enabled, created_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
              mode = excluded.mode, group_ids_json = excluded.group_ids_json,
              enabled = excluded.enabled, created_at = excluded.created_at,
              created_by = excluded.created_by",
        )
        .bind(&monitor.user_id)
        .bind(monitor.mode.as_str())
        .bind(&group_ids_json)
        .bind(monitor.enabled)
        .bind(monitor.created_at)
        .bind(&monitor.created_by)
        .execute(&self.pool)
        .await
        .context("Failed to save monitor")?;
        Ok(())
    }

    pub async fn list_monitors(&self) -> Result<Vec<ProfileMonitor>> {
        let rows = sqlx::query("SELECT * FROM monitors ORDER BY created_at, user_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query monitors")?;

        let mut monitors = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id: String = row.get("user_id");
            let mode: String = row.get("mode");
            let mode = match mode.parse::<ProfileMode>() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(user = %user_id, "Skipping monitor: {}", e);
                    continue;
                }
            };
            monitors.push(ProfileMonitor {
                user_id,
                mode,
                group_ids: json_list(&row, "group_ids_json"),
                enabled: row.get("enabled"),
                created_at: row.get("created_at"),
                created_by: row.get("created_by"),
            });
        }
        Ok(monitors)
    }

    pub async fn delete_monitor(&self, user_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM monitors WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete monitor")?;
        Ok(res.rows_affected() > 0)
    }

    // =========================================================================
    // Message buffers
    // =========================================================================

    pub async fn save_buffer(&self, buffer: &MessageBuffer) -> Result<()> {
        let messages_json = serde_json::to_string(&buffer.messages)?;

        sqlx::query(
            "INSERT INTO message_buffers (user_id, messages_json, last_flush) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
              messages_json = excluded.messages_json, last_flush = excluded.last_flush",
        )
        .bind(&buffer.user_id)
        .bind(&messages_json)
        .bind(buffer.last_flush)
        .execute(&self.pool)
        .await
        .context("Failed to save message buffer")?;
        Ok(())
    }

    pub async fn list_buffers(&self) -> Result<Vec<MessageBuffer>> {
        let rows = sqlx::query("SELECT user_id, messages_json, last_flush FROM message_buffers")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query message buffers")?;

        Ok(rows
            .iter()
            .map(|row| {
                let raw: String = row.get("messages_json");
                let messages: Vec<BufferedMessage> = serde_json::from_str(&raw).unwrap_or_else(|e| {
                    tracing::warn!("Dropping unreadable message buffer: {}", e);
                    Vec::new()
                });
                MessageBuffer {
                    user_id: row.get("user_id"),
                    messages,
                    last_flush: row.get("last_flush"),
                }
            })
            .collect())
    }

    /// Remove profile, monitor and buffer of a user. Returns whether a
    /// profile existed.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let res = sqlx::query("DELETE FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete profile")?;
        sqlx::query("DELETE FROM monitors WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete monitor")?;
        sqlx::query("DELETE FROM message_buffers WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete message buffer")?;

        tx.commit().await.context("Failed to commit user deletion")?;
        Ok(res.rows_affected() > 0)
    }
}

fn json_list(row: &SqliteRow, column: &str) -> Vec<String> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("Malformed {} column: {}", column, e);
        Vec::new()
    })
}

fn profile_from_row(row: &SqliteRow) -> UserProfile {
    let message_count: i64 = row.get("message_count");
    UserProfile {
        user_id: row.get("user_id"),
        nickname: row.get("nickname"),
        profile_text: row.get("profile_text"),
        traits: json_list(row, "traits_json"),
        interests: json_list(row, "interests_json"),
        speaking_style: row.get("speaking_style"),
        emotional_tendency: row.get("emotional_tendency"),
        message_count: message_count.max(0) as u64,
        last_updated: row.get("last_updated"),
        created_at: row.get("created_at"),
    }
}
