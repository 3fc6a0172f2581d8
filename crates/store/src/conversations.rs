//! Conversations and their ordered message log.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::{ConversationRow, MessageRow};

#[derive(Clone)]
pub struct ConversationRepo {
    pool: PgPool,
}

impl ConversationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent unsummarized conversation for the routing tuple that
    /// was active within the inactivity window.
    pub async fn find_active(
        &self,
        user_id: Uuid,
        platform: &str,
        platform_channel_id: &str,
        platform_thread_id: Option<&str>,
        inactivity_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ConversationRow>> {
        let cutoff = now - Duration::minutes(inactivity_minutes);
        sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations \
             WHERE user_id = $1 AND platform = $2 AND platform_channel_id = $3 \
               AND platform_thread_id IS NOT DISTINCT FROM $4 \
               AND NOT is_summarized AND last_active_at >= $5 \
             ORDER BY last_active_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(platform)
        .bind(platform_channel_id)
        .bind(platform_thread_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    pub async fn insert(
        &self,
        user_id: Uuid,
        persona_id: Option<Uuid>,
        platform: &str,
        platform_channel_id: &str,
        platform_thread_id: Option<&str>,
    ) -> Result<ConversationRow> {
        sqlx::query_as::<_, ConversationRow>(
            "INSERT INTO conversations \
             (id, user_id, persona_id, platform, platform_channel_id, platform_thread_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(persona_id)
        .bind(platform)
        .bind(platform_channel_id)
        .bind(platform_thread_id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    pub async fn touch(&self, conversation_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE conversations SET last_active_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    /// Insert a message and advance the conversation's `last_active_at`.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: &str,
        token_count: Option<i32>,
        model_used: Option<&str>,
    ) -> Result<MessageRow> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;

        let msg = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages \
             (id, conversation_id, role, content, token_count, model_used, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(token_count)
        .bind(model_used)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(from_sqlx)?;

        sqlx::query("UPDATE conversations SET last_active_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(from_sqlx)?;

        tx.commit().await.map_err(from_sqlx)?;
        Ok(msg)
    }

    /// All messages in insertion order.
    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE conversation_id = $1 ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Unsummarized conversations idle since before `cutoff`, oldest first.
    pub async fn stale_unsummarized(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ConversationRow>> {
        sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations \
             WHERE NOT is_summarized AND last_active_at < $1 \
             ORDER BY last_active_at LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Summarization is terminal; the row is frozen afterwards.
    pub async fn mark_summarized(&self, conversation_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE conversations SET is_summarized = TRUE WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }
}
