//! Memory summaries with embedding vectors for semantic recall.

use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::MemorySummaryRow;

#[derive(Clone)]
pub struct MemoryRepo {
    pool: PgPool,
}

impl MemoryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a summary. `embedding` is nullable — an embedding failure
    /// is non-fatal and the summary is still recallable by recency.
    pub async fn insert(
        &self,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        summary: &str,
        embedding: Option<Vector>,
    ) -> Result<MemorySummaryRow> {
        sqlx::query_as::<_, MemorySummaryRow>(
            "INSERT INTO memory_summaries (id, user_id, conversation_id, summary, embedding) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(conversation_id)
        .bind(summary)
        .bind(embedding)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Up to `limit` summaries for the user, ordered by ascending cosine
    /// distance to the query embedding. Rows without an embedding are
    /// excluded.
    pub async fn nearest(
        &self,
        user_id: Uuid,
        query_embedding: Vector,
        limit: i64,
    ) -> Result<Vec<MemorySummaryRow>> {
        sqlx::query_as::<_, MemorySummaryRow>(
            "SELECT * FROM memory_summaries \
             WHERE user_id = $1 AND embedding IS NOT NULL \
             ORDER BY embedding <=> $2 LIMIT $3",
        )
        .bind(user_id)
        .bind(query_embedding)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Most recent summaries — the fallback when embedding the query fails.
    pub async fn recent(&self, user_id: Uuid, limit: i64) -> Result<Vec<MemorySummaryRow>> {
        sqlx::query_as::<_, MemorySummaryRow>(
            "SELECT * FROM memory_summaries WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }
}
