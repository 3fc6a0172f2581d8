//! Append-only token log, one row per LLM call.

use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::TokenLogRow;

#[derive(Clone)]
pub struct TokenLogRepo {
    pool: PgPool,
}

impl TokenLogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        model: &str,
        input_tokens: i32,
        output_tokens: i32,
        cost_estimate: f64,
    ) -> Result<TokenLogRow> {
        sqlx::query_as::<_, TokenLogRow>(
            "INSERT INTO token_logs \
             (id, user_id, conversation_id, model, input_tokens, output_tokens, cost_estimate) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(conversation_id)
        .bind(model)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost_estimate)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }
}
