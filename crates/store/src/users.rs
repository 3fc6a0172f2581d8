//! User identity — platform link resolution and token budget accounting.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::{PlatformLinkRow, UserRow};

/// Rolling budget window: the used-this-month counter resets this long
/// after `budget_reset_at`.
const BUDGET_WINDOW_DAYS: i64 = 30;

#[derive(Clone)]
pub struct UserRepo {
    pool: PgPool,
}

impl UserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve an external `(platform, platform_user_id)` to an internal
    /// user, creating the user and link on first sight.
    pub async fn resolve_or_create(
        &self,
        platform: &str,
        platform_user_id: &str,
        platform_username: Option<&str>,
        default_permission: &str,
    ) -> Result<UserRow> {
        let link = sqlx::query_as::<_, PlatformLinkRow>(
            "SELECT * FROM user_platform_links WHERE platform = $1 AND platform_user_id = $2",
        )
        .bind(platform)
        .bind(platform_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        if let Some(link) = link {
            return self.get(link.user_id).await;
        }

        let user_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;

        let user = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, permission_level) VALUES ($1, $2) RETURNING *",
        )
        .bind(user_id)
        .bind(default_permission)
        .fetch_one(&mut *tx)
        .await
        .map_err(from_sqlx)?;

        sqlx::query(
            "INSERT INTO user_platform_links \
             (id, user_id, platform, platform_user_id, platform_username) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(platform)
        .bind(platform_user_id)
        .bind(platform_username)
        .execute(&mut *tx)
        .await
        .map_err(from_sqlx)?;

        tx.commit().await.map_err(from_sqlx)?;

        tracing::info!(user_id = %user_id, platform, "created user on first message");
        Ok(user)
    }

    pub async fn get(&self, user_id: Uuid) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)
    }

    /// Look up the platform link for a user on a given platform.
    pub async fn platform_link(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Option<PlatformLinkRow>> {
        sqlx::query_as::<_, PlatformLinkRow>(
            "SELECT * FROM user_platform_links WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Reset the monthly counter when the rolling window has elapsed.
    /// Returns the user row after any reset.
    pub async fn maybe_reset_budget(&self, user: UserRow, now: DateTime<Utc>) -> Result<UserRow> {
        if !budget_window_elapsed(user.budget_reset_at, now) {
            return Ok(user);
        }
        sqlx::query_as::<_, UserRow>(
            "UPDATE users SET tokens_used_this_month = 0, budget_reset_at = $2 \
             WHERE id = $1 RETURNING *",
        )
        .bind(user.id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Add to the used-this-month counter after an LLM call.
    pub async fn add_token_usage(&self, user_id: Uuid, tokens: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET tokens_used_this_month = tokens_used_this_month + $2 WHERE id = $1",
        )
        .bind(user_id)
        .bind(tokens)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }
}

/// Whether the rolling budget window has elapsed.
pub fn budget_window_elapsed(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - reset_at >= Duration::days(BUDGET_WINDOW_DAYS)
}

/// Whether a user is over their monthly budget. Users without a budget
/// are never over.
pub fn over_budget(budget: Option<i64>, used: i64) -> bool {
    match budget {
        Some(limit) => used > limit,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_budget_is_never_over() {
        assert!(!over_budget(None, i64::MAX));
    }

    #[test]
    fn over_budget_is_strict() {
        assert!(!over_budget(Some(1000), 1000));
        assert!(over_budget(Some(1000), 1001));
    }

    #[test]
    fn budget_window() {
        let reset = Utc::now();
        assert!(!budget_window_elapsed(reset, reset + Duration::days(29)));
        assert!(budget_window_elapsed(reset, reset + Duration::days(30)));
    }
}
