//! Persona resolution — scope-specific defaults with graceful fallback.

use sqlx::PgPool;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::PersonaRow;

#[derive(Clone)]
pub struct PersonaRepo {
    pool: PgPool,
}

impl PersonaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the persona for a `(platform, platform_server_id)` scope.
    ///
    /// Resolution order: exact scope default → platform default →
    /// global default. Returns `None` when nothing is configured; the
    /// caller falls back to the built-in persona.
    pub async fn resolve(
        &self,
        platform: &str,
        platform_server_id: Option<&str>,
    ) -> Result<Option<PersonaRow>> {
        if let Some(server_id) = platform_server_id {
            let scoped = sqlx::query_as::<_, PersonaRow>(
                "SELECT * FROM personas \
                 WHERE is_default AND platform = $1 AND platform_server_id = $2 \
                 LIMIT 1",
            )
            .bind(platform)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
            if scoped.is_some() {
                return Ok(scoped);
            }
        }

        let platform_default = sqlx::query_as::<_, PersonaRow>(
            "SELECT * FROM personas \
             WHERE is_default AND platform = $1 AND platform_server_id IS NULL \
             LIMIT 1",
        )
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        if platform_default.is_some() {
            return Ok(platform_default);
        }

        sqlx::query_as::<_, PersonaRow>(
            "SELECT * FROM personas \
             WHERE is_default AND platform IS NULL AND platform_server_id IS NULL \
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)
    }
}
