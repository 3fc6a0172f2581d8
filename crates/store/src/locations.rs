//! Geofence state — reminders, latest user positions, named places.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::{LocationReminderRow, UserLocationRow, UserNamedPlaceRow};

#[derive(Clone)]
pub struct LocationRepo {
    pool: PgPool,
}

impl LocationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All active reminders across users, for the worker tick.
    pub async fn active_reminders(&self) -> Result<Vec<LocationReminderRow>> {
        sqlx::query_as::<_, LocationReminderRow>(
            "SELECT * FROM location_reminders WHERE status = 'active' ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Latest known position for a user, if any.
    pub async fn latest_location(&self, user_id: Uuid) -> Result<Option<UserLocationRow>> {
        sqlx::query_as::<_, UserLocationRow>(
            "SELECT * FROM user_locations WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// One-shot trigger: terminal `triggered` state.
    pub async fn mark_triggered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        was_inside: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE location_reminders \
             SET status = 'triggered', triggered_at = $2, \
                 trigger_count = trigger_count + 1, was_inside = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .bind(was_inside)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Persistent trigger: cooldown starts, reminder stays active.
    pub async fn record_persistent_trigger(
        &self,
        id: Uuid,
        cooldown_until: DateTime<Utc>,
        was_inside: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE location_reminders \
             SET cooldown_until = $2, trigger_count = trigger_count + 1, was_inside = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(cooldown_until)
        .bind(was_inside)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Update only the remembered inside/outside bit.
    pub async fn update_inside_bit(&self, id: Uuid, was_inside: bool) -> Result<()> {
        sqlx::query("UPDATE location_reminders SET was_inside = $2 WHERE id = $1")
            .bind(id)
            .bind(was_inside)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    pub async fn mark_expired(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE location_reminders SET status = 'expired' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    /// Look up one of the user's saved named places.
    pub async fn named_place(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> Result<Option<UserNamedPlaceRow>> {
        sqlx::query_as::<_, UserNamedPlaceRow>(
            "SELECT * FROM user_named_places WHERE user_id = $1 AND lower(name) = lower($2)",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)
    }
}
