//! Scheduled jobs and workflows — claiming, lifecycle transitions, expiry.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;
use crate::models::{ScheduledJobRow, ScheduledWorkflowRow};

#[derive(Clone)]
pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim due jobs for this tick.
    ///
    /// Increments `attempts` and advances `next_run_at` in the same
    /// statement that selects the batch. `FOR UPDATE SKIP LOCKED` makes
    /// each job claimable by at most one worker per due tick; ordering is
    /// `next_run_at` within a worker.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<ScheduledJobRow>> {
        sqlx::query_as::<_, ScheduledJobRow>(
            "UPDATE scheduled_jobs j \
             SET attempts = j.attempts + 1, \
                 next_run_at = $1 + make_interval(secs => j.interval_seconds) \
             FROM (SELECT id FROM scheduled_jobs \
                   WHERE status = 'active' AND next_run_at <= $1 \
                   ORDER BY next_run_at LIMIT $2 \
                   FOR UPDATE SKIP LOCKED) due \
             WHERE j.id = due.id \
             RETURNING j.*",
        )
        .bind(now)
        .bind(batch)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    pub async fn get(&self, id: Uuid) -> Result<ScheduledJobRow> {
        sqlx::query_as::<_, ScheduledJobRow>("SELECT * FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)
    }

    /// Terminal transition: completed, failed, cancelled, or expired.
    pub async fn finish(&self, id: Uuid, status: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_jobs SET status = $2, completed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// A successful check on a recurring job: count the run, clear the
    /// failure streak, stay active.
    pub async fn record_recurring_success(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_jobs \
             SET runs_completed = runs_completed + 1, consecutive_failures = 0 \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// A failed check that has attempts left.
    pub async fn record_failure(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_jobs \
             SET consecutive_failures = consecutive_failures + 1 \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Expiry sweep: active jobs past `expires_at` become `expired`.
    /// Returns the rows so the worker can emit failure notifications.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJobRow>> {
        sqlx::query_as::<_, ScheduledJobRow>(
            "UPDATE scheduled_jobs \
             SET status = 'expired', completed_at = $1 \
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1 \
             RETURNING *",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    // ── Workflows ─────────────────────────────────────────────────

    pub async fn workflow(&self, id: Uuid) -> Result<ScheduledWorkflowRow> {
        sqlx::query_as::<_, ScheduledWorkflowRow>(
            "SELECT * FROM scheduled_workflows WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Number of jobs in the workflow still in a non-terminal state.
    pub async fn active_jobs_in_workflow(&self, workflow_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM scheduled_jobs \
             WHERE workflow_id = $1 AND status = 'active'",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(count)
    }

    pub async fn finish_workflow(
        &self,
        workflow_id: Uuid,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_workflows SET status = $2, completed_at = $3 \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(workflow_id)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Cancel the remaining active jobs of a failed workflow.
    pub async fn cancel_workflow_jobs(&self, workflow_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = 'cancelled', completed_at = $2 \
             WHERE workflow_id = $1 AND status = 'active'",
        )
        .bind(workflow_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(result.rows_affected())
    }
}
