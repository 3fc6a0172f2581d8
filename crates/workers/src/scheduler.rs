//! Scheduler worker — evaluates due jobs, publishes notifications, and
//! advances or chains workflows.
//!
//! Each tick claims a bounded batch of due jobs (the claiming update
//! increments `attempts` and advances `next_run_at` atomically), runs
//! the per-type check, and applies the planned transition. Transition
//! rules live in pure functions so the boundary behaviors are unit
//! tested without a database.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use ma_bus::Bus;
use ma_domain::config::Config;
use ma_domain::error::Result;
use ma_domain::message::IncomingMessage;
use ma_domain::notification::Notification;
use ma_domain::tool::{ToolCall, ToolResult};
use ma_registry::ModuleRegistry;
use ma_store::jobs::JobRepo;
use ma_store::models::{OnComplete, ScheduledJobRow};
use ma_store::users::UserRepo;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Check configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `poll_module`: dispatch a tool and test a predicate over its result.
#[derive(Debug, Deserialize)]
pub struct PollModuleCheck {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Dot-separated path into the tool result, e.g. `"status.phase"`.
    #[serde(default)]
    pub result_path: Option<String>,
    /// Expected value at `result_path`. Absent means "tool success is
    /// enough".
    #[serde(default)]
    pub expected: Option<serde_json::Value>,
}

/// `poll_url`: GET a URL and test status (and optionally the body).
#[derive(Debug, Deserialize)]
pub struct PollUrlCheck {
    pub url: String,
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub body_contains: Option<String>,
}

/// `delay`: a fixed wait measured in claim attempts.
#[derive(Debug, Deserialize)]
pub struct DelayCheck {
    pub wait_attempts: i32,
}

/// Walk a dot-separated path into a JSON value.
pub fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Whether a `poll_module` check passed for a tool result.
pub fn module_check_satisfied(result: &ToolResult, check: &PollModuleCheck) -> bool {
    if !result.success {
        return false;
    }
    let (Some(path), Some(expected)) = (&check.result_path, &check.expected) else {
        return true;
    };
    let Some(payload) = &result.result else {
        return false;
    };
    json_path(payload, path) == Some(expected)
}

/// Whether a `poll_url` check passed for a response.
pub fn url_check_satisfied(status: u16, body: &str, check: &PollUrlCheck) -> bool {
    let status_ok = match check.expected_status {
        Some(expected) => status == expected,
        None => (200..300).contains(&status),
    };
    if !status_ok {
        return false;
    }
    match &check.body_contains {
        Some(needle) => body.contains(needle),
        None => true,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition planning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPlan {
    /// Terminal: the job completed (no `max_runs`, or this run reaches it).
    Complete,
    /// Count the run and stay active for the next interval.
    Recur,
}

pub fn plan_success(max_runs: Option<i32>, runs_completed: i32) -> SuccessPlan {
    match max_runs {
        None => SuccessPlan::Complete,
        Some(max) if runs_completed + 1 >= max => SuccessPlan::Complete,
        Some(_) => SuccessPlan::Recur,
    }
}

/// Whether a failed check exhausts the job's attempts.
pub fn failure_exhausted(attempts: i32, max_attempts: i32) -> bool {
    attempts >= max_attempts
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SchedulerWorker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SchedulerWorker {
    jobs: JobRepo,
    users: UserRepo,
    registry: Arc<ModuleRegistry>,
    bus: Bus,
    http: reqwest::Client,
    config: Arc<Config>,
}

enum CheckOutcome {
    Success,
    Failure(String),
}

impl SchedulerWorker {
    pub fn new(
        jobs: JobRepo,
        users: UserRepo,
        registry: Arc<ModuleRegistry>,
        bus: Bus,
        config: Arc<Config>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ma_domain::Error::Http(e.to_string()))?;
        Ok(Self { jobs, users, registry, bus, http, config })
    }

    /// One tick: expire overdue jobs, then claim and run due checks.
    pub async fn tick(&self) {
        let now = Utc::now();

        // ── Expiry sweep ──────────────────────────────────────────
        match self.jobs.expire_due(now).await {
            Ok(expired) => {
                for job in expired {
                    tracing::info!(job_id = %job.id, "job expired");
                    self.notify_failure(&job, "expired before its condition was met").await;
                    if let Some(workflow_id) = job.workflow_id {
                        self.fail_workflow(workflow_id, now).await;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
        }

        // ── Claim and run due jobs ────────────────────────────────
        let claimed = match self
            .jobs
            .claim_due(now, self.config.scheduler_batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "job claim failed");
                return;
            }
        };

        for job in claimed {
            let outcome = self.run_check(&job).await;
            if let Err(e) = self.apply_outcome(&job, outcome, now).await {
                tracing::error!(job_id = %job.id, error = %e, "job transition failed");
            }
        }
    }

    // ── Check execution ───────────────────────────────────────────

    async fn run_check(&self, job: &ScheduledJobRow) -> CheckOutcome {
        match job.job_type.as_str() {
            "poll_module" => self.run_module_check(job).await,
            "poll_url" => self.run_url_check(job).await,
            "delay" => match serde_json::from_value::<DelayCheck>(job.check_config.clone()) {
                Ok(check) => {
                    if job.attempts >= check.wait_attempts {
                        CheckOutcome::Success
                    } else {
                        CheckOutcome::Failure("still waiting".into())
                    }
                }
                Err(e) => CheckOutcome::Failure(format!("invalid delay config: {e}")),
            },
            other => CheckOutcome::Failure(format!("unknown job_type: {other}")),
        }
    }

    async fn run_module_check(&self, job: &ScheduledJobRow) -> CheckOutcome {
        let check = match serde_json::from_value::<PollModuleCheck>(job.check_config.clone()) {
            Ok(c) => c,
            Err(e) => return CheckOutcome::Failure(format!("invalid poll_module config: {e}")),
        };
        let call = ToolCall {
            tool_name: check.tool_name.clone(),
            arguments: if check.arguments.is_object() {
                check.arguments.clone()
            } else {
                serde_json::Value::Object(Default::default())
            },
            tool_use_id: format!("job-{}-{}", job.id, job.attempts),
        };
        let result = self.registry.execute(&call, Some(job.user_id)).await;
        if module_check_satisfied(&result, &check) {
            CheckOutcome::Success
        } else {
            CheckOutcome::Failure(
                result
                    .error
                    .unwrap_or_else(|| "predicate not satisfied".into()),
            )
        }
    }

    async fn run_url_check(&self, job: &ScheduledJobRow) -> CheckOutcome {
        let check = match serde_json::from_value::<PollUrlCheck>(job.check_config.clone()) {
            Ok(c) => c,
            Err(e) => return CheckOutcome::Failure(format!("invalid poll_url config: {e}")),
        };
        match self.http.get(&check.url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                if url_check_satisfied(status, &body, &check) {
                    CheckOutcome::Success
                } else {
                    CheckOutcome::Failure(format!("HTTP {status} did not satisfy check"))
                }
            }
            Err(e) => CheckOutcome::Failure(format!("request failed: {e}")),
        }
    }

    // ── Transitions ───────────────────────────────────────────────

    async fn apply_outcome(
        &self,
        job: &ScheduledJobRow,
        outcome: CheckOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match outcome {
            CheckOutcome::Success => {
                tracing::info!(job_id = %job.id, attempts = job.attempts, "job check succeeded");
                self.notify_success(job).await;

                match plan_success(job.max_runs, job.runs_completed) {
                    SuccessPlan::Complete => {
                        self.jobs.finish(job.id, "completed", now).await?;
                        if let Some(workflow_id) = job.workflow_id {
                            if self.jobs.active_jobs_in_workflow(workflow_id).await? == 0 {
                                self.jobs
                                    .finish_workflow(workflow_id, "completed", now)
                                    .await?;
                                tracing::info!(workflow_id = %workflow_id, "workflow completed");
                            }
                        }
                    }
                    SuccessPlan::Recur => {
                        self.jobs.record_recurring_success(job.id).await?;
                    }
                }

                if job.on_complete() == OnComplete::ResumeConversation {
                    self.resume_conversation(job).await;
                }
            }
            CheckOutcome::Failure(reason) => {
                if failure_exhausted(job.attempts, job.max_attempts) {
                    tracing::warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        reason = %reason,
                        "job failed after exhausting attempts"
                    );
                    self.jobs.finish(job.id, "failed", now).await?;
                    if job.on_failure_message.is_some() {
                        self.notify_failure(job, &reason).await;
                    }
                    if let Some(workflow_id) = job.workflow_id {
                        self.fail_workflow(workflow_id, now).await;
                    }
                } else {
                    tracing::debug!(job_id = %job.id, attempts = job.attempts, reason = %reason, "job check failed, will retry");
                    self.jobs.record_failure(job.id).await?;
                }
            }
        }
        Ok(())
    }

    /// A job failing mid-workflow fails the workflow and cancels its
    /// remaining jobs.
    async fn fail_workflow(&self, workflow_id: Uuid, now: DateTime<Utc>) {
        if let Err(e) = self.jobs.finish_workflow(workflow_id, "failed", now).await {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "workflow fail transition failed");
            return;
        }
        match self.jobs.cancel_workflow_jobs(workflow_id, now).await {
            Ok(cancelled) if cancelled > 0 => {
                tracing::info!(workflow_id = %workflow_id, cancelled, "cancelled remaining workflow jobs");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(workflow_id = %workflow_id, error = %e, "workflow job cancellation failed");
            }
        }
    }

    // ── Notifications & resume ────────────────────────────────────

    async fn notify_success(&self, job: &ScheduledJobRow) {
        self.publish(job, job.on_success_message.clone()).await;
    }

    async fn notify_failure(&self, job: &ScheduledJobRow, reason: &str) {
        let content = job
            .on_failure_message
            .clone()
            .unwrap_or_else(|| format!("A scheduled check gave up: {reason}"));
        self.publish(job, content).await;
    }

    async fn publish(&self, job: &ScheduledJobRow, content: String) {
        let Some((platform, channel, thread)) = job.routing() else {
            tracing::warn!(job_id = %job.id, "job has no routing fields, notification dropped");
            return;
        };
        let notification = Notification {
            platform: platform.to_string(),
            platform_channel_id: channel.to_string(),
            platform_thread_id: thread.map(String::from),
            content,
            user_id: Some(job.user_id),
            job_id: Some(job.id),
        };
        if let Err(e) = self.bus.publish_notification(&notification).await {
            tracing::warn!(job_id = %job.id, error = %e, "notification publish failed");
        }
    }

    /// Turn a completed job back into an agent-loop turn by re-entering
    /// the orchestrator ingress with the stored routing.
    async fn resume_conversation(&self, job: &ScheduledJobRow) {
        let Some((platform, channel, thread)) = job.routing() else {
            tracing::warn!(job_id = %job.id, "resume requested but job has no routing");
            return;
        };
        let link = match self.users.platform_link(job.user_id, platform).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                tracing::warn!(job_id = %job.id, "resume requested but user has no platform link");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "platform link lookup failed");
                return;
            }
        };

        let message = IncomingMessage {
            platform: platform.to_string(),
            platform_user_id: link.platform_user_id,
            platform_username: link.platform_username,
            platform_channel_id: channel.to_string(),
            platform_thread_id: thread.map(String::from),
            platform_server_id: None,
            content: format!(
                "(a scheduled check just finished) {}",
                job.on_success_message
            ),
            attachments: Vec::new(),
        };

        let mut request = self
            .http
            .post(format!("{}/message", self.config.orchestrator_url))
            .json(&message);
        if let Some(token) = &self.config.service_auth_token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(job_id = %job.id, "conversation resumed");
            }
            Ok(resp) => {
                tracing::warn!(job_id = %job.id, status = resp.status().as_u16(), "resume returned an error status");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "resume request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_without_max_runs_is_one_shot() {
        assert_eq!(plan_success(None, 0), SuccessPlan::Complete);
        assert_eq!(plan_success(None, 5), SuccessPlan::Complete);
    }

    #[test]
    fn plan_recurs_until_max_runs() {
        assert_eq!(plan_success(Some(3), 0), SuccessPlan::Recur);
        assert_eq!(plan_success(Some(3), 1), SuccessPlan::Recur);
        assert_eq!(plan_success(Some(3), 2), SuccessPlan::Complete);
    }

    #[test]
    fn failure_exhaustion_boundary() {
        // A job claimed with attempts = max_attempts - 1 arrives here
        // with attempts = max_attempts after the claiming increment.
        assert!(!failure_exhausted(2, 3));
        assert!(failure_exhausted(3, 3));
        assert!(failure_exhausted(4, 3));
    }

    #[test]
    fn json_path_walks_nested_objects() {
        let v = serde_json::json!({"status": {"phase": "done", "code": 0}});
        assert_eq!(json_path(&v, "status.phase"), Some(&serde_json::json!("done")));
        assert!(json_path(&v, "status.missing").is_none());
        assert!(json_path(&v, "nope").is_none());
    }

    #[test]
    fn module_check_requires_success() {
        let check = PollModuleCheck {
            tool_name: "git.check_pipeline".into(),
            arguments: serde_json::json!({}),
            result_path: None,
            expected: None,
        };
        let failed = ToolResult::err("git.check_pipeline", "boom");
        assert!(!module_check_satisfied(&failed, &check));
        let ok = ToolResult::ok("git.check_pipeline", serde_json::json!({"any": "thing"}));
        assert!(module_check_satisfied(&ok, &check));
    }

    #[test]
    fn module_check_predicate_over_result() {
        let check = PollModuleCheck {
            tool_name: "git.check_pipeline".into(),
            arguments: serde_json::json!({}),
            result_path: Some("status.phase".into()),
            expected: Some(serde_json::json!("done")),
        };
        let pending = ToolResult::ok("t", serde_json::json!({"status": {"phase": "running"}}));
        assert!(!module_check_satisfied(&pending, &check));
        let done = ToolResult::ok("t", serde_json::json!({"status": {"phase": "done"}}));
        assert!(module_check_satisfied(&done, &check));
    }

    #[test]
    fn url_check_defaults_to_2xx() {
        let check = PollUrlCheck { url: "http://x".into(), expected_status: None, body_contains: None };
        assert!(url_check_satisfied(200, "", &check));
        assert!(url_check_satisfied(204, "", &check));
        assert!(!url_check_satisfied(404, "", &check));
    }

    #[test]
    fn url_check_with_body_predicate() {
        let check = PollUrlCheck {
            url: "http://x".into(),
            expected_status: Some(200),
            body_contains: Some("\"state\":\"ready\"".into()),
        };
        assert!(!url_check_satisfied(200, "{\"state\":\"pending\"}", &check));
        assert!(url_check_satisfied(200, "{\"state\":\"ready\"}", &check));
        assert!(!url_check_satisfied(201, "{\"state\":\"ready\"}", &check));
    }

    #[test]
    fn delay_check_counts_attempts() {
        let check: DelayCheck =
            serde_json::from_value(serde_json::json!({"wait_attempts": 3})).unwrap();
        assert!(2 < check.wait_attempts);
        assert!(3 >= check.wait_attempts);
    }
}
