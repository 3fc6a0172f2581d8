//! Row types and lifecycle enums for the durable store.
//!
//! Lifecycle columns are stored as plain text; the enums here are the
//! single source of truth for the allowed values and terminal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use ma_domain::permission::PermissionLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scheduled job lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Active)
    }
}

/// Location reminder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Active,
    Triggered,
    Cancelled,
    Expired,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Active => "active",
            ReminderStatus::Triggered => "triggered",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Expired => "expired",
        }
    }
}

/// What a completed scheduler job does besides notifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnComplete {
    Notify,
    ResumeConversation,
}

impl OnComplete {
    pub fn parse_lenient(s: &str) -> Self {
        if s == "resume_conversation" {
            OnComplete::ResumeConversation
        } else {
            OnComplete::Notify
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub permission_level: String,
    pub token_budget_monthly: Option<i64>,
    pub tokens_used_this_month: i64,
    pub budget_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn permission(&self) -> PermissionLevel {
        PermissionLevel::parse_lenient(&self.permission_level)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PlatformLinkRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PersonaRow {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub platform: Option<String>,
    pub platform_server_id: Option<String>,
    pub allowed_modules: serde_json::Value,
    pub default_model: Option<String>,
    pub max_tokens_per_request: i32,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PersonaRow {
    /// The persona's module allow-list. Malformed entries are dropped.
    pub fn allowed_modules(&self) -> Vec<String> {
        self.allowed_modules
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub persona_id: Option<Uuid>,
    pub platform: String,
    pub platform_channel_id: String,
    pub platform_thread_id: Option<String>,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_summarized: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub token_count: Option<i32>,
    pub model_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MemorySummaryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub summary: String,
    pub embedding: Option<pgvector::Vector>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenLogRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_estimate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledJobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub platform: Option<String>,
    pub platform_channel_id: Option<String>,
    pub platform_thread_id: Option<String>,
    pub job_type: String,
    pub check_config: serde_json::Value,
    pub interval_seconds: i32,
    pub max_attempts: i32,
    pub max_runs: Option<i32>,
    pub attempts: i32,
    pub runs_completed: i32,
    pub consecutive_failures: i32,
    pub on_success_message: String,
    pub on_failure_message: Option<String>,
    pub on_complete: String,
    pub workflow_id: Option<Uuid>,
    pub workflow_step: Option<i32>,
    pub status: String,
    pub next_run_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScheduledJobRow {
    pub fn on_complete(&self) -> OnComplete {
        OnComplete::parse_lenient(&self.on_complete)
    }

    /// Routing triple for the notification path, when persisted.
    pub fn routing(&self) -> Option<(&str, &str, Option<&str>)> {
        match (self.platform.as_deref(), self.platform_channel_id.as_deref()) {
            (Some(p), Some(c)) => Some((p, c, self.platform_thread_id.as_deref())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledWorkflowRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LocationReminderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub message: String,
    pub place_name: String,
    pub place_lat: f64,
    pub place_lng: f64,
    pub radius_m: i32,
    pub trigger_on: String,
    pub mode: String,
    pub cooldown_seconds: i32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub was_inside: bool,
    pub external_rid: Option<String>,
    pub synced_to_device: bool,
    pub platform: Option<String>,
    pub platform_channel_id: Option<String>,
    pub platform_thread_id: Option<String>,
    pub status: String,
    pub trigger_count: i32,
    pub triggered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LocationReminderRow {
    /// Routing triple for the notification path, when persisted.
    pub fn routing(&self) -> Option<(&str, &str, Option<&str>)> {
        match (self.platform.as_deref(), self.platform_channel_id.as_deref()) {
            (Some(p), Some(c)) => Some((p, c, self.platform_thread_id.as_deref())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserLocationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading: Option<f64>,
    pub source: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserNamedPlaceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserCredentialRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service: String,
    pub credential_key: String,
    pub encrypted_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Active.is_terminal());
        for s in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled, JobStatus::Expired] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn on_complete_parses_leniently() {
        assert_eq!(OnComplete::parse_lenient("resume_conversation"), OnComplete::ResumeConversation);
        assert_eq!(OnComplete::parse_lenient("notify"), OnComplete::Notify);
        assert_eq!(OnComplete::parse_lenient("bogus"), OnComplete::Notify);
    }

    #[test]
    fn persona_allowed_modules_drops_non_strings() {
        let p = PersonaRow {
            id: Uuid::new_v4(),
            name: "default".into(),
            system_prompt: String::new(),
            platform: None,
            platform_server_id: None,
            allowed_modules: serde_json::json!(["research", 42, "location"]),
            default_model: None,
            max_tokens_per_request: 4000,
            is_default: true,
            created_at: Utc::now(),
        };
        assert_eq!(p.allowed_modules(), vec!["research", "location"]);
    }

    #[test]
    fn job_routing_requires_platform_and_channel() {
        let mut job = ScheduledJobRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            conversation_id: None,
            platform: Some("discord".into()),
            platform_channel_id: None,
            platform_thread_id: None,
            job_type: "delay".into(),
            check_config: serde_json::json!({}),
            interval_seconds: 30,
            max_attempts: 3,
            max_runs: None,
            attempts: 0,
            runs_completed: 0,
            consecutive_failures: 0,
            on_success_message: "done".into(),
            on_failure_message: None,
            on_complete: "notify".into(),
            workflow_id: None,
            workflow_step: None,
            status: "active".into(),
            next_run_at: Utc::now(),
            expires_at: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        assert!(job.routing().is_none());
        job.platform_channel_id = Some("c1".into());
        assert_eq!(job.routing().unwrap().0, "discord");
    }
}
