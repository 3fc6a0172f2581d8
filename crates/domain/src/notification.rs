//! Proactive notification wire format published on the bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proactive message for a user on a specific platform channel.
///
/// Published by the scheduler and geofence workers onto
/// `notifications:<platform>`; consumed by the delivery router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub platform: String,
    pub platform_channel_id: String,
    #[serde(default)]
    pub platform_thread_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

impl Notification {
    /// Bus channel this notification is published to.
    pub fn channel(&self) -> String {
        notifications_channel(&self.platform)
    }
}

/// Channel name for a platform's notification fan-out.
pub fn notifications_channel(platform: &str) -> String {
    format!("notifications:{platform}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let n = Notification {
            platform: "discord".into(),
            platform_channel_id: "123".into(),
            platform_thread_id: None,
            content: "done".into(),
            user_id: None,
            job_id: None,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["platform"], "discord");
        assert_eq!(json["platform_thread_id"], serde_json::Value::Null);
        assert_eq!(n.channel(), "notifications:discord");
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let n: Notification = serde_json::from_str(
            r#"{"platform":"slack","platform_channel_id":"C1","content":"hi"}"#,
        )
        .unwrap();
        assert!(n.user_id.is_none());
        assert!(n.job_id.is_none());
    }
}
