//! Geofence worker — distance checks over the latest known positions.
//!
//! Trigger evaluation is a pure function over the reminder row, the
//! computed distance, and the clock, so cooldown, expiry, and the
//! enter/exit transition rules are unit tested without a database.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use ma_bus::Bus;
use ma_domain::config::Config;
use ma_domain::geo::haversine_m;
use ma_domain::notification::Notification;
use ma_store::locations::LocationRepo;
use ma_store::models::{LocationReminderRow, UserLocationRow};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the worker should do with a reminder this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderAction {
    /// Nothing to do.
    Skip,
    /// Past `expires_at` — retire the reminder.
    Expire,
    /// Publish and transition per mode. `now_inside` is the new value
    /// of the remembered inside-bit.
    Trigger { now_inside: bool },
    /// No trigger, but the remembered inside-bit changed.
    UpdateInsideBit(bool),
}

/// Whether a location row is too old to act on.
pub fn location_is_stale(
    location: &UserLocationRow,
    now: DateTime<Utc>,
    stale_seconds: i64,
) -> bool {
    now - location.updated_at > Duration::seconds(stale_seconds)
}

/// Decide the action for one reminder given the current distance.
///
/// `enter` triggers on containment; `exit` triggers only on the
/// inside→outside transition tracked by the persisted `was_inside` bit.
/// Cooldown suppresses everything, including bit updates, so the next
/// evaluation after cooldown sees the pre-cooldown state.
pub fn evaluate(
    reminder: &LocationReminderRow,
    distance_m: f64,
    now: DateTime<Utc>,
) -> ReminderAction {
    if let Some(expires_at) = reminder.expires_at {
        if expires_at <= now {
            return ReminderAction::Expire;
        }
    }
    if let Some(cooldown_until) = reminder.cooldown_until {
        if cooldown_until > now {
            return ReminderAction::Skip;
        }
    }

    let inside = distance_m <= reminder.radius_m as f64;
    match reminder.trigger_on.as_str() {
        "exit" => {
            if reminder.was_inside && !inside {
                ReminderAction::Trigger { now_inside: false }
            } else if inside != reminder.was_inside {
                ReminderAction::UpdateInsideBit(inside)
            } else {
                ReminderAction::Skip
            }
        }
        // "enter" and anything unrecognized: containment triggers.
        _ => {
            if inside {
                ReminderAction::Trigger { now_inside: true }
            } else if reminder.was_inside {
                ReminderAction::UpdateInsideBit(false)
            } else {
                ReminderAction::Skip
            }
        }
    }
}

/// Notification text for a trigger.
pub fn trigger_content(reminder: &LocationReminderRow) -> String {
    if reminder.trigger_on == "exit" {
        format!(
            "You've left **{}**.\n\nReminder: {}",
            reminder.place_name, reminder.message
        )
    } else {
        format!(
            "You're near **{}**!\n\nReminder: {}",
            reminder.place_name, reminder.message
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GeofenceWorker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GeofenceWorker {
    locations: LocationRepo,
    bus: Bus,
    config: Arc<Config>,
}

impl GeofenceWorker {
    pub fn new(locations: LocationRepo, bus: Bus, config: Arc<Config>) -> Self {
        Self { locations, bus, config }
    }

    /// One pass over all active reminders, grouped by user.
    pub async fn tick(&self) {
        let now = Utc::now();
        let reminders = match self.locations.active_reminders().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "active reminder query failed");
                return;
            }
        };
        if reminders.is_empty() {
            return;
        }

        let mut by_user: HashMap<Uuid, Vec<LocationReminderRow>> = HashMap::new();
        for r in reminders {
            by_user.entry(r.user_id).or_default().push(r);
        }

        for (user_id, user_reminders) in by_user {
            let location = match self.locations.latest_location(user_id).await {
                Ok(Some(loc)) => loc,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "location lookup failed");
                    continue;
                }
            };
            // A stale position suppresses all triggers for the user.
            if location_is_stale(&location, now, self.config.location_stale_seconds) {
                tracing::debug!(user_id = %user_id, "location stale, skipping user");
                continue;
            }

            for reminder in user_reminders {
                let distance = haversine_m(
                    location.latitude,
                    location.longitude,
                    reminder.place_lat,
                    reminder.place_lng,
                );
                let action = evaluate(&reminder, distance, now);
                if let Err(e) = self.apply(&reminder, action, distance, now).await {
                    tracing::error!(reminder_id = %reminder.id, error = %e, "reminder transition failed");
                }
            }
        }
    }

    async fn apply(
        &self,
        reminder: &LocationReminderRow,
        action: ReminderAction,
        distance_m: f64,
        now: DateTime<Utc>,
    ) -> ma_domain::Result<()> {
        match action {
            ReminderAction::Skip => Ok(()),
            ReminderAction::UpdateInsideBit(inside) => {
                self.locations.update_inside_bit(reminder.id, inside).await
            }
            ReminderAction::Expire => {
                self.locations.mark_expired(reminder.id).await?;
                self.queue_cleanup(reminder).await;
                tracing::info!(reminder_id = %reminder.id, "reminder expired");
                Ok(())
            }
            ReminderAction::Trigger { now_inside } => {
                self.publish_trigger(reminder).await;

                if reminder.mode == "persistent" {
                    let cooldown_until =
                        now + Duration::seconds(reminder.cooldown_seconds as i64);
                    self.locations
                        .record_persistent_trigger(reminder.id, cooldown_until, now_inside)
                        .await?;
                } else {
                    self.locations
                        .mark_triggered(reminder.id, now, now_inside)
                        .await?;
                    self.queue_cleanup(reminder).await;
                }

                tracing::info!(
                    reminder_id = %reminder.id,
                    user_id = %reminder.user_id,
                    distance_m,
                    mode = %reminder.mode,
                    "reminder triggered"
                );
                Ok(())
            }
        }
    }

    async fn publish_trigger(&self, reminder: &LocationReminderRow) {
        // The writer of the reminder is responsible for persisting the
        // routing; a reminder without it can only log.
        let Some((platform, channel, thread)) = reminder.routing() else {
            tracing::error!(
                reminder_id = %reminder.id,
                "reminder has no routing fields, notification dropped"
            );
            return;
        };
        let notification = Notification {
            platform: platform.to_string(),
            platform_channel_id: channel.to_string(),
            platform_thread_id: thread.map(String::from),
            content: trigger_content(reminder),
            user_id: Some(reminder.user_id),
            job_id: None,
        };
        if let Err(e) = self.bus.publish_notification(&notification).await {
            tracing::warn!(reminder_id = %reminder.id, error = %e, "trigger publish failed");
        }
    }

    /// Queue device-side deletion of the reminder's external waypoint.
    async fn queue_cleanup(&self, reminder: &LocationReminderRow) {
        let Some(rid) = &reminder.external_rid else { return };
        if let Err(e) = self.bus.queue_waypoint_cleanup(reminder.user_id, rid).await {
            tracing::warn!(reminder_id = %reminder.id, error = %e, "waypoint cleanup enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(trigger_on: &str, was_inside: bool) -> LocationReminderRow {
        LocationReminderRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            conversation_id: None,
            message: "buy milk".into(),
            place_name: "supermarket".into(),
            place_lat: 52.0,
            place_lng: 13.0,
            radius_m: 100,
            trigger_on: trigger_on.into(),
            mode: "once".into(),
            cooldown_seconds: 3600,
            cooldown_until: None,
            was_inside,
            external_rid: None,
            synced_to_device: false,
            platform: Some("discord".into()),
            platform_channel_id: Some("c1".into()),
            platform_thread_id: None,
            status: "active".into(),
            trigger_count: 0,
            triggered_at: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    fn location(updated_at: DateTime<Utc>) -> UserLocationRow {
        UserLocationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            latitude: 52.0,
            longitude: 13.0,
            accuracy_m: None,
            speed_mps: None,
            heading: None,
            source: "device".into(),
            updated_at,
            created_at: updated_at,
        }
    }

    #[test]
    fn enter_triggers_inside_radius() {
        let now = Utc::now();
        let r = reminder("enter", false);
        assert_eq!(evaluate(&r, 50.0, now), ReminderAction::Trigger { now_inside: true });
        assert_eq!(evaluate(&r, 100.0, now), ReminderAction::Trigger { now_inside: true });
        assert_eq!(evaluate(&r, 150.0, now), ReminderAction::Skip);
    }

    #[test]
    fn cooldown_suppresses_even_inside_radius() {
        let now = Utc::now();
        let mut r = reminder("enter", false);
        r.cooldown_until = Some(now + Duration::minutes(10));
        assert_eq!(evaluate(&r, 10.0, now), ReminderAction::Skip);
    }

    #[test]
    fn elapsed_cooldown_allows_trigger() {
        let now = Utc::now();
        let mut r = reminder("enter", true);
        r.cooldown_until = Some(now - Duration::seconds(1));
        assert_eq!(evaluate(&r, 10.0, now), ReminderAction::Trigger { now_inside: true });
    }

    #[test]
    fn expiry_beats_everything() {
        let now = Utc::now();
        let mut r = reminder("enter", false);
        r.expires_at = Some(now - Duration::seconds(1));
        r.cooldown_until = Some(now + Duration::minutes(10));
        assert_eq!(evaluate(&r, 10.0, now), ReminderAction::Expire);
    }

    #[test]
    fn exit_needs_inside_then_outside() {
        let now = Utc::now();
        // Never inside: walking around outside does nothing.
        let never_inside = reminder("exit", false);
        assert_eq!(evaluate(&never_inside, 500.0, now), ReminderAction::Skip);
        // Entering records the bit without triggering.
        assert_eq!(
            evaluate(&never_inside, 50.0, now),
            ReminderAction::UpdateInsideBit(true)
        );
        // Inside → outside triggers.
        let was_inside = reminder("exit", true);
        assert_eq!(
            evaluate(&was_inside, 500.0, now),
            ReminderAction::Trigger { now_inside: false }
        );
        // Still inside: nothing.
        assert_eq!(evaluate(&was_inside, 50.0, now), ReminderAction::Skip);
    }

    #[test]
    fn enter_clears_stale_inside_bit_when_leaving() {
        let now = Utc::now();
        let r = reminder("enter", true);
        assert_eq!(evaluate(&r, 500.0, now), ReminderAction::UpdateInsideBit(false));
    }

    #[test]
    fn staleness_threshold() {
        let now = Utc::now();
        let fresh = location(now - Duration::seconds(30));
        assert!(!location_is_stale(&fresh, now, 600));
        let stale = location(now - Duration::seconds(601));
        assert!(location_is_stale(&stale, now, 600));
    }

    #[test]
    fn trigger_content_mentions_place_and_message() {
        let enter = trigger_content(&reminder("enter", false));
        assert!(enter.contains("supermarket"));
        assert!(enter.contains("buy milk"));
        let exit = trigger_content(&reminder("exit", true));
        assert!(exit.contains("left"));
    }
}
