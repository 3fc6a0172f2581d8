//! Pub/sub bus and short-TTL cache, backed by Redis.
//!
//! Notifications fan out on `notifications:<platform>` channels with
//! at-least-once semantics — subscribers tolerate duplicates because the
//! payloads are informational. Cache keys carry explicit TTLs and every
//! miss is safe.

use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use ma_domain::error::{Error, Result};
use ma_domain::notification::Notification;

/// List the geofence worker pushes device-side waypoint deletions onto.
const WAYPOINT_CLEANUP_LIST: &str = "geofence:waypoint_cleanup";

fn from_redis(e: redis::RedisError) -> Error {
    Error::Cache(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared handle for publishing and cache access. Cheap to clone; the
/// underlying multiplexed connection is shared.
#[derive(Clone)]
pub struct Bus {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl Bus {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(from_redis)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(from_redis)?;
        Ok(Self { client, conn })
    }

    /// Publish a notification onto its platform channel.
    pub async fn publish_notification(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_string(notification)?;
        let channel = notification.channel();
        let mut conn = self.conn.clone();
        let _: () = conn.publish(&channel, payload).await.map_err(from_redis)?;
        tracing::debug!(channel = %channel, "notification published");
        Ok(())
    }

    // ── Cache ─────────────────────────────────────────────────────

    /// Store a JSON value under `key` with an explicit TTL.
    pub async fn cache_set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, payload, ttl_seconds)
            .await
            .map_err(from_redis)?;
        Ok(())
    }

    /// Fetch a JSON value. `None` on miss; an undecodable value is
    /// treated as a miss (and logged) rather than an error.
    pub async fn cache_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(from_redis)?;
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    // ── Device-side cleanup queue ─────────────────────────────────

    /// Queue deletion of an external waypoint tied to a finished reminder.
    pub async fn queue_waypoint_cleanup(&self, user_id: Uuid, external_rid: &str) -> Result<()> {
        let entry = serde_json::json!({
            "user_id": user_id,
            "external_rid": external_rid,
        });
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(WAYPOINT_CLEANUP_LIST, entry.to_string())
            .await
            .map_err(from_redis)?;
        Ok(())
    }

    // ── Subscriptions ─────────────────────────────────────────────

    /// Open a dedicated pub/sub connection subscribed to the given
    /// platforms' notification channels.
    pub async fn subscribe_notifications(&self, platforms: &[String]) -> Result<Subscriber> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(from_redis)?;
        for platform in platforms {
            let channel = ma_domain::notification::notifications_channel(platform);
            pubsub.subscribe(&channel).await.map_err(from_redis)?;
            tracing::info!(channel = %channel, "subscribed");
        }
        Ok(Subscriber { pubsub })
    }
}

/// A dedicated subscription connection.
pub struct Subscriber {
    pubsub: redis::aio::PubSub,
}

impl Subscriber {
    /// Wait for the next notification. Returns `None` when the
    /// connection closes; undecodable payloads are skipped.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        loop {
            let msg = self.pubsub.on_message().next().await?;
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping non-text bus message");
                    continue;
                }
            };
            match serde_json::from_str::<Notification>(&payload) {
                Ok(n) => return Some(n),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable notification");
                    continue;
                }
            }
        }
    }
}
