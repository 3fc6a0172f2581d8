//! Delivery router — consumes the notification bus and pushes each
//! message to its platform adapter.
//!
//! There is no retry queue: the durable row behind the notification is
//! the source of truth, so a failed delivery is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ma_bus::Bus;
use ma_domain::config::Config;
use ma_domain::notification::Notification;

pub struct DeliveryRouter {
    bus: Bus,
    push_urls: HashMap<String, String>,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl DeliveryRouter {
    pub fn new(bus: Bus, config: Arc<Config>) -> ma_domain::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| ma_domain::Error::Http(e.to_string()))?;
        Ok(Self {
            bus,
            push_urls: config.adapter_push_urls.clone(),
            auth_token: config.service_auth_token.clone(),
            http,
        })
    }

    /// Subscribe to every configured platform and route until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.push_urls.is_empty() {
            tracing::info!("no adapter push URLs configured, delivery router idle");
            cancel.cancelled().await;
            return;
        }

        let platforms: Vec<String> = self.push_urls.keys().cloned().collect();
        loop {
            let mut subscriber = match self.bus.subscribe_notifications(&platforms).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "bus subscription failed, retrying in 5s");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => continue,
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("delivery router stopping");
                        return;
                    }
                    next = subscriber.next_notification() => match next {
                        Some(notification) => self.deliver(notification).await,
                        None => {
                            tracing::warn!("bus subscription closed, resubscribing");
                            break;
                        }
                    },
                }
            }
        }
    }

    /// Push one notification to its platform adapter.
    async fn deliver(&self, notification: Notification) {
        let Some(url) = self.push_urls.get(&notification.platform) else {
            tracing::warn!(platform = %notification.platform, "no adapter for platform, dropping");
            return;
        };

        let mut request = self.http.post(url).json(&notification);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(
                    platform = %notification.platform,
                    channel = %notification.platform_channel_id,
                    "notification delivered"
                );
            }
            Ok(resp) => {
                tracing::warn!(
                    platform = %notification.platform,
                    status = resp.status().as_u16(),
                    "adapter rejected notification, dropping"
                );
            }
            Err(e) => {
                tracing::warn!(
                    platform = %notification.platform,
                    error = %e,
                    "notification delivery failed, dropping"
                );
            }
        }
    }
}
