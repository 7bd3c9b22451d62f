//! Push notification gateway

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{config::NotificationConfig, errors::HarborError};

/// A notification addressed to one or more device tokens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tokens: Vec<String>,
}

/// Delivery contract of the push notification service
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), HarborError>;
}

/// Send and swallow failures. A notification never fails its caller.
pub async fn notify_best_effort(gateway: &dyn NotificationGateway, notification: Notification) {
    if notification.tokens.iter().all(|t| t.is_empty()) {
        debug!("Skipping notification {:?}: no device token", notification.title);
        return;
    }

    if let Err(e) = gateway.send(&notification).await {
        warn!("Failed to send notification {:?}: {}", notification.title, e);
    }
}

/// HTTP gateway posting `{title, body, tokens}` as JSON
pub struct HttpNotificationGateway {
    client: reqwest::Client,
    url: String,
    server_key: Option<String>,
}

impl HttpNotificationGateway {
    pub fn new(url: String, server_key: Option<String>) -> Result<Self, HarborError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url,
            server_key,
        })
    }
}

#[async_trait]
impl NotificationGateway for HttpNotificationGateway {
    async fn send(&self, notification: &Notification) -> Result<(), HarborError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(key) = &self.server_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(HarborError::Upstream {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Gateway used when no notification endpoint is configured
pub struct DisabledNotifications;

#[async_trait]
impl NotificationGateway for DisabledNotifications {
    async fn send(&self, notification: &Notification) -> Result<(), HarborError> {
        debug!("Notifications disabled, dropping {:?}", notification.title);
        Ok(())
    }
}

/// Pick the gateway matching the configuration
pub fn from_config(
    config: &NotificationConfig,
) -> Result<Box<dyn NotificationGateway>, HarborError> {
    match &config.url {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(HttpNotificationGateway::new(
            url.clone(),
            config.server_key.clone(),
        )?)),
        _ => Ok(Box::new(DisabledNotifications)),
    }
}
