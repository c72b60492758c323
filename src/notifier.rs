use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::models::Notification;
use crate::notifications::push_data;

#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl From<&Notification> for PushNotification {
    fn from(notification: &Notification) -> Self {
        Self {
            notification_id: notification.id,
            user_id: notification.user_id,
            notification_type: notification.notification_type.clone(),
            title: notification.title.clone(),
            body: notification.content.clone(),
            data: push_data(&notification.data),
        }
    }
}

/// Delivers a stored notification to the user's devices.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, push: &PushNotification) -> Result<()>;
}

/// Posts each push as JSON to a gateway that owns device tokens.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build notification HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, push: &PushNotification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(push)
            .send()
            .await
            .context("notification webhook request failed")?
            .error_for_status()
            .context("notification webhook rejected the push")?;
        Ok(())
    }
}

/// Used when no gateway is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, push: &PushNotification) -> Result<()> {
        tracing::info!(
            user_id = %push.user_id,
            notification_id = %push.notification_id,
            notification_type = %push.notification_type,
            title = %push.title,
            "push notification (no gateway configured)"
        );
        Ok(())
    }
}

/// Best-effort fan-out. A failed push never fails the operation that
/// produced it, so errors stop here.
pub async fn dispatch_all(notifier: &dyn Notifier, notifications: Vec<Notification>) {
    for notification in &notifications {
        let push = PushNotification::from(notification);
        if let Err(err) = notifier.send(&push).await {
            tracing::warn!(
                user_id = %push.user_id,
                notification_id = %push.notification_id,
                error = %err,
                "failed to dispatch push notification"
            );
        }
    }
}
