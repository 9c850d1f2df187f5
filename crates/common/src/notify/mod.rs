//! Access request notifications
//!
//! Delivery is best effort: callers log a failed notification and carry on.

use crate::config::NotificationConfig;
use crate::errors::{AppError, Result};
use crate::models::{AccessRequest, RequestStatus, RequestedLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Workflow transition worth telling someone about
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A new request awaits review
    RequestCreated {
        request_id: Uuid,
        manuscript_id: Uuid,
        requester_id: Uuid,
        requested_level: RequestedLevel,
        created_at: DateTime<Utc>,
    },
    /// A request reached a terminal state
    RequestReviewed {
        request_id: Uuid,
        manuscript_id: Uuid,
        requester_id: Uuid,
        status: RequestStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        approved_level: Option<RequestedLevel>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
}

impl Notification {
    pub fn created(request: &AccessRequest) -> Self {
        Notification::RequestCreated {
            request_id: request.id,
            manuscript_id: request.manuscript_id,
            requester_id: request.requester_id,
            requested_level: request.requested_level,
            created_at: request.created_at,
        }
    }

    pub fn reviewed(request: &AccessRequest) -> Self {
        Notification::RequestReviewed {
            request_id: request.id,
            manuscript_id: request.manuscript_id,
            requester_id: request.requester_id,
            status: request.status,
            approved_level: request.approved_level,
            expires_at: request.expires_at(),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Notification::RequestCreated { .. } => "request_created",
            Notification::RequestReviewed { .. } => "request_reviewed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Build the configured notifier: webhook when a URL is set, log otherwise
pub fn from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match config.webhook_url {
        Some(ref url) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match notification {
            Notification::RequestCreated {
                request_id,
                manuscript_id,
                requested_level,
                ..
            } => tracing::info!(
                %request_id,
                %manuscript_id,
                level = requested_level.as_str(),
                "Access request awaiting review"
            ),
            Notification::RequestReviewed {
                request_id,
                manuscript_id,
                status,
                ..
            } => tracing::info!(
                %request_id,
                %manuscript_id,
                status = status.as_str(),
                "Access request reviewed"
            ),
        }
        Ok(())
    }
}

/// POSTs notifications as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(notification)
            .send()
            .await
            .map_err(|e| AppError::Notification {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Notification {
                message: format!("Webhook returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Collects notifications in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<tokio::sync::Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
