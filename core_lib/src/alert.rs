//! Health-transition notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertContext {
    pub project: String,
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub message: String,
    pub context: AlertContext,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(message: &str, context: AlertContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.to_string(),
            context,
            raised_at: Utc::now(),
        }
    }
}

/// Receives one call per health transition. Delivery problems stay inside the
/// sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str, context: AlertContext);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str, context: AlertContext) {
        warn!(
            project = %context.project,
            name = %context.name,
            data = %context.data,
            "{}", message
        );
    }
}

/// Posts each alert as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(crate::fetch::user_agent())
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, message: &str, context: AlertContext) {
        let alert = Alert::new(message, context);

        match self.client.post(&self.url).json(&alert).send().await {
            Ok(response) if response.status().is_success() => {
                info!(alert_id = %alert.id, "Delivered alert: {}", alert.message);
            }
            Ok(response) => {
                error!(
                    alert_id = %alert.id,
                    status = response.status().as_u16(),
                    "Alert webhook rejected alert: {}", alert.message
                );
            }
            Err(e) => {
                error!(alert_id = %alert.id, error = %e, "Failed to deliver alert: {}", alert.message);
            }
        }
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertSink {
    alerts: Arc<RwLock<Vec<Alert>>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.alerts.read().iter().map(|a| a.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.alerts.write().clear();
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn notify(&self, message: &str, context: AlertContext) {
        self.alerts.write().push(Alert::new(message, context));
    }
}
