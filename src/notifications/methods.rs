use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use crate::entities::tracking_subscription::{self, DeliveryMethodKind};
use crate::entities::tracking_event;

/// Result of one delivery attempt, mirroring the adapter failure split.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Ok,
    Transient(String),
    Permanent(String),
}

/// Method-rendered notification content. The dispatcher treats it as
/// opaque.
#[derive(Debug, Clone)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

/// One pluggable delivery channel. Rendering is method-specific; delivery
/// classifies its own failures.
#[async_trait]
pub trait DeliveryMethod: Send + Sync {
    fn kind(&self) -> DeliveryMethodKind;

    fn render(
        &self,
        event: &tracking_event::Model,
        subscription: &tracking_subscription::Model,
    ) -> RenderedNotification {
        let location = event.location_label().unwrap_or_else(|| "-".to_string());
        RenderedNotification {
            title: format!("Shipment update: {}", event.description),
            body: format!(
                "{} at {} ({})",
                event.description,
                location,
                event.event_datetime.to_rfc3339()
            ),
            payload: json!({
                "event_id": event.id,
                "shipment_id": event.shipment_id,
                "event_code": event.event_code,
                "description": event.description,
                "location": location,
                "event_datetime": event.event_datetime,
                "severity": event.severity,
                "subscription_id": subscription.id,
            }),
        }
    }

    async fn deliver(&self, endpoint: &str, rendered: &RenderedNotification) -> DeliveryOutcome;
}

/// Webhook delivery: POST the rendered payload as JSON.
pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryMethod for WebhookDelivery {
    fn kind(&self) -> DeliveryMethodKind {
        DeliveryMethodKind::Webhook
    }

    async fn deliver(&self, endpoint: &str, rendered: &RenderedNotification) -> DeliveryOutcome {
        let response = match self.client.post(endpoint).json(&rendered.payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return DeliveryOutcome::Transient(format!("webhook unreachable: {}", e))
            }
            Err(e) => return DeliveryOutcome::Permanent(format!("webhook request failed: {}", e)),
        };

        match response.status() {
            status if status.is_success() => DeliveryOutcome::Ok,
            StatusCode::TOO_MANY_REQUESTS => {
                DeliveryOutcome::Transient("webhook rate limit".to_string())
            }
            status if status.is_server_error() => {
                DeliveryOutcome::Transient(format!("webhook returned {}", status))
            }
            status => DeliveryOutcome::Permanent(format!("webhook returned {}", status)),
        }
    }
}

/// Email delivery seam. The rendered message is handed to the mail relay
/// configured at deployment; this layer records the handoff.
pub struct EmailDelivery;

#[async_trait]
impl DeliveryMethod for EmailDelivery {
    fn kind(&self) -> DeliveryMethodKind {
        DeliveryMethodKind::Email
    }

    async fn deliver(&self, endpoint: &str, rendered: &RenderedNotification) -> DeliveryOutcome {
        info!(to = endpoint, title = %rendered.title, "email notification handed off");
        DeliveryOutcome::Ok
    }
}

/// SMS delivery seam.
pub struct SmsDelivery;

#[async_trait]
impl DeliveryMethod for SmsDelivery {
    fn kind(&self) -> DeliveryMethodKind {
        DeliveryMethodKind::Sms
    }

    async fn deliver(&self, endpoint: &str, rendered: &RenderedNotification) -> DeliveryOutcome {
        info!(to = endpoint, body = %rendered.body, "sms notification handed off");
        DeliveryOutcome::Ok
    }
}

/// Mobile push delivery seam.
pub struct PushDelivery;

#[async_trait]
impl DeliveryMethod for PushDelivery {
    fn kind(&self) -> DeliveryMethodKind {
        DeliveryMethodKind::Push
    }

    async fn deliver(&self, endpoint: &str, rendered: &RenderedNotification) -> DeliveryOutcome {
        info!(device = endpoint, title = %rendered.title, "push notification handed off");
        DeliveryOutcome::Ok
    }
}
