//! Notifier port + delivery payload (spec.md §4.6, §6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::GroundingSource;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
    #[error("notifier rejected the delivery: {0}")]
    Rejected(String),
}

/// Payload handed to `Notifier::deliver` (spec.md §6 "Notification payload").
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub task_id: Uuid,
    pub task_name: String,
    pub user_id: String,
    pub search_query: String,
    pub condition_description: String,
    pub condition_met: bool,
    pub answer: String,
    pub change_summary: Option<String>,
    pub grounding_sources: Vec<GroundingSource>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        execution_id: Uuid,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResult, NotifierError>;
}

/// Logs the payload and always succeeds. The minimal default used when no
/// transport is configured; matches the teacher's habit of tracing every
/// side effect (`scheduler.rs`'s `tracing::info!` on task completion).
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn deliver(
        &self,
        execution_id: Uuid,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResult, NotifierError> {
        tracing::info!(
            execution_id = %execution_id,
            task = %payload.task_name,
            condition_met = payload.condition_met,
            "notification delivered (logging notifier)"
        );
        Ok(DeliveryResult {
            provider_message_id: None,
        })
    }
}

/// Posts the payload as JSON to a configured webhook URL. Grounded in the
/// eventsub-dispatch pattern of `kurbezz-twitch-notifications`'s
/// `services/webhooks.rs`, adapted to an outbound POST instead of an inbound
/// handler.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(
        &self,
        execution_id: Uuid,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResult, NotifierError> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            execution_id: Uuid,
            #[serde(flatten)]
            payload: &'a NotificationPayload,
        }

        let response = self
            .client
            .post(&self.url)
            .json(&Envelope {
                execution_id,
                payload,
            })
            .send()
            .await
            .map_err(|e| NotifierError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(NotifierError::Unavailable(format!(
                "webhook returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(NotifierError::Rejected(format!(
                "webhook returned {status}"
            )));
        }

        Ok(DeliveryResult {
            provider_message_id: None,
        })
    }
}
