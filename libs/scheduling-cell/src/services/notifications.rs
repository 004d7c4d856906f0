// libs/scheduling-cell/src/services/notifications.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentStatus};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalendarAction {
    Created,
    Updated,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Notification endpoint answered {0}")]
    Rejected(u16),
}

/// Outbound hooks to the reminder service and the external calendar.
#[async_trait]
pub trait AppointmentNotifier: Send + Sync {
    async fn status_changed(&self, appointment_id: Uuid, status: AppointmentStatus) -> Result<(), NotificationError>;

    async fn calendar_sync(&self, appointment_id: Uuid, action: CalendarAction) -> Result<(), NotificationError>;
}

/// Fire a status notification. A delivery failure never undoes a committed
/// scheduling change, so it is only logged.
pub async fn notify_status_change(notifier: &dyn AppointmentNotifier, appointment: &Appointment) {
    if let Err(e) = notifier.status_changed(appointment.id, appointment.status).await {
        warn!(
            "Status notification failed for appointment {} ({}): {}",
            appointment.id, appointment.status, e
        );
    }
}

/// Push a calendar change. Failures are logged the same way.
pub async fn sync_calendar(notifier: &dyn AppointmentNotifier, appointment_id: Uuid, action: CalendarAction) {
    if let Err(e) = notifier.calendar_sync(appointment_id, action).await {
        warn!("Calendar sync failed for appointment {} ({:?}): {}", appointment_id, action, e);
    }
}

pub struct NoopNotifier;

#[async_trait]
impl AppointmentNotifier for NoopNotifier {
    async fn status_changed(&self, appointment_id: Uuid, status: AppointmentStatus) -> Result<(), NotificationError> {
        debug!("Notifications disabled, dropping {} for {}", status, appointment_id);
        Ok(())
    }

    async fn calendar_sync(&self, appointment_id: Uuid, action: CalendarAction) -> Result<(), NotificationError> {
        debug!("Calendar sync disabled, dropping {:?} for {}", action, appointment_id);
        Ok(())
    }
}

pub struct HttpNotifier {
    client: Client,
    status_url: Option<String>,
    calendar_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_urls(
            config.notification_webhook_url.clone(),
            config.calendar_sync_webhook_url.clone(),
        )
    }

    pub fn with_urls(status_url: Option<String>, calendar_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            status_url,
            calendar_url,
        }
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(), NotificationError> {
        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentNotifier for HttpNotifier {
    async fn status_changed(&self, appointment_id: Uuid, status: AppointmentStatus) -> Result<(), NotificationError> {
        let Some(url) = self.status_url.as_deref() else {
            return Ok(());
        };
        debug!("Posting status {} for appointment {}", status, appointment_id);
        self.post(url, json!({ "appointment_id": appointment_id, "status": status })).await
    }

    async fn calendar_sync(&self, appointment_id: Uuid, action: CalendarAction) -> Result<(), NotificationError> {
        let Some(url) = self.calendar_url.as_deref() else {
            return Ok(());
        };
        debug!("Posting calendar {:?} for appointment {}", action, appointment_id);
        self.post(url, json!({ "appointment_id": appointment_id, "action": action })).await
    }
}
