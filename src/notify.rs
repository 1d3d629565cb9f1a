use crate::http::shared_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients configured")]
    NoRecipients,
    #[error("relay request failed: {0}")]
    Request(String),
}

/// Outbound mail capability. Delivery is best effort; callers log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            target = "catalog.notify",
            subject = %notification.subject,
            sender = %notification.sender,
            recipients = ?notification.recipients,
            body = %notification.body,
            "notification",
        );
        Ok(())
    }
}

/// Hands notifications to an HTTP mail relay as JSON.
#[derive(Clone)]
pub struct RelayNotifier {
    http: Client,
    url: String,
}

impl RelayNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: shared_client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if notification.recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let response = self
            .http
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|err| NotifyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().await.push(notification.clone());
            if self.fail {
                return Err(NotifyError::Request("HTTP 502 Bad Gateway".into()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_rejects_empty_recipient_list() {
        let relay = RelayNotifier::new("http://127.0.0.1:9/mail");
        let err = relay
            .send(&Notification {
                subject: "s".into(),
                body: "b".into(),
                sender: "from@example.com".into(),
                recipients: vec![],
            })
            .await
            .expect_err("no recipients");
        assert!(matches!(err, NotifyError::NoRecipients));
    }
}
