//! Delivery of change announcements.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::detector::ChangeEvent;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Webhook returned status {0}")]
    HttpStatus(u16),
}

/// Where change announcements go.
pub enum Notifier {
    /// Print each message to standard output.
    Stdout,
    /// POST `{"content": message}` to a chat webhook (Discord-compatible).
    Webhook {
        client: reqwest::Client,
        url: SecretString,
    },
}

/// SEC-015: Never print the webhook URL, it embeds the access token.
impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notifier::Stdout => f.write_str("Stdout"),
            Notifier::Webhook { .. } => f.write_str("Webhook([REDACTED])"),
        }
    }
}

impl Notifier {
    pub fn webhook(url: SecretString) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Notifier::Webhook { client, url })
    }

    /// Deliver one event.
    pub async fn deliver(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let message = event.message();
        match self {
            Notifier::Stdout => {
                println!("{message}");
                Ok(())
            }
            Notifier::Webhook { client, url } => {
                let body = serde_json::json!({ "content": message });
                let response = client
                    .post(url.expose_secret())
                    .json(&body)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(NotifyError::HttpStatus(response.status().as_u16()));
                }
                tracing::debug!(term = %event.term, entry = %event.entry.name, "Announcement posted");
                Ok(())
            }
        }
    }
}
