use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::escalation::FallbackNotifier;
use crate::notify::NotifyError;

const EMAILJS_ENDPOINT: &str = "https://api.emailjs.com/api/v1.0/email/send";

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
    pub private_key: String,
    /// Override for tests and self-hosted relays.
    pub endpoint: Option<String>,
}

/// Fallback notifier that sends a "you have an unread message" email
/// through an EmailJS-compatible HTTP API.
pub struct EmailJsNotifier {
    http: reqwest::Client,
    config: MailerConfig,
}

impl EmailJsNotifier {
    pub fn new(config: MailerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.as_deref().unwrap_or(EMAILJS_ENDPOINT)
    }
}

#[async_trait]
impl FallbackNotifier for EmailJsNotifier {
    async fn send_fallback(
        &self,
        sender_contact: &str,
        recipient_contact: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "service_id": self.config.service_id,
            "template_id": self.config.template_id,
            "user_id": self.config.public_key,
            "accessToken": self.config.private_key,
            "template_params": {
                "name": sender_contact,
                "email": recipient_contact,
                "time": format_sent_at(sent_at),
            },
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Notifier(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Notifier(format!(
                "email API returned {status}: {detail}"
            )));
        }
        tracing::info!(recipient = recipient_contact, "fallback email sent");
        Ok(())
    }
}

/// Human-readable send time for the email template, e.g. "April 21, 10:15 PM".
fn format_sent_at(sent_at: DateTime<Utc>) -> String {
    sent_at.format("%B %-d, %-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_send_time_for_template() {
        let at = Utc.with_ymd_and_hms(2025, 4, 21, 22, 15, 0).unwrap();
        assert_eq!(format_sent_at(at), "April 21, 10:15 PM");
    }
}
