//! Email delivery via the Resend API

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::notify::{Message, Notifier, Sender};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Delivery is disabled when unset
    pub api_key: Option<String>,
    pub noreply_address: String,
    pub site_name: String,
}

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Clone)]
pub struct EmailNotifier {
    http: reqwest::Client,
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn from_header(&self, sender: &Sender) -> String {
        let name = match sender {
            Sender::User(user) => format!("{} via {}", user.fullname(), self.config.site_name),
            Sender::NoReply => self.config.site_name.clone(),
        };
        format!("{} <{}>", name.replace(['<', '>', '"'], ""), self.config.noreply_address)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, message: &Message) -> BillingResult<()> {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            tracing::debug!(
                to = message.to.id,
                subject = %message.subject,
                "Email delivery disabled, skipping message"
            );
            return Ok(());
        };

        let reply_to = match &message.from {
            Sender::User(user) => Some(user.email.as_str()),
            Sender::NoReply => None,
        };

        let payload = OutgoingEmail {
            from: self.from_header(&message.from),
            to: [message.to.email.as_str()],
            subject: &message.subject,
            text: &message.full_message,
            html: &message.full_message_html,
            reply_to,
        };

        let response = self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BillingError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Notification(format!(
                "Resend returned {}: {}",
                status, body
            )));
        }

        tracing::debug!(to = message.to.id, subject = %message.subject, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::User;

    fn notifier(api_key: Option<&str>) -> EmailNotifier {
        EmailNotifier::new(EmailConfig {
            api_key: api_key.map(String::from),
            noreply_address: "noreply@learn.example.com".into(),
            site_name: "Academy".into(),
        })
    }

    #[test]
    fn test_enabled_requires_key() {
        assert!(!notifier(None).is_enabled());
        assert!(!notifier(Some("")).is_enabled());
        assert!(notifier(Some("re_123")).is_enabled());
    }

    #[test]
    fn test_from_header() {
        let n = notifier(None);
        assert_eq!(
            n.from_header(&Sender::NoReply),
            "Academy <noreply@learn.example.com>"
        );
        let teacher = User {
            id: 3,
            email: "t@example.com".into(),
            firstname: "Tia".into(),
            lastname: "Cher".into(),
        };
        assert_eq!(
            n.from_header(&Sender::User(teacher)),
            "Tia Cher via Academy <noreply@learn.example.com>"
        );
    }

    #[tokio::test]
    async fn test_disabled_send_is_noop() {
        let message = Message {
            course_id: Some(1),
            from: Sender::NoReply,
            to: User {
                id: 1,
                email: "a@example.com".into(),
                firstname: "A".into(),
                lastname: "B".into(),
            },
            subject: "s".into(),
            full_message: "m".into(),
            full_message_html: "<p>m</p>".into(),
            small_message: "m".into(),
            context_url: String::new(),
            context_url_name: String::new(),
        };
        assert!(notifier(None).send(&message).await.is_ok());
    }
}
