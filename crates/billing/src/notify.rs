//! Notifications and admin alerts

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BillingResult;
use crate::settings::SiteConfig;
use crate::store::{EnrolmentStore, User};

/// Who a message appears to come from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "user", rename_all = "snake_case")]
pub enum Sender {
    User(User),
    NoReply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// `None` for site-level messages
    pub course_id: Option<i64>,
    pub from: Sender,
    pub to: User,
    pub subject: String,
    pub full_message: String,
    pub full_message_html: String,
    pub small_message: String,
    pub context_url: String,
    pub context_url_name: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Message) -> BillingResult<()>;
}

/// Minimal HTML escaping for message bodies
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain text wrapped in a paragraph, newlines as `<br />`
pub fn text_to_html(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text).replace('\n', "<br />\n"))
}

/// Body of a payment error alert
pub fn admin_alert_body(site_name: &str, subject: &str, fields: &[(&str, String)]) -> String {
    let mut body = format!("{}:  Transaction failed.\n\n{}\n\n", site_name, subject);
    for (key, value) in fields {
        body.push_str(&format!("{} => {}\n", key, value));
    }
    body
}

/// Tell the primary site administrator that a payment step failed.
///
/// Best-effort: lookup and delivery failures are logged and swallowed.
pub async fn alert_admins<S, N>(
    store: &S,
    notifier: &N,
    site: &SiteConfig,
    subject: &str,
    fields: &[(&str, String)],
) where
    S: EnrolmentStore + ?Sized,
    N: Notifier + ?Sized,
{
    tracing::warn!(subject, fields = ?fields, "Payment error alert");

    let admin = match store.site_admins().await {
        Ok(admins) => admins.into_iter().next(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not load site administrators for alert");
            return;
        }
    };
    let Some(admin) = admin else {
        tracing::warn!("No site administrator to alert");
        return;
    };

    let body = admin_alert_body(&site.site_name, subject, fields);
    let message = Message {
        course_id: None,
        from: Sender::NoReply,
        to: admin,
        subject: format!("STRIPE PAYMENT ERROR: {}", subject),
        full_message_html: text_to_html(&body),
        full_message: body,
        small_message: "Stripe payment error occurred".to_string(),
        context_url: format!("{}/admin/index.php", site.wwwroot),
        context_url_name: "Site administration".to_string(),
    };

    if let Err(e) = notifier.send(&message).await {
        tracing::warn!(admin_id = message.to.id, error = %e, "Failed to send payment error alert");
    }
}
