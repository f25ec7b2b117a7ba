//! SMTP transport (async lettre).
//!
//! Each inbox carries its own relay settings in `provider_config`:
//!
//! ```json
//! { "host": "smtp.example.com", "port": 587, "username": "s1@example.com",
//!   "password_env": "S1_SMTP_PASSWORD", "tls": "starttls", "display_name": "Sam" }
//! ```
//!
//! Secrets never live in the database; `password_env` names the environment
//! variable holding the password.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::info;

use crate::domain::{DeliveryError, DeliveryReceipt, Inbox, QueuedEmail};
use crate::ports::Transport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpTls {
    #[default]
    Starttls,
    /// TLS from the first byte (port 465).
    Implicit,
    /// Plaintext. Local relays and test servers only.
    None,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to the inbox address.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub tls: SmtpTls,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    30
}

impl SmtpSettings {
    pub fn from_inbox(inbox: &Inbox) -> Result<Self, DeliveryError> {
        if !inbox.provider.eq_ignore_ascii_case("smtp") {
            return Err(DeliveryError::Misconfigured(format!(
                "{} uses provider {:?}, not smtp",
                inbox.email_address, inbox.provider
            )));
        }
        serde_json::from_value(inbox.provider_config.clone()).map_err(|e| {
            DeliveryError::Misconfigured(format!("{} provider_config: {e}", inbox.email_address))
        })
    }
}

/// Message-ID stamped on every outgoing mail, derived from the queue row so a
/// reply can be traced back to it.
pub fn message_id_for(email: &QueuedEmail, inbox: &Inbox) -> String {
    format!("<{}@{}>", email.id.to_storage().to_ascii_lowercase(), inbox.domain)
}

fn sender(inbox: &Inbox, settings: &SmtpSettings) -> Result<Mailbox, DeliveryError> {
    match &settings.display_name {
        Some(name) => format!("{name} <{}>", inbox.email_address).parse(),
        None => inbox.email_address.parse(),
    }
    .map_err(|e| DeliveryError::Misconfigured(format!("from address: {e}")))
}

/// Build the RFC 5322 message for one queue row.
pub fn build_message(
    email: &QueuedEmail,
    inbox: &Inbox,
    settings: &SmtpSettings,
) -> Result<Message, DeliveryError> {
    let invalid = |what: &str| DeliveryError::InvalidMessage(format!("{} missing {what}", email.id));

    let from = sender(inbox, settings)?;

    let to: Mailbox = email
        .to_email
        .as_deref()
        .ok_or_else(|| invalid("recipient"))?
        .parse()
        .map_err(|e| DeliveryError::InvalidMessage(format!("recipient: {e}")))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone().ok_or_else(|| invalid("subject"))?)
        .message_id(Some(message_id_for(email, inbox)));

    let text = email.body_text.clone().filter(|b| !b.trim().is_empty());
    let html = email.body_html.clone().filter(|b| !b.trim().is_empty());
    let message = match (text, html) {
        (Some(text), Some(html)) => {
            builder.multipart(MultiPart::alternative_plain_html(text, html))
        }
        (Some(text), None) => builder.header(ContentType::TEXT_PLAIN).body(text),
        (None, Some(html)) => builder.header(ContentType::TEXT_HTML).body(html),
        (None, None) => return Err(invalid("body")),
    };
    message.map_err(|e| DeliveryError::InvalidMessage(e.to_string()))
}

/// Sends through each inbox's own SMTP relay.
#[derive(Debug, Clone, Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    pub fn new() -> Self {
        Self
    }

    fn mailer(
        inbox: &Inbox,
        settings: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let builder = match settings.tls {
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| DeliveryError::Misconfigured(format!("SMTP relay: {e}")))?,
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| DeliveryError::Misconfigured(format!("SMTP relay: {e}")))?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host),
        };
        let mut builder = builder
            .port(settings.port)
            .timeout(Some(Duration::from_secs(settings.timeout_secs)));

        if let Some(var) = &settings.password_env {
            let password = std::env::var(var).map_err(|_| {
                DeliveryError::Misconfigured(format!("{var} is not set for {}", inbox.email_address))
            })?;
            let username = settings
                .username
                .clone()
                .unwrap_or_else(|| inbox.email_address.clone());
            builder = builder.credentials(Credentials::new(username, password));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn check(&self, inbox: &Inbox) -> Result<(), DeliveryError> {
        let settings = SmtpSettings::from_inbox(inbox)?;
        sender(inbox, &settings)?;
        Self::mailer(inbox, &settings).map(|_| ())
    }

    async fn deliver(
        &self,
        email: &QueuedEmail,
        inbox: &Inbox,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let settings = SmtpSettings::from_inbox(inbox)?;
        let message = build_message(email, inbox, &settings)?;
        let mailer = Self::mailer(inbox, &settings)?;

        let response = mailer.send(message).await.map_err(|e| {
            if e.is_permanent() {
                DeliveryError::Rejected(e.to_string())
            } else if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Connection(e.to_string())
            }
        })?;

        info!(
            email_id = %email.id,
            inbox = %inbox.email_address,
            code = %response.code(),
            "smtp accepted message"
        );
        Ok(DeliveryReceipt {
            provider_message_id: Some(message_id_for(email, inbox)),
            response: Some(response.code().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmailId, InboxId, NewEmail, SendType};
    use chrono::Utc;
    use ulid::Ulid;

    fn inbox(config: serde_json::Value) -> Inbox {
        let mut inbox = Inbox::new(InboxId::from_ulid(Ulid::new()), "sam@sender.com", 20);
        inbox.provider_config = config;
        inbox
    }

    fn email(new: NewEmail) -> QueuedEmail {
        new.into_record(EmailId::from_ulid(Ulid::new()), Utc::now())
    }

    #[test]
    fn settings_come_from_provider_config() {
        let settings = SmtpSettings::from_inbox(&inbox(serde_json::json!({
            "host": "smtp.sender.com",
            "password_env": "SAM_PASSWORD",
            "tls": "implicit"
        })))
        .unwrap();

        assert_eq!(settings.host, "smtp.sender.com");
        assert_eq!(settings.port, 587);
        assert_eq!(settings.tls, SmtpTls::Implicit);
        assert_eq!(settings.password_env.as_deref(), Some("SAM_PASSWORD"));
    }

    #[test]
    fn missing_host_is_a_misconfiguration() {
        let err = SmtpSettings::from_inbox(&inbox(serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, DeliveryError::Misconfigured(_)));

        let mut other = inbox(serde_json::json!({ "host": "x" }));
        other.provider = "gmail_api".into();
        assert!(matches!(
            SmtpSettings::from_inbox(&other),
            Err(DeliveryError::Misconfigured(_))
        ));
    }

    #[test]
    fn check_resolves_the_password_before_any_send() {
        let transport = SmtpTransport::new();
        let unset = inbox(serde_json::json!({
            "host": "smtp.sender.com",
            "password_env": "DRIP_TEST_SMTP_PASSWORD_NEVER_SET"
        }));
        let err = transport.check(&unset).unwrap_err();
        assert!(matches!(err, DeliveryError::Misconfigured(_)));
        assert!(err.to_string().contains("DRIP_TEST_SMTP_PASSWORD_NEVER_SET"));

        let open_relay = inbox(serde_json::json!({ "host": "localhost", "tls": "none" }));
        transport.check(&open_relay).unwrap();
    }

    #[test]
    fn check_rejects_unusable_sender_and_provider() {
        let transport = SmtpTransport::new();
        let mut bad_sender = inbox(serde_json::json!({ "host": "smtp.sender.com" }));
        bad_sender.email_address = "not an address".into();
        assert!(matches!(
            transport.check(&bad_sender),
            Err(DeliveryError::Misconfigured(_))
        ));

        assert!(matches!(
            transport.check(&inbox(serde_json::json!({}))),
            Err(DeliveryError::Misconfigured(_))
        ));
    }

    #[test]
    fn builds_alternative_message_with_stable_id() {
        let inbox = inbox(serde_json::json!({ "host": "smtp.sender.com", "display_name": "Sam" }));
        let settings = SmtpSettings::from_inbox(&inbox).unwrap();
        let email = email(NewEmail {
            body_html: Some("<p>Hi Alex</p>".into()),
            ..NewEmail::simple("alex@prospect.com", "Quick question", "Hi Alex", SendType::cold())
        });

        let message = build_message(&email, &inbox, &settings).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("From: Sam <sam@sender.com>"));
        assert!(raw.contains("To: alex@prospect.com"));
        assert!(raw.contains("Subject: Quick question"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains(&message_id_for(&email, &inbox)));
    }

    #[test]
    fn refuses_to_build_without_recipient() {
        let inbox = inbox(serde_json::json!({ "host": "smtp.sender.com" }));
        let settings = SmtpSettings::from_inbox(&inbox).unwrap();
        let email = email(NewEmail {
            to_email: None,
            ..NewEmail::simple("x@y.com", "s", "b", SendType::cold())
        });

        assert!(matches!(
            build_message(&email, &inbox, &settings),
            Err(DeliveryError::InvalidMessage(_))
        ));
    }
}
