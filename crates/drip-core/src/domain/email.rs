//! Queued email records and their status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{EmailId, InboxId};

/// Stored send type of a record (`cold`, `cold_v2`, `friendly`, `followup`).
///
/// Kept as the raw string: rows written by other tools may carry values this
/// crate does not know, and those must survive a read/write untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SendType(String);

impl SendType {
    pub const COLD: &'static str = "cold";
    pub const COLD_V2: &'static str = "cold_v2";
    pub const FRIENDLY: &'static str = "friendly";
    pub const FOLLOWUP: &'static str = "followup";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn cold() -> Self {
        Self::new(Self::COLD)
    }

    pub fn cold_v2() -> Self {
        Self::new(Self::COLD_V2)
    }

    pub fn friendly() -> Self {
        Self::new(Self::FRIENDLY)
    }

    pub fn followup() -> Self {
        Self::new(Self::FOLLOWUP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Which mix class this type is drawn for, if any.
    pub fn class(&self) -> Option<SendClass> {
        match self.0.as_str() {
            Self::COLD | Self::COLD_V2 | Self::FOLLOWUP => Some(SendClass::Cold),
            Self::FRIENDLY => Some(SendClass::Friendly),
            _ => None,
        }
    }
}

impl fmt::Display for SendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two classes the run mix is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendClass {
    Cold,
    Friendly,
}

impl SendClass {
    /// Send types a claim for this class may pick up.
    pub fn accepted_types(self) -> Vec<SendType> {
        match self {
            SendClass::Cold => vec![SendType::cold(), SendType::cold_v2(), SendType::followup()],
            SendClass::Friendly => vec![SendType::friendly()],
        }
    }

    pub fn other(self) -> SendClass {
        match self {
            SendClass::Cold => SendClass::Friendly,
            SendClass::Friendly => SendClass::Cold,
        }
    }
}

impl fmt::Display for SendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendClass::Cold => f.write_str("cold"),
            SendClass::Friendly => f.write_str("friendly"),
        }
    }
}

/// Status of a queued email.
///
/// Transitions:
/// - Queued -> Sending (claim)
/// - Sending -> Sent | Error (finalize)
///
/// Sent and Error are terminal. A row stuck in Sending is only ever moved by
/// the reaper, never by a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
    Sending,
    Sent,
    Error,
}

impl EmailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Queued => "queued",
            EmailStatus::Sending => "sending",
            EmailStatus::Sent => "sent",
            EmailStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EmailStatus::Sent | EmailStatus::Error)
    }

    /// Is this record eligible for a claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, EmailStatus::Queued)
    }

    /// May the reaper move this record back out of flight?
    pub fn is_reclaimable(self) -> bool {
        matches!(self, EmailStatus::Sending)
    }

    pub fn can_transition(self, to: EmailStatus) -> bool {
        matches!(
            (self, to),
            (EmailStatus::Queued, EmailStatus::Sending)
                | (EmailStatus::Sending, EmailStatus::Sent)
                | (EmailStatus::Sending, EmailStatus::Error)
        )
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(EmailStatus::Queued),
            "sending" => Ok(EmailStatus::Sending),
            "sent" => Ok(EmailStatus::Sent),
            "error" => Ok(EmailStatus::Error),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// One row of the send queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: EmailId,
    pub to_email: Option<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub send_type: Option<SendType>,
    pub prompt_angle_id: Option<String>,
    pub template_id: Option<String>,
    pub inbox_id: Option<InboxId>,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Every character `str::trim` strips (Unicode `White_Space`). Stores that
/// check completeness in SQL trim exactly this set, so a field counts as blank
/// in every backend or in none.
pub const BLANK_CHARS: &str = "\u{9}\u{A}\u{B}\u{C}\u{D}\u{20}\u{85}\u{A0}\u{1680}\
    \u{2000}\u{2001}\u{2002}\u{2003}\u{2004}\u{2005}\u{2006}\u{2007}\u{2008}\u{2009}\u{200A}\
    \u{2028}\u{2029}\u{202F}\u{205F}\u{3000}";

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl QueuedEmail {
    /// Field-completeness gate: recipient, subject, at least one body, a send
    /// type and a prompt/angle reference. Rows that fail it stay queued
    /// forever rather than being half-sent.
    pub fn is_complete(&self) -> bool {
        present(&self.to_email)
            && present(&self.subject)
            && (present(&self.body_text) || present(&self.body_html))
            && self.send_type.as_ref().is_some_and(|t| !t.as_str().is_empty())
            && present(&self.prompt_angle_id)
    }

    /// Could a claim restricted to `send_types` pick this row right now?
    pub fn is_claimable_for(&self, send_types: &[SendType]) -> bool {
        self.status.is_claimable()
            && self.is_complete()
            && self
                .send_type
                .as_ref()
                .is_some_and(|t| send_types.contains(t))
    }

    pub fn send_type_label(&self) -> &str {
        self.send_type.as_ref().map_or("unknown", |t| t.as_str())
    }
}

/// Output of the build step: everything needed to enqueue a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEmail {
    #[serde(default)]
    pub to_email: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub send_type: Option<SendType>,
    #[serde(default)]
    pub prompt_angle_id: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
}

impl NewEmail {
    /// A complete record of the given type, mostly for tests and demos.
    pub fn simple(to: &str, subject: &str, body: &str, send_type: SendType) -> Self {
        Self {
            to_email: Some(to.to_string()),
            subject: Some(subject.to_string()),
            body_text: Some(body.to_string()),
            body_html: None,
            send_type: Some(send_type),
            prompt_angle_id: Some("angle-default".to_string()),
            template_id: None,
        }
    }

    pub fn into_record(self, id: EmailId, now: DateTime<Utc>) -> QueuedEmail {
        QueuedEmail {
            id,
            to_email: self.to_email,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            send_type: self.send_type,
            prompt_angle_id: self.prompt_angle_id,
            template_id: self.template_id,
            inbox_id: None,
            status: EmailStatus::Queued,
            error: None,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }
}

/// Stored error reasons are capped so one provider stack trace cannot bloat
/// the queue table.
pub const MAX_ERROR_REASON_CHARS: usize = 300;

pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_ERROR_REASON_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn record(new: NewEmail) -> QueuedEmail {
        new.into_record(EmailId::from_ulid(Ulid::new()), Utc::now())
    }

    #[test]
    fn blank_chars_are_exactly_what_trim_strips() {
        let expected: String = (char::MIN..=char::MAX).filter(|c| c.is_whitespace()).collect();
        assert_eq!(BLANK_CHARS, expected);
    }

    #[test]
    fn unicode_spaces_do_not_complete_a_record() {
        let mut email = record(NewEmail::simple("a@x.com", "hi", "body", SendType::cold()));
        assert!(email.is_complete());

        email.subject = Some("\u{A0}\u{3000}".to_string());
        assert!(!email.is_complete());
    }

    #[rstest]
    #[case::queued_to_sending(EmailStatus::Queued, EmailStatus::Sending, true)]
    #[case::sending_to_sent(EmailStatus::Sending, EmailStatus::Sent, true)]
    #[case::sending_to_error(EmailStatus::Sending, EmailStatus::Error, true)]
    #[case::queued_to_sent(EmailStatus::Queued, EmailStatus::Sent, false)]
    #[case::sent_to_sending(EmailStatus::Sent, EmailStatus::Sending, false)]
    #[case::error_to_sending(EmailStatus::Error, EmailStatus::Sending, false)]
    #[case::sent_to_error(EmailStatus::Sent, EmailStatus::Error, false)]
    #[case::sending_to_queued(EmailStatus::Sending, EmailStatus::Queued, false)]
    fn status_transitions(
        #[case] from: EmailStatus,
        #[case] to: EmailStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition(to), allowed);
    }

    #[test]
    fn terminal_states_are_sent_and_error() {
        assert!(EmailStatus::Sent.is_terminal());
        assert!(EmailStatus::Error.is_terminal());
        assert!(!EmailStatus::Queued.is_terminal());
        assert!(!EmailStatus::Sending.is_terminal());
    }

    #[test]
    fn status_round_trips_through_its_storage_string() {
        for status in [
            EmailStatus::Queued,
            EmailStatus::Sending,
            EmailStatus::Sent,
            EmailStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<EmailStatus>().unwrap(), status);
        }
        assert!("bounced".parse::<EmailStatus>().is_err());
    }

    #[rstest]
    #[case::complete(NewEmail::simple("a@x.com", "hi", "body", SendType::cold()), true)]
    #[case::missing_subject(
        NewEmail { subject: None, ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold()) },
        false
    )]
    #[case::blank_recipient(
        NewEmail { to_email: Some("  ".into()), ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold()) },
        false
    )]
    #[case::html_only_body(
        NewEmail {
            body_text: None,
            body_html: Some("<p>hi</p>".into()),
            ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold())
        },
        true
    )]
    #[case::no_body(
        NewEmail { body_text: None, ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold()) },
        false
    )]
    #[case::no_angle(
        NewEmail { prompt_angle_id: None, ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold()) },
        false
    )]
    #[case::no_send_type(
        NewEmail { send_type: None, ..NewEmail::simple("a@x.com", "hi", "body", SendType::cold()) },
        false
    )]
    fn completeness_gate(#[case] new: NewEmail, #[case] complete: bool) {
        assert_eq!(record(new).is_complete(), complete);
    }

    #[test]
    fn claimability_respects_type_filter() {
        let email = record(NewEmail::simple("a@x.com", "hi", "body", SendType::followup()));
        assert!(email.is_claimable_for(&SendClass::Cold.accepted_types()));
        assert!(!email.is_claimable_for(&SendClass::Friendly.accepted_types()));
    }

    #[test]
    fn unknown_send_types_have_no_class() {
        assert_eq!(SendType::new("newsletter").class(), None);
        assert_eq!(SendType::cold_v2().class(), Some(SendClass::Cold));
        assert_eq!(SendType::friendly().class(), Some(SendClass::Friendly));
    }

    #[test]
    fn reasons_are_truncated() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_reason(&long).chars().count(), MAX_ERROR_REASON_CHARS);
        assert_eq!(truncate_reason("short"), "short");
    }
}
