//! Transport that never sends.

use async_trait::async_trait;
use tracing::info;

use crate::domain::{DeliveryError, DeliveryReceipt, Inbox, QueuedEmail};
use crate::ports::Transport;

/// Accepts everything and returns a synthetic message id. Records still move
/// through `sending -> sent`, so a dry run consumes the queue like a real one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunTransport;

#[async_trait]
impl Transport for DryRunTransport {
    async fn deliver(
        &self,
        email: &QueuedEmail,
        inbox: &Inbox,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        info!(
            email_id = %email.id,
            inbox = %inbox.email_address,
            to = email.to_email.as_deref().unwrap_or(""),
            subject = email.subject.as_deref().unwrap_or(""),
            "dry run: not sending"
        );
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("dry-run-{}", email.id.to_storage())),
            response: Some("dry run".to_string()),
        })
    }
}
