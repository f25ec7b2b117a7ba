//! Transport port: hands one email to a mail provider.

use async_trait::async_trait;

use crate::domain::{DeliveryError, DeliveryReceipt, Inbox, QueuedEmail};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve everything `deliver` would need from `inbox` (settings,
    /// secrets, sender address) without touching the network. A failure here
    /// is a configuration problem, not a property of any one email.
    fn check(&self, _inbox: &Inbox) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Send `email` from `inbox`. The record is already `sending`; the caller
    /// finalizes it from the result.
    async fn deliver(&self, email: &QueuedEmail, inbox: &Inbox)
    -> Result<DeliveryReceipt, DeliveryError>;
}
