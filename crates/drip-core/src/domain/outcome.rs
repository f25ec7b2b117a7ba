//! What a transport hands back after a successful delivery.

use serde::{Deserialize, Serialize};

/// Proof of delivery from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned message id, if the provider returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,

    /// Short provider response kept for the telemetry row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl DeliveryReceipt {
    pub fn with_message_id(message_id: impl Into<String>) -> Self {
        Self {
            provider_message_id: Some(message_id.into()),
            response: None,
        }
    }
}
