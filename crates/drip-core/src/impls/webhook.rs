//! Chat webhook notifier (Discord-compatible embeds).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{DripError, RunOutcome};
use crate::ports::{Notifier, RunNotification};

const STARTED_COLOR: u32 = 0x00AAFF;
const CLEAN_COLOR: u32 = 0x22AA55;
const TROUBLE_COLOR: u32 = 0xFF8800;

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// JSON body posted for a notification.
    pub fn payload(notification: &RunNotification) -> serde_json::Value {
        let (title, color) = match notification {
            RunNotification::Started { .. } => ("Send run started", STARTED_COLOR),
            RunNotification::Finished(summary) => {
                let clean = summary.errors == 0
                    && matches!(summary.outcome, RunOutcome::Completed { .. });
                (
                    "Send run finished",
                    if clean { CLEAN_COLOR } else { TROUBLE_COLOR },
                )
            }
        };
        serde_json::json!({
            "content": null,
            "embeds": [{
                "title": title,
                "description": notification.text(),
                "color": color,
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<(), DripError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&Self::payload(notification))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DripError::Notify(format!("webhook send failed: {e}")))?;

        if resp.status().is_success() {
            debug!("webhook notification delivered");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(DripError::Notify(format!("webhook error {status}: {body}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DrainReason, RunId, RunSummary};
    use chrono::Utc;
    use ulid::Ulid;

    #[test]
    fn finished_payload_flags_errors() {
        let mut summary =
            RunSummary::new(RunId::from_ulid(Ulid::new()), "host-a".into(), false, Utc::now());
        summary.finish(
            RunOutcome::Completed {
                reason: DrainReason::LimitReached,
            },
            Utc::now(),
        );

        let clean = WebhookNotifier::payload(&RunNotification::Finished(summary.clone()));
        assert_eq!(clean["embeds"][0]["color"], CLEAN_COLOR);

        summary.errors = 2;
        let troubled = WebhookNotifier::payload(&RunNotification::Finished(summary));
        assert_eq!(troubled["embeds"][0]["color"], TROUBLE_COLOR);
        assert!(
            troubled["embeds"][0]["description"]
                .as_str()
                .unwrap()
                .contains("errors=2")
        );
    }

    #[test]
    fn started_payload_names_host_and_limit() {
        let payload = WebhookNotifier::payload(&RunNotification::Started {
            run_id: RunId::from_ulid(Ulid::new()),
            host: "host-a".into(),
            at: Utc::now(),
            limit: 25,
            dry_run: true,
        });
        let text = payload["embeds"][0]["description"].as_str().unwrap();
        assert!(text.contains("host-a"));
        assert!(text.contains("limit 25, dry run"));
    }
}
