//! Notifier port: optional start/finish messages for operators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DripError, RunId, RunSummary};

#[derive(Debug, Clone)]
pub enum RunNotification {
    Started {
        run_id: RunId,
        host: String,
        at: DateTime<Utc>,
        limit: u32,
        dry_run: bool,
    },
    Finished(RunSummary),
}

impl RunNotification {
    pub fn text(&self) -> String {
        match self {
            RunNotification::Started {
                run_id,
                host,
                at,
                limit,
                dry_run,
            } => format!(
                "send run {run_id} started on {host} at {} (limit {limit}{})",
                at.format("%Y-%m-%d %H:%M:%S UTC"),
                if *dry_run { ", dry run" } else { "" }
            ),
            RunNotification::Finished(summary) => {
                format!("send run {} {}", summary.run_id, summary.summary_line())
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &RunNotification) -> Result<(), DripError>;
}

/// Notifier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &RunNotification) -> Result<(), DripError> {
        Ok(())
    }
}
