//! SQLite-backed store: queue, inbox registry and telemetry in one file.
//!
//! The claim is a single conditional `UPDATE ... RETURNING` inside a
//! `BEGIN IMMEDIATE` transaction. Writers are serialized by SQLite, so a
//! second claimant waits at most `busy_timeout` and then sees the first
//! claim's row as `sending` and moves on to the next candidate. This holds
//! across processes sharing the database file.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with
//! microseconds so that string comparison is time comparison.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use tracing::{debug, info};

use crate::domain::{
    BLANK_CHARS, DayBounds, DripError, EmailId, EmailStatus, Inbox, InboxId, InboxStats, NewEmail,
    OutcomeCounts, QueuedEmail, SendEvent, SendEventKind, SendType, truncate_reason,
};
use crate::ports::{
    ABANDONED_REASON, ClaimRequest, Clock, IdGenerator, InboxRegistry, QueueCounts, QueueStore,
    ReclaimAction, TelemetrySink, UlidGenerator,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inboxes (
    id TEXT PRIMARY KEY,
    email_address TEXT NOT NULL UNIQUE COLLATE NOCASE,
    domain TEXT NOT NULL,
    daily_cap INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    paused INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    provider TEXT NOT NULL DEFAULT 'smtp',
    provider_config TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS email_queue (
    id TEXT PRIMARY KEY,
    to_email TEXT,
    subject TEXT,
    body_text TEXT,
    body_html TEXT,
    send_type TEXT,
    prompt_angle_id TEXT,
    template_id TEXT,
    inbox_id TEXT REFERENCES inboxes(id),
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK (status IN ('queued', 'sending', 'sent', 'error')),
    error TEXT,
    provider_message_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sent_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_email_queue_claim
    ON email_queue(status, created_at, id);
CREATE INDEX IF NOT EXISTS idx_email_queue_inbox_usage
    ON email_queue(inbox_id, status, sent_at);

CREATE TABLE IF NOT EXISTS send_events (
    id TEXT PRIMARY KEY,
    inbox_id TEXT,
    email_id TEXT,
    event_type TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_send_events_type_time
    ON send_events(event_type, created_at);
"#;

const EMAIL_COLUMNS: &str = "id, to_email, subject, body_text, body_html, send_type, \
     prompt_angle_id, template_id, inbox_id, status, error, provider_message_id, \
     created_at, updated_at, sent_at";

const INBOX_COLUMNS: &str = "id, email_address, domain, daily_cap, active, paused, \
     last_used_at, provider, provider_config";

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
    /// How long a writer waits for the database lock before the call fails
    /// as transient.
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database and apply the schema.
    pub fn open(config: &SqliteConfig, clock: Arc<dyn Clock>) -> Result<Self, DripError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| DripError::StoreUnavailable(format!("{}: {e}", parent.display())))?;
        }

        info!(path = %config.path.display(), "opening queue database");

        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
            path: config.path.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, DripError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, DripError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DripError::Storage("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(idx, &raw))
        .transpose()
}

fn row_to_email(row: &Row<'_>) -> rusqlite::Result<QueuedEmail> {
    let id: String = row.get(0)?;
    let inbox_id: Option<String> = row.get(8)?;
    let status: String = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(QueuedEmail {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        to_email: row.get(1)?,
        subject: row.get(2)?,
        body_text: row.get(3)?,
        body_html: row.get(4)?,
        send_type: row.get::<_, Option<String>>(5)?.map(SendType::new),
        prompt_angle_id: row.get(6)?,
        template_id: row.get(7)?,
        inbox_id: inbox_id
            .map(|raw| raw.parse())
            .transpose()
            .map_err(|e| conversion_error(8, e))?,
        status: status.parse().map_err(|e: String| conversion_error(9, e))?,
        error: row.get(10)?,
        provider_message_id: row.get(11)?,
        created_at: parse_ts(12, &created_at)?,
        updated_at: parse_ts(13, &updated_at)?,
        sent_at: opt_ts(row, 14)?,
    })
}

fn row_to_inbox(row: &Row<'_>) -> rusqlite::Result<Inbox> {
    let id: String = row.get(0)?;
    let provider_config: String = row.get(8)?;
    Ok(Inbox {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        email_address: row.get(1)?,
        domain: row.get(2)?,
        daily_cap: row.get(3)?,
        active: row.get(4)?,
        paused: row.get(5)?,
        last_used_at: opt_ts(row, 6)?,
        provider: row.get(7)?,
        provider_config: serde_json::from_str(&provider_config)
            .map_err(|e| conversion_error(8, e))?,
    })
}

/// `col` holds something other than whitespace, by the same rule as
/// `QueuedEmail::is_complete`.
fn filled(col: &str) -> String {
    format!("COALESCE(TRIM({col}, '{BLANK_CHARS}'), '') <> ''")
}

fn claim_sql(type_count: usize) -> String {
    let placeholders = (0..type_count)
        .map(|i| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE email_queue
            SET status = 'sending', inbox_id = ?1, updated_at = ?2
          WHERE id = (
                SELECT q.id FROM email_queue q
                 WHERE q.status = 'queued'
                   AND q.send_type IN ({placeholders})
                   AND {to}
                   AND {subject}
                   AND ({text} OR {html})
                   AND {angle}
                 ORDER BY q.created_at ASC, q.id ASC
                 LIMIT 1)
            AND status = 'queued'
            AND EXISTS (
                SELECT 1 FROM inboxes i
                 WHERE i.id = ?1 AND i.active = 1 AND i.paused = 0
                   AND (SELECT COUNT(*) FROM email_queue s
                         WHERE s.inbox_id = i.id
                           AND (s.status = 'sending'
                                OR (s.status = 'sent' AND s.sent_at >= ?3 AND s.sent_at < ?4))
                       ) < i.daily_cap)
        RETURNING {EMAIL_COLUMNS}",
        to = filled("q.to_email"),
        subject = filled("q.subject"),
        text = filled("q.body_text"),
        html = filled("q.body_html"),
        angle = filled("q.prompt_angle_id"),
    )
}

/// Terminal update of a `sending` row bound to `inbox_id`; explains a miss.
fn finalize(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    id: EmailId,
    to: EmailStatus,
) -> Result<(), DripError> {
    if conn.execute(sql, params)? == 1 {
        return Ok(());
    }
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM email_queue WHERE id = ?1",
            params![id.to_storage()],
            |row| row.get(0),
        )
        .optional()?;
    match current {
        None => Err(DripError::NotFound(id.to_string())),
        Some(raw) => Err(DripError::InvalidTransition {
            id,
            from: raw.parse().map_err(DripError::Storage)?,
            to,
        }),
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn enqueue(&self, email: NewEmail) -> Result<EmailId, DripError> {
        let id = self.ids.generate_email_id();
        let now = ts(self.clock.now());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO email_queue
                    (id, to_email, subject, body_text, body_html, send_type,
                     prompt_angle_id, template_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'queued', ?9, ?9)",
                params![
                    id.to_storage(),
                    email.to_email,
                    email.subject,
                    email.body_text,
                    email.body_html,
                    email.send_type.as_ref().map(|t| t.as_str().to_string()),
                    email.prompt_angle_id,
                    email.template_id,
                    now,
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn claim_one(&self, request: &ClaimRequest) -> Result<Option<QueuedEmail>, DripError> {
        if request.send_types.is_empty() {
            return Ok(None);
        }
        let sql = claim_sql(request.send_types.len());
        let mut values = vec![
            Value::Text(request.inbox_id.to_storage()),
            Value::Text(ts(request.now)),
            Value::Text(ts(request.day.start)),
            Value::Text(ts(request.day.end)),
        ];
        values.extend(
            request
                .send_types
                .iter()
                .map(|t| Value::Text(t.as_str().to_string())),
        );
        let inbox_id = request.inbox_id;

        let claimed = self
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let claimed = tx
                    .query_row(&sql, params_from_iter(values), row_to_email)
                    .optional()?;
                tx.commit()?;
                Ok(claimed)
            })
            .await?;

        if claimed.is_none() {
            debug!(inbox = %inbox_id, "claim found nothing");
        }
        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        let provider_message_id = provider_message_id.map(str::to_string);
        self.with_conn(move |conn| {
            finalize(
                conn,
                "UPDATE email_queue
                    SET status = 'sent', provider_message_id = ?3, sent_at = ?4,
                        updated_at = ?4, error = NULL
                  WHERE id = ?1 AND inbox_id = ?2 AND status = 'sending'",
                params![id.to_storage(), inbox_id.to_storage(), provider_message_id, ts(at)],
                id,
                EmailStatus::Sent,
            )
        })
        .await
    }

    async fn mark_error(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        let reason = truncate_reason(reason);
        self.with_conn(move |conn| {
            finalize(
                conn,
                "UPDATE email_queue
                    SET status = 'error', error = ?3, updated_at = ?4
                  WHERE id = ?1 AND inbox_id = ?2 AND status = 'sending'",
                params![id.to_storage(), inbox_id.to_storage(), reason, ts(at)],
                id,
                EmailStatus::Error,
            )
        })
        .await
    }

    async fn release(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        self.with_conn(move |conn| {
            finalize(
                conn,
                "UPDATE email_queue
                    SET status = 'queued', inbox_id = NULL, updated_at = ?3
                  WHERE id = ?1 AND inbox_id = ?2 AND status = 'sending'",
                params![id.to_storage(), inbox_id.to_storage(), ts(at)],
                id,
                EmailStatus::Queued,
            )
        })
        .await
    }

    async fn get(&self, id: EmailId) -> Result<Option<QueuedEmail>, DripError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {EMAIL_COLUMNS} FROM email_queue WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id.to_storage()], row_to_email)
                .optional()?)
        })
        .await
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, DripError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM email_queue GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = QueueCounts::default();
            for row in rows {
                let (status, n) = row?;
                let status: EmailStatus = status.parse().map_err(DripError::Storage)?;
                counts.add(status, n as usize);
            }
            Ok(counts)
        })
        .await
    }

    async fn count_claimable(&self, send_types: &[SendType]) -> Result<usize, DripError> {
        if send_types.is_empty() {
            return Ok(0);
        }
        let placeholders = (1..=send_types.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM email_queue q
              WHERE q.status = 'queued'
                AND q.send_type IN ({placeholders})
                AND {} AND {} AND ({} OR {}) AND {}",
            filled("q.to_email"),
            filled("q.subject"),
            filled("q.body_text"),
            filled("q.body_html"),
            filled("q.prompt_angle_id"),
        );
        let values: Vec<Value> = send_types
            .iter()
            .map(|t| Value::Text(t.as_str().to_string()))
            .collect();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn reclaim_stale(
        &self,
        older_than: DateTime<Utc>,
        action: ReclaimAction,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailId>, DripError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (target, reason) = match action {
                ReclaimAction::Requeue => (EmailStatus::Queued, None),
                ReclaimAction::Fail => (EmailStatus::Error, Some(ABANDONED_REASON)),
            };
            let mut ids = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "UPDATE email_queue
                        SET status = ?3,
                            inbox_id = CASE WHEN ?3 = 'queued' THEN NULL ELSE inbox_id END,
                            error = ?4,
                            updated_at = ?2
                      WHERE status = 'sending' AND updated_at < ?1
                     RETURNING id",
                )?;
                let rows = stmt.query_map(
                    params![ts(older_than), ts(now), target.as_str(), reason],
                    |row| row.get::<_, String>(0),
                )?;
                for raw in rows {
                    let raw = raw?;
                    ids.push(
                        raw.parse()
                            .map_err(|e| DripError::Storage(format!("bad id {raw}: {e}")))?,
                    );
                }
            }
            tx.commit()?;
            ids.sort();
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl InboxRegistry for SqliteStore {
    async fn upsert_inbox(&self, inbox: Inbox) -> Result<InboxId, DripError> {
        let config = serde_json::to_string(&inbox.provider_config)
            .map_err(|e| DripError::Config(format!("provider_config: {e}")))?;
        self.with_conn(move |conn| {
            let raw: String = conn.query_row(
                "INSERT INTO inboxes
                    (id, email_address, domain, daily_cap, active, paused,
                     last_used_at, provider, provider_config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(email_address) DO UPDATE SET
                    domain = excluded.domain,
                    daily_cap = excluded.daily_cap,
                    active = excluded.active,
                    paused = excluded.paused,
                    provider = excluded.provider,
                    provider_config = excluded.provider_config
                 RETURNING id",
                params![
                    inbox.id.to_storage(),
                    inbox.email_address,
                    inbox.domain,
                    inbox.daily_cap,
                    inbox.active,
                    inbox.paused,
                    inbox.last_used_at.map(ts),
                    inbox.provider,
                    config,
                ],
                |row| row.get(0),
            )?;
            raw.parse()
                .map_err(|e| DripError::Storage(format!("bad inbox id {raw}: {e}")))
        })
        .await
    }

    async fn find_by_address(&self, email_address: &str) -> Result<Option<Inbox>, DripError> {
        let email_address = email_address.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {INBOX_COLUMNS} FROM inboxes WHERE email_address = ?1");
            Ok(conn
                .query_row(&sql, params![email_address], row_to_inbox)
                .optional()?)
        })
        .await
    }

    async fn set_paused(&self, id: InboxId, paused: bool) -> Result<(), DripError> {
        self.with_conn(move |conn| {
            match conn.execute(
                "UPDATE inboxes SET paused = ?2 WHERE id = ?1",
                params![id.to_storage(), paused],
            )? {
                0 => Err(DripError::NotFound(id.to_string())),
                _ => Ok(()),
            }
        })
        .await
    }

    async fn set_active(&self, id: InboxId, active: bool) -> Result<(), DripError> {
        self.with_conn(move |conn| {
            match conn.execute(
                "UPDATE inboxes SET active = ?2 WHERE id = ?1",
                params![id.to_storage(), active],
            )? {
                0 => Err(DripError::NotFound(id.to_string())),
                _ => Ok(()),
            }
        })
        .await
    }

    async fn inbox_stats(&self, day: DayBounds) -> Result<Vec<InboxStats>, DripError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {INBOX_COLUMNS},
                    (SELECT COUNT(*) FROM email_queue s
                      WHERE s.inbox_id = inboxes.id AND s.status = 'sent'
                        AND s.sent_at >= ?1 AND s.sent_at < ?2),
                    (SELECT COUNT(*) FROM email_queue s
                      WHERE s.inbox_id = inboxes.id AND s.status = 'sending')
                 FROM inboxes ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![ts(day.start), ts(day.end)], |row| {
                Ok(InboxStats {
                    inbox: row_to_inbox(row)?,
                    sent_today: row.get(9)?,
                    in_flight: row.get(10)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn touch_last_used(&self, id: InboxId, at: DateTime<Utc>) -> Result<(), DripError> {
        self.with_conn(move |conn| {
            match conn.execute(
                "UPDATE inboxes SET last_used_at = ?2 WHERE id = ?1",
                params![id.to_storage(), ts(at)],
            )? {
                0 => Err(DripError::NotFound(id.to_string())),
                _ => Ok(()),
            }
        })
        .await
    }
}

#[async_trait]
impl TelemetrySink for SqliteStore {
    async fn record(&self, event: SendEvent) -> Result<(), DripError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO send_events (id, inbox_id, email_id, event_type, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.to_storage(),
                    event.inbox_id.map(|i| i.to_storage()),
                    event.email_id.map(|e| e.to_storage()),
                    event.kind.as_str(),
                    event.message,
                    ts(event.created_at),
                ],
            )
            .map_err(|e| DripError::Telemetry(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn outcome_counts_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, DripError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, COUNT(*) FROM send_events
                  WHERE created_at >= ?1 AND event_type IN (?2, ?3)
                  GROUP BY event_type",
            )?;
            let rows = stmt.query_map(
                params![
                    ts(since),
                    SendEventKind::SendSuccess.as_str(),
                    SendEventKind::SendError.as_str()
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?;
            let mut counts = OutcomeCounts::default();
            for row in rows {
                let (kind, n) = row?;
                match kind.parse::<SendEventKind>() {
                    Ok(SendEventKind::SendSuccess) => counts.successes = n as u64,
                    Ok(SendEventKind::SendError) => counts.errors = n as u64,
                    _ => {}
                }
            }
            Ok(counts)
        })
        .await
    }
}
