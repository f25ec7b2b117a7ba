//! `drip`: scheduler and operator entry point for the send queue.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use drip_core::app::{OrchestratorBuilder, Reaper, StatusView};
use drip_core::config::{SenderConfig, TransportKind};
use drip_core::domain::{Inbox, NewEmail, classify_send_type};
use drip_core::impls::{DryRunTransport, FileRunLock, SmtpTransport, SqliteStore, WebhookNotifier};
use drip_core::policy::SendWindow;
use drip_core::ports::{
    Clock, IdGenerator, InboxRegistry, NoopNotifier, Notifier, QueueStore, ReclaimAction,
    SystemClock, Transport, UlidGenerator,
};

#[derive(Debug, Parser)]
#[command(name = "drip", version, about = "Claim and send queued outreach mail")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, env = "DRIP_CONFIG", default_value = "drip.toml")]
    config: PathBuf,

    /// Queue database; overrides `[store] path`.
    #[arg(long, global = true, env = "DRIP_DB")]
    db: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one send pass.
    Run(RunArgs),
    /// Print queue counts and inbox capacity as JSON.
    Status,
    /// Reclaim rows abandoned in `sending`.
    Reap(ReapArgs),
    /// Manage sending inboxes.
    Inbox {
        #[command(subcommand)]
        command: InboxCommand,
    },
    /// Load build output (one JSON record per line) into the queue.
    Enqueue {
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// cold, friendly or mixed.
    #[arg(long)]
    mode: Option<String>,
    /// COLD:FRIENDLY weights for mixed mode, e.g. 60:40.
    #[arg(long)]
    ratio: Option<String>,
    /// Cap on cold sends in this run.
    #[arg(long)]
    drip_per_run: Option<u32>,
    /// Cap on all claims in this run.
    #[arg(long)]
    limit: Option<u32>,
    /// Wait up to this long for eligible work before giving up.
    #[arg(long)]
    allow_wait_secs: Option<u64>,
    #[arg(long)]
    min_delay: Option<f64>,
    #[arg(long)]
    max_delay: Option<f64>,
    /// Send regardless of the configured window.
    #[arg(long)]
    ignore_window: bool,
    /// Go through the motions without touching SMTP.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ReapArgs {
    #[arg(long)]
    stale_after_secs: Option<u64>,
    /// Mark abandoned rows as `error` instead of requeueing them.
    #[arg(long)]
    fail: bool,
    /// Keep reaping on this interval until interrupted.
    #[arg(long)]
    every_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum InboxCommand {
    /// Add an SMTP inbox, or update it if the address exists.
    Add {
        address: String,
        #[arg(long, default_value_t = 30)]
        daily_cap: u32,
        #[arg(long)]
        smtp_host: String,
        #[arg(long, default_value_t = 587)]
        smtp_port: u16,
        #[arg(long)]
        username: Option<String>,
        /// Environment variable holding the SMTP password.
        #[arg(long)]
        password_env: Option<String>,
        #[arg(long, default_value = "starttls", value_parser = ["starttls", "implicit", "none"])]
        tls: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    List,
    Pause {
        address: String,
    },
    Resume {
        address: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("{err:#}");
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = SenderConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Status => status(&config).await,
        Command::Reap(args) => reap(config, args).await,
        Command::Inbox { command } => inbox(&config, command).await,
        Command::Enqueue { file } => enqueue(&config, &file).await,
    }
}

fn open_store(config: &SenderConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.sqlite(), clock)
        .with_context(|| format!("opening {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

async fn run(mut config: SenderConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let overrides = &mut config.run;
    if let Some(mode) = args.mode {
        overrides.mode = mode;
    }
    if args.ratio.is_some() {
        overrides.ratio = args.ratio;
    }
    if args.drip_per_run.is_some() {
        overrides.drip_per_run = args.drip_per_run;
    }
    if let Some(limit) = args.limit {
        overrides.limit = limit;
    }
    if let Some(wait) = args.allow_wait_secs {
        overrides.allow_wait_secs = wait;
    }
    if let Some(min) = args.min_delay {
        overrides.min_delay_secs = min;
    }
    if let Some(max) = args.max_delay {
        overrides.max_delay_secs = max;
    }
    if args.ignore_window {
        config.schedule.window = SendWindow::Always;
    }
    if args.dry_run {
        config.transport.kind = TransportKind::DryRun;
    }

    // Configuration problems end the run here, before the lock or any claim.
    let settings = config.to_run_settings().context("invalid configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config, Arc::clone(&clock))?;
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Smtp => Arc::new(SmtpTransport::new()),
        TransportKind::DryRun => Arc::new(DryRunTransport),
    };
    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };

    let orchestrator = OrchestratorBuilder::new()
        .store(store.clone())
        .registry(store.clone())
        .telemetry(store)
        .transport(transport)
        .lock(Arc::new(FileRunLock::new(config.lock.path.clone())))
        .notifier(notifier)
        .clock(clock)
        .settings(settings)
        .build()?;

    let summary = orchestrator.run().await.context("send run failed")?;
    println!("{}", summary.summary_line());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

async fn status(config: &SenderConfig) -> anyhow::Result<ExitCode> {
    let clock = SystemClock;
    let store = open_store(config, Arc::new(clock))?;
    let view = StatusView::collect(&*store, &*store, clock.now(), config.utc_offset()?)
        .await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(ExitCode::SUCCESS)
}

async fn reap(config: SenderConfig, args: ReapArgs) -> anyhow::Result<ExitCode> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config, Arc::clone(&clock))?;
    let stale_after = args.stale_after_secs.unwrap_or(config.reaper.stale_after_secs);
    let action = if args.fail {
        ReclaimAction::Fail
    } else {
        config.reaper.action
    };
    let stale_after = chrono::TimeDelta::try_seconds(stale_after as i64)
        .context("stale-after is out of range")?;
    let reaper = Reaper::new(store, clock, stale_after, action);

    match args.every_secs {
        None => {
            let reclaimed = reaper.reap_once().await?;
            println!("{}", serde_json::to_string(&reclaimed)?);
        }
        Some(0) => bail!("--every-secs must be positive"),
        Some(secs) => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; stopping reaper");
                }
                let _ = tx.send(true);
            });
            let total = reaper.run(Duration::from_secs(secs), rx).await;
            info!(total, "reaper stopped");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn inbox(config: &SenderConfig, command: InboxCommand) -> anyhow::Result<ExitCode> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(config, Arc::clone(&clock))?;

    match command {
        InboxCommand::Add {
            address,
            daily_cap,
            smtp_host,
            smtp_port,
            username,
            password_env,
            tls,
            display_name,
        } => {
            if !address.contains('@') {
                bail!("{address:?} is not an email address");
            }
            let ids = UlidGenerator::new(clock);
            let mut inbox = Inbox::new(ids.generate_inbox_id(), &address, daily_cap);
            inbox.provider_config = serde_json::json!({
                "host": smtp_host,
                "port": smtp_port,
                "username": username,
                "password_env": password_env,
                "tls": tls,
                "display_name": display_name,
            });
            let id = store.upsert_inbox(inbox).await?;
            info!(inbox = %id, address, daily_cap, "inbox saved");
            println!("{id}");
        }
        InboxCommand::List => {
            let view = StatusView::collect(
                &*store,
                &*store,
                clock.now(),
                config.utc_offset()?,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&view.inboxes)?);
        }
        InboxCommand::Pause { address } => set_paused(&*store, &address, true).await?,
        InboxCommand::Resume { address } => set_paused(&*store, &address, false).await?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn set_paused(registry: &dyn InboxRegistry, address: &str, paused: bool) -> anyhow::Result<()> {
    let inbox = registry
        .find_by_address(address)
        .await?
        .with_context(|| format!("no inbox {address}"))?;
    registry.set_paused(inbox.id, paused).await?;
    info!(inbox = %inbox.id, address, paused, "inbox updated");
    Ok(())
}

async fn enqueue(config: &SenderConfig, file: &Path) -> anyhow::Result<ExitCode> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let store = open_store(config, Arc::new(SystemClock))?;

    let mut queued = 0usize;
    let mut incomplete = 0usize;
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut email: NewEmail = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid record", file.display(), n + 1))?;
        if email.send_type.is_none()
            && let Some(to) = &email.to_email
        {
            email.send_type = Some(classify_send_type(to, &config.friendly_domains));
        }
        let id = store.enqueue(email).await?;
        if !store.get(id).await?.is_some_and(|e| e.is_complete()) {
            warn!(email_id = %id, line = n + 1, "record is incomplete and will not be claimed");
            incomplete += 1;
        }
        queued += 1;
    }

    info!(queued, incomplete, "enqueue finished");
    println!("{}", serde_json::json!({ "queued": queued, "incomplete": incomplete }));
    Ok(ExitCode::SUCCESS)
}
