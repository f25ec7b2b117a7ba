//! tracing setup for the `drip` binary.
//!
//! Logs go to stderr so stdout stays reserved for summaries and JSON.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for the drip
/// crates with `--verbose`.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let default = if verbose {
        "info,drip_core=debug,drip_cli=debug"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    Ok(())
}
