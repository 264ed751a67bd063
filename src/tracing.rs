use anyhow::anyhow;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::conf;

/// Logs to stderr at the configured level. `RUST_LOG`, when set, wins.
pub fn init() -> anyhow::Result<()> {
    let level = conf::global().log_level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let layer_stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_file(false)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(filter);
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layer_stderr),
    )
    .map_err(|error| anyhow!("Failed to set global tracing subscriber: {error}"))?;
    Ok(())
}
