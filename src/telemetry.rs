use anyhow::{Result, anyhow, bail};
use tracing::Level;

pub fn parse_log_level(raw: &str) -> Result<Level> {
    Ok(match raw.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        other => bail!("unknown log level '{other}'"),
    })
}

pub fn init(log_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(log_level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
