// Tracing setup
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `level` accepts any `EnvFilter`
/// directive, e.g. `info` or `sqsfill=debug,aws_config=warn`.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;
    Ok(())
}
