use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// HTTP and HTML parsing crates are noisy at `info`.
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,html5ever=warn,selectors=warn";

/// Installs the stderr subscriber. `RUST_LOG` replaces the default filter.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
