use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Filter from `COMET_LOG`, then `RUST_LOG`, then `info`.
pub fn default_filter() -> EnvFilter {
    filter_from(|key| std::env::var(key).ok())
}

fn filter_from<F>(env: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    ["COMET_LOG", "RUST_LOG"]
        .into_iter()
        .filter_map(|key| env(key))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are no-ops so tests and
/// binaries can both call it.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}
