use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "TASKBOARD_LOG";

/// Installs a fmt subscriber filtered by `TASKBOARD_LOG`, then `RUST_LOG`,
/// then `info`. Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
