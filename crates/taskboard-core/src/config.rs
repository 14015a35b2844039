use std::path::PathBuf;
use std::time::Duration;

use crate::models::CoreError;

pub const DATABASE_PATH_ENV: &str = "TASKBOARD_DB_PATH";
pub const BUSY_TIMEOUT_ENV: &str = "TASKBOARD_DB_BUSY_TIMEOUT_MS";

const DEFAULT_DATABASE_PATH: &str = "taskboard.sqlite3";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|value| !value.trim().is_empty()) {
            config.database_path = PathBuf::from(path.trim());
        }

        if let Some(raw) = lookup(BUSY_TIMEOUT_ENV) {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                CoreError::invalid_input(format!(
                    "{BUSY_TIMEOUT_ENV} must be a whole number of milliseconds, got '{raw}'"
                ))
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}
