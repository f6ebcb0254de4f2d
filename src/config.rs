use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

pub const LOG_ENV: &str = "ACADEMICD_LOG";
pub const DEFAULT_LOG_FILTER: &str = "info";

pub struct Config {
    pub workspace: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl Config {
    /// Read after the subscriber is up so fallbacks are logged.
    pub fn load() -> Self {
        Self {
            workspace: var("ACADEMICD_WORKSPACE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            busy_timeout: Duration::from_millis(try_load("ACADEMICD_BUSY_TIMEOUT_MS", 5000u64)),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("{key} not set, using default");
    })
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = var(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}
