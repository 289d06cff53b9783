use std::env;
use std::time::Duration;

use crate::batch::PacingPolicy;
use crate::error::{Error, Result};
use crate::tracker::RateLimitAction;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RPM_LIMIT: u32 = 1000;
pub const DEFAULT_MIN_BATCH_INTERVAL: f64 = 5.0;
pub const DEFAULT_RATE_LIMIT_BUFFER: f64 = 0.9;
/// One day; no provider window is longer than that.
pub const MAX_BATCH_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub batch_size: usize,
    pub rpm_limit: u32,
    pub min_batch_interval: f64,
    pub request_timeout_secs: Option<u64>,
    pub rate_limit_buffer: f64,
    pub tracker_pacing: RateLimitAction,
    pub enforce_rpm: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "dxbench.db".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            rpm_limit: DEFAULT_RPM_LIMIT,
            min_batch_interval: DEFAULT_MIN_BATCH_INTERVAL,
            request_timeout_secs: None,
            rate_limit_buffer: DEFAULT_RATE_LIMIT_BUFFER,
            tracker_pacing: RateLimitAction::Warn,
            enforce_rpm: false,
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let database_path = env::var("DATABASE_PATH").unwrap_or(defaults.database_path);

        let batch_size = env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.batch_size);

        let rpm_limit = env::var("RPM_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rpm_limit);

        let min_batch_interval = env::var("MIN_BATCH_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_batch_interval);

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0);

        let rate_limit_buffer = env::var("RATE_LIMIT_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_buffer);

        let tracker_pacing = match env::var("TRACKER_PACING") {
            Ok(v) => v.parse().map_err(Error::Config)?,
            Err(_) => defaults.tracker_pacing,
        };

        let enforce_rpm = env::var("ENFORCE_RPM")
            .ok()
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let config = Self {
            database_path,
            batch_size,
            rpm_limit,
            min_batch_interval,
            request_timeout_secs,
            rate_limit_buffer,
            tracker_pacing,
            enforce_rpm,
            verbose: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if !(0.0..=MAX_BATCH_INTERVAL_SECS).contains(&self.min_batch_interval) {
            return Err(Error::Config(format!(
                "invalid minimum batch interval: {}",
                self.min_batch_interval
            )));
        }
        if !(self.rate_limit_buffer > 0.0 && self.rate_limit_buffer <= 1.0) {
            return Err(Error::Config(format!(
                "rate limit buffer must be in (0, 1], got {}",
                self.rate_limit_buffer
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Advisory ceiling; only enforced when `pacing.enforce_rpm` is set.
    pub rpm_limit: u32,
    pub pacing: PacingPolicy,
    pub request_timeout: Option<Duration>,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            rpm_limit: config.rpm_limit,
            pacing: PacingPolicy {
                interval: Duration::try_from_secs_f64(
                    config.min_batch_interval.clamp(0.0, MAX_BATCH_INTERVAL_SECS),
                )
                .unwrap_or(Duration::ZERO),
                tracker: config.tracker_pacing,
                enforce_rpm: config.enforce_rpm,
            },
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            verbose: config.verbose,
            show_progress: true,
        }
    }
}
