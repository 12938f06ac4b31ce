//! Recalculation settings.

use crate::error::{CalcError, CalcResult};
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const WORKERS_ENV: &str = "GRIDCALC_WORKERS";
pub const TIMEOUT_ENV: &str = "GRIDCALC_TIMEOUT_SECS";
pub const API_KEY_ENV: &str = "GRIDCALC_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcConfig {
    /// Worker threads per pass
    pub workers: usize,
    /// How long an idle worker blocks on the ready queue before re-checking
    pub poll_interval: Duration,
    /// How long cancelled workers get to finish before they are detached
    pub grace_period: Duration,
    /// Default limit for `calculate_with_timeout`
    pub timeout: Duration,
    /// Credentials passed along with cross-sheet fetches
    pub api_key: Option<String>,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            api_key: None,
        }
    }
}

impl RecalcConfig {
    /// Defaults overridden by `GRIDCALC_*` environment variables.
    pub fn from_env() -> CalcResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CalcResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(WORKERS_ENV) {
            config.workers = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CalcError::config(format!("{WORKERS_ENV} must be a positive integer, got '{raw}'"))
                })?;
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            config.timeout = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| *s > 0.0)
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or_else(|| {
                    CalcError::config(format!("{TIMEOUT_ENV} must be a positive number, got '{raw}'"))
                })?;
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            config.api_key = Some(key);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}
