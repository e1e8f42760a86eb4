//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_AUDIT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT, DEFAULT_SLOW_QUERY_THRESHOLD,
    DEFAULT_UNLOCK_HISTORY_LIMIT,
};
use crate::{CoreError, CoreResult};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    slow_query_threshold: Duration,
    search_limit: usize,
    audit_history_limit: usize,
    unlock_history_limit: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if any of the limits is zero.
    pub fn new(
        slow_query_threshold: Duration,
        search_limit: usize,
        audit_history_limit: usize,
        unlock_history_limit: usize,
    ) -> CoreResult<Self> {
        if search_limit == 0 || audit_history_limit == 0 || unlock_history_limit == 0 {
            return Err(CoreError::invalid("result limits must be greater than zero"));
        }

        Ok(Self {
            slow_query_threshold,
            search_limit,
            audit_history_limit,
            unlock_history_limit,
        })
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    pub fn search_limit(&self) -> usize {
        self.search_limit
    }

    pub fn audit_history_limit(&self) -> usize {
        self.audit_history_limit
    }

    pub fn unlock_history_limit(&self) -> usize {
        self.unlock_history_limit
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
            search_limit: DEFAULT_SEARCH_LIMIT,
            audit_history_limit: DEFAULT_AUDIT_HISTORY_LIMIT,
            unlock_history_limit: DEFAULT_UNLOCK_HISTORY_LIMIT,
        }
    }
}

/// Parse a millisecond threshold from an optional environment value.
///
/// `None` or blank input yields the default threshold.
pub fn slow_query_threshold_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    match value {
        None => Ok(DEFAULT_SLOW_QUERY_THRESHOLD),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| CoreError::invalid(format!("invalid slow query threshold: {v}"))),
    }
}

/// Parse a positive limit from an optional environment value, falling back to `default`.
pub fn limit_from_env_value(value: Option<String>, default: usize) -> CoreResult<usize> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    match value {
        None => Ok(default),
        Some(v) => match v.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(CoreError::invalid(format!("invalid limit: {v}"))),
        },
    }
}
