//! Constants used throughout the PRISM core crate.

use std::time::Duration;

/// Store operations at or above this latency are reported as slow.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// Maximum rows returned by visit search.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Minimum trimmed length of a search query.
pub const MIN_SEARCH_QUERY_LEN: usize = 2;

/// Maximum audit entries returned for one record number.
pub const DEFAULT_AUDIT_HISTORY_LIMIT: usize = 200;

/// Maximum unlock events returned by the unlock history.
pub const DEFAULT_UNLOCK_HISTORY_LIMIT: usize = 100;

/// Statement text kept when logging a failed or slow query.
pub const LOGGED_QUERY_PREFIX_LEN: usize = 120;

/// Schema applied by [`crate::store::postgres::PgStore::migrate`].
pub const POSTGRES_SCHEMA: &str = include_str!("../migrations/0001_init.sql");
