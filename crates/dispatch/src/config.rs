//! Tunables for the dispatch pipeline.

use std::time::Duration;

/// Runtime configuration shared by the router, the endpoint executors,
/// and the delivery queue.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Ceiling on one user's total queued compute cost. Submissions that
    /// would push the user past it are rejected up front.
    pub user_cost_ceiling: f64,

    /// Jobs an endpoint may hold accepted-but-unfinished at once
    /// (one actively executing plus the buffered rest).
    pub pipeline_depth: usize,

    /// Times a job may enter the router before it is aborted for good.
    pub max_dispatch_attempts: u32,

    /// Times a delivery item may be attempted before it is dropped.
    pub max_delivery_attempts: u32,

    /// Fallback sleep when a scan pass finds nothing dispatchable.
    pub scan_backoff: Duration,

    /// Queue-wide pause after a transient delivery failure.
    pub delivery_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            user_cost_ceiling: 16.0,
            pipeline_depth: 2,
            max_dispatch_attempts: 3,
            max_delivery_attempts: 3,
            scan_backoff: Duration::from_millis(100),
            delivery_backoff: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `EASEL_*` environment variables.
    ///
    /// Unparseable values are logged and ignored rather than failing
    /// startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("EASEL_USER_COST_CEILING") {
            config.user_cost_ceiling = v;
        }
        if let Some(v) = env_parse("EASEL_PIPELINE_DEPTH") {
            config.pipeline_depth = v;
        }
        if let Some(v) = env_parse("EASEL_MAX_DISPATCH_ATTEMPTS") {
            config.max_dispatch_attempts = v;
        }
        if let Some(v) = env_parse("EASEL_MAX_DELIVERY_ATTEMPTS") {
            config.max_delivery_attempts = v;
        }
        if let Some(v) = env_parse("EASEL_SCAN_BACKOFF_MS") {
            config.scan_backoff = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("EASEL_DELIVERY_BACKOFF_MS") {
            config.delivery_backoff = Duration::from_millis(v);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, raw = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
