//! Prometheus counters for fetch and persistence activity.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    /// Every network attempt, retries included.
    pub fetch_attempts: IntCounter,

    /// Assets published into the cache directory.
    pub fetch_success: IntCounter,

    /// Assets that exhausted their retry budget.
    pub fetch_failure: IntCounter,

    /// Successful rewrites of the cache record file.
    pub cache_writes: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let fetch_attempts =
            IntCounter::new("font_fetch_attempts_total", "Font fetch attempts, including retries")?;
        let fetch_success =
            IntCounter::new("font_fetch_success_total", "Fonts fetched into the cache directory")?;
        let fetch_failure =
            IntCounter::new("font_fetch_failure_total", "Fonts that exhausted their retry budget")?;
        let cache_writes =
            IntCounter::new("font_cache_writes_total", "Rewrites of the cache record file")?;

        registry.register(Box::new(fetch_attempts.clone()))?;
        registry.register(Box::new(fetch_success.clone()))?;
        registry.register(Box::new(fetch_failure.clone()))?;
        registry.register(Box::new(cache_writes.clone()))?;

        Ok(Self {
            registry,
            fetch_attempts,
            fetch_success,
            fetch_failure,
            cache_writes,
        })
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
