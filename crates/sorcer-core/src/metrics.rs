//! Session-scoped atomic counters.
//!
//! Each [`Session`](crate::Session) owns one [`Metrics`]; nothing is global,
//! so tests observe only their own session. Call [`Metrics::flush`] to emit
//! the current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters, no allocations, no locking.
#[derive(Debug, Default)]
pub struct Metrics {
    resolutions: AtomicU64,
    cache_hits: AtomicU64,
    lookups: AtomicU64,
    evaluations: AtomicU64,
    morphs: AtomicU64,
    provisionings: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            resolutions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            morphs: AtomicU64::new(0),
            provisionings: AtomicU64::new(0),
        }
    }

    pub fn inc_resolutions(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// A binding was served from a cache (signature, instance or worker).
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    /// A discovery lookup was issued.
    pub fn inc_lookups(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lookups", "counter incremented");
    }

    /// A bound executable was invoked for a model path.
    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_morphs(&self) {
        self.morphs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_provisionings(&self) {
        self.provisionings.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "provisionings", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            resolutions = self.resolutions(),
            cache_hits = self.cache_hits(),
            lookups = self.lookups(),
            evaluations = self.evaluations(),
            morphs = self.morphs(),
            provisionings = self.provisionings(),
        );
    }

    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn morphs(&self) -> u64 {
        self.morphs.load(Ordering::Relaxed)
    }

    pub fn provisionings(&self) -> u64 {
        self.provisionings.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let m = Metrics::new();
        m.inc_resolutions();
        m.inc_resolutions();
        m.inc_lookups();
        m.inc_morphs();
        assert_eq!(m.resolutions(), 2);
        assert_eq!(m.lookups(), 1);
        assert_eq!(m.morphs(), 1);
        assert_eq!(m.cache_hits(), 0);
        assert_eq!(m.provisionings(), 0);
        m.flush();
    }
}
