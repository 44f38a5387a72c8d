//! Monotonic time source injected into the pipeline
//!
//! Frame timestamps drive all domain timers, so the clock only matters at
//! the edges: stamping frames in live adapters and pacing replay. Tests
//! use `VirtualClock` to reproduce dwell and escalation windows exactly.

use crate::domain::types::MonoTs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> MonoTs;
}

/// Wall clock anchored at construction time
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonoTs {
        MonoTs(self.origin.elapsed().as_secs_f64())
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Stores microseconds in an atomic so clones share the same timeline.
#[derive(Clone)]
pub struct VirtualClock {
    micros: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { micros: Arc::new(AtomicU64::new(0)) }
    }

    pub fn advance(&self, secs: f64) {
        let delta = (secs * 1e6).round() as u64;
        self.micros.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, secs: f64) {
        self.micros.store((secs * 1e6).round() as u64, Ordering::Relaxed);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> MonoTs {
        MonoTs(self.micros.load(Ordering::Relaxed) as f64 / 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b.0 >= a.0);
    }

    #[test]
    fn test_virtual_clock_advance() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now().0, 0.0);

        clock.advance(1.5);
        assert!((clock.now().0 - 1.5).abs() < 1e-6);

        clock.advance(0.033);
        assert!((clock.now().0 - 1.533).abs() < 1e-6);
    }

    #[test]
    fn test_virtual_clock_shared_across_clones() {
        let clock = VirtualClock::new();
        let other = clock.clone();

        clock.advance(2.0);
        assert!((other.now().0 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_virtual_clock_set() {
        let clock = VirtualClock::new();
        clock.set(45.0);
        assert!((clock.now().0 - 45.0).abs() < 1e-6);
    }
}
