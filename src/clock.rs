//! Wall clock access, so scans and watermark updates can run against a fixed time in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock yields UNIX timestamps in (fractional) seconds
pub trait Clock {
    fn now(&self) -> f64;
}

/// SystemClock reads the OS wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// FixedClock always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}
