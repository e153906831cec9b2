//! Semaphore-based limits for the I/O and decode pools.
//!
//! Default sizes follow `min(num_cpus * factor, ceiling)`: network and disk
//! work mostly waits, so the I/O pool scales wide; decoding is CPU-bound, so
//! the decode pool stays near the core count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::LoadError;

pub const DEFAULT_IO_SCALING_FACTOR: usize = 8;
pub const DEFAULT_IO_CEILING: usize = 64;
pub const DEFAULT_DECODE_SCALING_FACTOR: usize = 1;
pub const DEFAULT_DECODE_CEILING: usize = 16;

/// Caps the number of concurrent operations of one kind.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    label: &'static str,
}

impl ConcurrencyLimiter {
    /// A limiter allowing `max_concurrent` operations (at least one).
    pub fn new(max_concurrent: usize, label: &'static str) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            label,
        }
    }

    /// `min(num_cpus * scaling_factor, ceiling)` permits.
    pub fn with_scaling(scaling_factor: usize, ceiling: usize, label: &'static str) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self::new((cpus * scaling_factor).min(ceiling), label)
    }

    pub fn io_default() -> Self {
        Self::with_scaling(DEFAULT_IO_SCALING_FACTOR, DEFAULT_IO_CEILING, "io")
    }

    pub fn decode_default() -> Self {
        Self::with_scaling(DEFAULT_DECODE_SCALING_FACTOR, DEFAULT_DECODE_CEILING, "decode")
    }

    /// Wait for a permit; it is returned when the guard drops.
    pub async fn acquire(&self) -> Result<ConcurrencyPermit<'_>, LoadError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Internal(format!("{} limiter closed", self.label)))?;

        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);

        Ok(ConcurrencyPermit {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            max_concurrent: self.max_permits,
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

/// Snapshot of a limiter's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

/// Held while an operation runs.
#[derive(Debug)]
pub struct ConcurrencyPermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for ConcurrencyPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
