//! Clock abstraction for deterministic scheduling.
//!
//! Retry times, lease expiry and the scheduler's poll sleep all read time
//! through [`Clock`], so tests can drive a retry schedule by advancing a
//! [`TestClock`] instead of waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of time for the engine.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, for measuring attempt durations.
    fn now(&self) -> Instant;

    /// Wall-clock time, for persisted timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the OS and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    system_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a clock starting at the current wall time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a clock starting at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            system_ns: Arc::new(AtomicU64::new(nanos_since_epoch(start))),
            base_instant: Instant::now(),
        }
    }

    /// Moves both monotonic and wall time forward.
    pub fn advance(&self, duration: Duration) {
        let ns = saturating_nanos(duration);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
        self.system_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Jumps wall time to `time`. Monotonic time only ever moves forward.
    pub fn jump_to(&self, time: SystemTime) {
        let target = nanos_since_epoch(time);
        let current = self.system_ns.load(Ordering::Acquire);
        if target > current {
            self.advance(Duration::from_nanos(target - current));
        } else {
            self.system_ns.store(target, Ordering::Release);
        }
    }

    /// Monotonic time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Virtual sleep: advance and let other tasks run.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn nanos_since_epoch(time: SystemTime) -> u64 {
    saturating_nanos(time.duration_since(UNIX_EPOCH).unwrap_or_default())
}
