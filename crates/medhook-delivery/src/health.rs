//! Endpoint health monitor.
//!
//! The failure-count increment and the `active -> failed` trip happen inside
//! the store, atomically with the delivery update. The monitor owns the
//! threshold it passes there and reports trips.

use medhook_core::AttemptApplied;
use tracing::warn;

/// Consecutive terminal failures that take an endpoint out of service.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Watches attempt outcomes for endpoints crossing the failure threshold.
#[derive(Debug)]
pub struct HealthMonitor {
    threshold: u32,
}

impl HealthMonitor {
    /// Creates a monitor tripping endpoints at `threshold` failures.
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Threshold handed to the store with each recorded attempt.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Reports a recorded attempt that tripped its endpoint.
    pub fn observe(&self, applied: &AttemptApplied) {
        if !applied.endpoint_tripped {
            return;
        }

        if let Some(endpoint) = &applied.endpoint {
            warn!(
                tenant_id = %endpoint.tenant_id,
                endpoint_id = %endpoint.id,
                failure_count = endpoint.failure_count,
                threshold = self.threshold,
                "endpoint marked failed after consecutive delivery failures"
            );
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
