//! Token-renewal counters
//!
//! Two monotonically increasing counters track operational-token renewal
//! outcomes. They live as explicit fields on a value owned by the
//! controller and shared by `Arc`, so status endpoints read the same
//! counters the scheduling loop increments without any global state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Renewal outcome counters
#[derive(Debug, Default)]
pub struct Metrics {
    renewals_succeeded: AtomicU64,
    renewals_failed: AtomicU64,
}

impl Metrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operational-token renewal
    pub fn record_renewal_success(&self) {
        self.renewals_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed operational-token renewal
    pub fn record_renewal_failure(&self) {
        self.renewals_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful renewals so far
    pub fn renewals_succeeded(&self) -> u64 {
        self.renewals_succeeded.load(Ordering::Relaxed)
    }

    /// Number of failed renewals so far
    pub fn renewals_failed(&self) -> u64 {
        self.renewals_failed.load(Ordering::Relaxed)
    }

    /// Render the counters in Prometheus text exposition format
    pub fn render(&self) -> String {
        format!(
            "# HELP warden_token_renewals_total Operational token renewals by outcome\n\
             # TYPE warden_token_renewals_total counter\n\
             warden_token_renewals_total{{outcome=\"success\"}} {}\n\
             warden_token_renewals_total{{outcome=\"failure\"}} {}\n",
            self.renewals_succeeded(),
            self.renewals_failed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.renewals_succeeded(), 0);
        assert_eq!(metrics.renewals_failed(), 0);
    }

    #[test]
    fn counters_only_increase() {
        let metrics = Metrics::new();
        metrics.record_renewal_success();
        metrics.record_renewal_success();
        metrics.record_renewal_failure();
        assert_eq!(metrics.renewals_succeeded(), 2);
        assert_eq!(metrics.renewals_failed(), 1);
    }

    #[test]
    fn renders_prometheus_text() {
        let metrics = Metrics::new();
        metrics.record_renewal_failure();
        let text = metrics.render();
        assert!(text.contains("# TYPE warden_token_renewals_total counter"));
        assert!(text.contains("outcome=\"success\"} 0"));
        assert!(text.contains("outcome=\"failure\"} 1"));
    }
}
