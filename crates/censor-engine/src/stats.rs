//! Engine Statistics
//!
//! Lock-free counters, mirrored into the `metrics` facade under `censor_*`
//! names for whichever recorder the host installs.

use censor_common::Action;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics (atomic, lock-free)
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Packets processed
    pub packets: AtomicU64,
    /// Payload bytes processed
    pub bytes: AtomicU64,
    /// Packets passed
    pub passed: AtomicU64,
    /// Packets dropped
    pub dropped: AtomicU64,
    /// Packets answered with reset
    pub reset: AtomicU64,
    /// Flows created
    pub flows_created: AtomicU64,
    /// Flows evicted
    pub flows_evicted: AtomicU64,
    /// Oracle calls made
    pub oracle_calls: AtomicU64,
    /// Oracle calls that failed or timed out
    pub oracle_failures: AtomicU64,
    /// Packets answered from a latched action
    pub latched_hits: AtomicU64,
}

impl EngineStats {
    #[inline(always)]
    pub(crate) fn record_packet(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("censor_packets_total").increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_action(&self, action: Action) {
        let counter = match action {
            Action::Pass => &self.passed,
            Action::Drop => &self.dropped,
            Action::Reset => &self.reset,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("censor_actions_total", "action" => action.as_str()).increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_flow_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("censor_flows_created_total").increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_flows_evicted(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.flows_evicted.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("censor_flows_evicted_total").increment(count);
    }

    #[inline(always)]
    pub(crate) fn record_oracle_call(&self) {
        self.oracle_calls.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("censor_oracle_calls_total").increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_oracle_failure(&self) {
        self.oracle_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("censor_oracle_failures_total").increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_latched_hit(&self) {
        self.latched_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_evicted: self.flows_evicted.load(Ordering::Relaxed),
            oracle_calls: self.oracle_calls.load(Ordering::Relaxed),
            oracle_failures: self.oracle_failures.load(Ordering::Relaxed),
            latched_hits: self.latched_hits.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EngineStatsSnapshot {
    /// Packets classified
    pub packets: u64,
    /// Payload bytes seen
    pub bytes: u64,
    /// Pass answers
    pub passed: u64,
    /// Drop answers
    pub dropped: u64,
    /// Reset answers
    pub reset: u64,
    /// Flow states created
    pub flows_created: u64,
    /// Flow states evicted (teardown, reset, idle)
    pub flows_evicted: u64,
    /// Oracle evaluations requested
    pub oracle_calls: u64,
    /// Oracle evaluations that failed open
    pub oracle_failures: u64,
    /// Packets answered from a latched action
    pub latched_hits: u64,
}

impl EngineStatsSnapshot {
    /// Flows currently tracked according to the counters
    pub fn active_flows(&self) -> u64 {
        self.flows_created.saturating_sub(self.flows_evicted)
    }

    /// Share of packets answered without inspection
    pub fn latched_hit_rate(&self) -> f64 {
        if self.packets == 0 {
            return 0.0;
        }
        self.latched_hits as f64 / self.packets as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = EngineStats::default();
        stats.record_packet(60);
        stats.record_packet(40);
        stats.record_action(Action::Drop);
        stats.record_action(Action::Pass);
        stats.record_flow_created();
        stats.record_flows_evicted(1);
        stats.record_latched_hit();

        let snap = stats.snapshot();
        assert_eq!(snap.packets, 2);
        assert_eq!(snap.bytes, 100);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.passed, 1);
        assert_eq!(snap.active_flows(), 0);
        assert_eq!(snap.latched_hit_rate(), 0.5);
    }
}
