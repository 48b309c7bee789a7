//! Queue monitor
//!
//! Periodically reports what the guard is holding. Purely observational:
//! it lists entries and never queues, permits or releases anything.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::engine::{DelayGuard, GuardError};
use super::types::Address;

/// Summary state of the queue at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Nothing queued
    Idle,
    /// Entries queued, none past cooldown
    Hold,
    /// At least one entry can be permitted on its next check
    Ready,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Idle => write!(f, "idle"),
            MonitorStatus::Hold => write!(f, "hold"),
            MonitorStatus::Ready => write!(f, "ready"),
        }
    }
}

/// One poll result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorRecord {
    pub cycle: u32,
    pub pending: usize,
    pub ready: usize,
    /// Seconds until the next locked entry unlocks
    pub next_ready_in: Option<u64>,
    pub status: MonitorStatus,
}

pub struct GuardMonitor {
    guard: Arc<DelayGuard>,
    caller: Address,
}

impl GuardMonitor {
    /// `caller` must be allowed to list the queue
    pub fn new(guard: Arc<DelayGuard>, caller: Address) -> Self {
        Self { guard, caller }
    }

    /// Take a single snapshot
    pub fn poll(&self, cycle: u32) -> Result<MonitorRecord, GuardError> {
        let entries = self.guard.pending(&self.caller)?;

        let ready = entries.iter().filter(|e| e.is_ready()).count();
        let next_ready_in = entries
            .iter()
            .filter(|e| !e.is_ready())
            .map(|e| e.remaining)
            .min();

        let status = if entries.is_empty() {
            MonitorStatus::Idle
        } else if ready > 0 {
            MonitorStatus::Ready
        } else {
            MonitorStatus::Hold
        };

        let record = MonitorRecord {
            cycle,
            pending: entries.len(),
            ready,
            next_ready_in,
            status,
        };

        info!(
            cycle,
            pending = record.pending,
            ready = record.ready,
            next_ready_in = ?record.next_ready_in,
            status = %record.status,
            "Guard monitor cycle"
        );
        Ok(record)
    }

    /// Poll `cycles` times, `interval` apart
    ///
    /// The first poll happens immediately.
    pub async fn run(
        &self,
        cycles: u32,
        interval: Duration,
    ) -> Result<Vec<MonitorRecord>, GuardError> {
        let mut ticker = tokio::time::interval(interval);
        let mut records = Vec::new();

        for cycle in 1..=cycles {
            ticker.tick().await;
            records.push(self.poll(cycle)?);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::clock::ManualClock;
    use crate::guard::engine::GuardConfig;
    use crate::guard::events::MemorySink;
    use crate::guard::store::MemoryStore;
    use crate::guard::types::SafeTransaction;

    fn principal() -> Address {
        Address::from_bytes([0xaa; 20])
    }

    fn setup() -> (Arc<DelayGuard>, Arc<ManualClock>, Arc<MemorySink>) {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let guard = DelayGuard::new(
            GuardConfig::new(principal()).with_delay(100),
            Arc::new(MemoryStore::new()),
            sink.clone(),
            clock.clone(),
        )
        .unwrap();
        (Arc::new(guard), clock, sink)
    }

    #[test]
    fn test_poll_statuses() {
        let (guard, clock, _) = setup();
        let monitor = GuardMonitor::new(guard.clone(), principal());

        assert_eq!(monitor.poll(1).unwrap().status, MonitorStatus::Idle);

        let tx = SafeTransaction::call(Address::from_bytes([1u8; 20]), vec![]);
        let _ = guard.check_pending(&principal(), &tx);

        clock.set(40);
        let record = monitor.poll(2).unwrap();
        assert_eq!(record.status, MonitorStatus::Hold);
        assert_eq!(record.next_ready_in, Some(60));

        clock.set(100);
        let record = monitor.poll(3).unwrap();
        assert_eq!(record.status, MonitorStatus::Ready);
        assert_eq!(record.ready, 1);
        assert_eq!(record.next_ready_in, None);
    }

    #[tokio::test]
    async fn test_run_cycles() {
        let (guard, _, sink) = setup();
        let monitor = GuardMonitor::new(guard, principal());

        let records = monitor.run(3, Duration::from_millis(1)).await.unwrap();
        let cycles: Vec<u32> = records.iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3]);

        // Listing is read-only and emits nothing
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_huge_cycle_count_starts_polling() {
        let (guard, _, _) = setup();
        let monitor = GuardMonitor::new(guard, principal());

        // Polls until cancelled instead of reserving room for every cycle
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            monitor.run(u32::MAX, Duration::from_millis(1)),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_unauthorized_caller() {
        let (guard, _, _) = setup();
        let monitor = GuardMonitor::new(guard, Address::from_bytes([0xbb; 20]));

        let result = monitor.run(1, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(GuardError::Unauthorized(_))));
    }
}
