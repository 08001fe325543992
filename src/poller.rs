//! Background refresh loop.
//!
//! Polls the datalog on the configured interval, keeps the data caches warm,
//! and logs machine state transitions. The dashboard itself is pull-based;
//! this task is what makes `/api/status` cheap and the logs useful between
//! page loads.

use crate::core::status::{machine_status, MachineState};
use crate::db::DataLoader;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Counters describing the poll loop, shared with the API.
#[derive(Debug, Default)]
pub struct PollStats {
    polls: AtomicU64,
    poll_errors: AtomicU64,
    last_state: Mutex<Option<MachineState>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl PollStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful poll; returns the previous state for
    /// transition logging.
    pub fn record_success(&self, state: MachineState) -> Option<MachineState> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        *self.last_success.lock().expect("poll stats lock") = Some(Utc::now());
        self.last_state
            .lock()
            .expect("poll stats lock")
            .replace(state)
    }

    /// Record a failed poll.
    pub fn record_error(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters.
    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            last_state: *self.last_state.lock().expect("poll stats lock"),
            last_success: *self.last_success.lock().expect("poll stats lock"),
        }
    }
}

/// Serializable view of [`PollStats`].
#[derive(Debug, Clone, Serialize)]
pub struct PollSnapshot {
    pub polls: u64,
    pub poll_errors: u64,
    pub last_state: Option<MachineState>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Spawn the poll loop. The first tick fires immediately to warm the caches.
pub fn spawn(loader: Arc<DataLoader>, stats: Arc<PollStats>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match loader.latest().await {
                Ok(rows) => {
                    let report = machine_status(&rows);
                    let previous = stats.record_success(report.state);

                    match previous {
                        Some(prev) if prev != report.state => {
                            tracing::info!(
                                "machine state changed: {prev} -> {}",
                                report.state
                            );
                        }
                        None => {
                            tracing::info!("machine state: {}", report.state);
                        }
                        _ => {
                            tracing::debug!(
                                "poll ok, state {} ({} rows)",
                                report.state,
                                rows.len()
                            );
                        }
                    }
                }
                Err(e) => {
                    stats.record_error();
                    tracing::warn!("datalog poll failed: {e}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_stats_counters() {
        let stats = PollStats::new();
        stats.record_error();
        assert_eq!(stats.snapshot().polls, 1);
        assert_eq!(stats.snapshot().poll_errors, 1);
        assert!(stats.snapshot().last_success.is_none());
    }

    #[test]
    fn test_record_success_returns_previous_state() {
        let stats = PollStats::new();
        assert_eq!(stats.record_success(MachineState::Running), None);
        assert_eq!(
            stats.record_success(MachineState::Idle),
            Some(MachineState::Running)
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.last_state, Some(MachineState::Idle));
        assert!(snapshot.last_success.is_some());
        assert_eq!(snapshot.poll_errors, 0);
    }
}
