/// Completion Watcher - Wait for every unit to reach a terminal phase
///
/// **Core Responsibility:**
/// Drive each unit through Pending → Running → {Succeeded, Failed} as seen
/// by the platform, and stop when all are terminal, the deadline passes, or
/// the run is cancelled.
///
/// **Polling Rules:**
/// 1. Every cycle queries all non-terminal units concurrently
/// 2. A failed query is logged; the unit stays non-terminal for that cycle
/// 3. A query still unanswered at the deadline is abandoned as failed
/// 4. The last cycle happens exactly at the deadline
/// 5. Cancellation is observed between cycles
///
/// Running out of time is not fatal. The watcher returns a warning-class
/// error and leaves the units' last observed phases in place for the
/// harvester.
use crate::launcher::ExecutionUnit;
use crate::platform::Platform;
use futures_util::future::join_all;
use scorecard_common::{Result, ScorecardError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Strategy for waiting on a batch of units.
pub trait CompletionWatcher: Send + Sync {
    /// Returns `Ok(())` once every unit is terminal. Phases are updated in
    /// place on every path.
    fn await_all<P: Platform>(
        &self,
        platform: &P,
        units: &mut [ExecutionUnit],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Fixed-interval polling with a hard deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingWatcher {
    interval: Duration,
    deadline: Duration,
}

impl PollingWatcher {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            deadline,
        }
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, deadline)
    }
}

/// What one poll cycle observed.
#[derive(Debug, Default)]
struct Cycle {
    queried: usize,
    failed: usize,
    last_error: Option<String>,
}

impl Cycle {
    fn all_failed(&self) -> bool {
        self.queried > 0 && self.failed == self.queried
    }
}

impl CompletionWatcher for PollingWatcher {
    #[instrument(skip_all, fields(
        units = units.len(),
        interval_ms = self.interval.as_millis() as u64,
        deadline_s = self.deadline.as_secs()
    ))]
    async fn await_all<P: Platform>(
        &self,
        platform: &P,
        units: &mut [ExecutionUnit],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + self.deadline;

        loop {
            if cancel.is_cancelled() {
                return Err(ScorecardError::Cancelled {
                    pending: pending_names(units),
                });
            }

            let cycle = poll_cycle(platform, units, deadline).await;
            if units.iter().all(ExecutionUnit::is_terminal) {
                debug!("All units terminal");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                if cycle.all_failed() {
                    return Err(ScorecardError::Query(
                        cycle.last_error.unwrap_or_else(|| "status queries failed".to_string()),
                    ));
                }
                return Err(ScorecardError::Timeout {
                    waited: self.deadline,
                    pending: pending_names(units),
                });
            }

            let nap = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ScorecardError::Cancelled {
                        pending: pending_names(units),
                    });
                }
                _ = sleep(nap) => {}
            }
        }
    }
}

async fn poll_cycle<P: Platform>(platform: &P, units: &mut [ExecutionUnit], deadline: Instant) -> Cycle {
    let pending: Vec<usize> = (0..units.len()).filter(|&i| !units[i].is_terminal()).collect();

    let view: &[ExecutionUnit] = units;
    let queries = pending.iter().map(|&i| async move {
        let unit = &view[i];
        match timeout_at(deadline, platform.unit_phase(&unit.namespace, &unit.name)).await {
            Ok(answer) => answer.map_err(|e| e.to_string()),
            Err(_) => Err("status query did not answer before the wait deadline".to_string()),
        }
    });
    let answers = join_all(queries).await;

    let mut cycle = Cycle {
        queried: pending.len(),
        ..Default::default()
    };

    for (i, answer) in pending.into_iter().zip(answers) {
        let unit = &mut units[i];
        match answer {
            Ok(phase) => {
                if phase != unit.phase {
                    debug!(unit = %unit.name, from = %unit.phase, to = %phase, "Phase changed");
                    unit.phase = phase;
                }
            }
            Err(e) => {
                warn!(unit = %unit.name, error = %e, "Status query failed");
                cycle.failed += 1;
                cycle.last_error = Some(e);
            }
        }
    }

    cycle
}

fn pending_names(units: &[ExecutionUnit]) -> Vec<String> {
    units
        .iter()
        .filter(|u| !u.is_terminal())
        .map(|u| u.name.clone())
        .collect()
}
