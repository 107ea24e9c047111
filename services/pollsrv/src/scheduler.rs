//! Scheduler
//!
//! Runs a poll cycle immediately, then once per interval until the
//! shutdown token is cancelled. Cycles never overlap. A cycle that runs
//! past its next deadline drops the missed ticks, and the following cycle
//! starts one full interval after the overrun ends.

use std::time::Duration;

use chrono::Utc;
use errors::ServiceErrorTrait;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cycle::{run_cycle, CycleOptions, CycleReport};
use crate::error::Result;
use crate::registers::VariableTable;
use crate::session::DeviceSession;
use crate::sink::ReadingSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Poll until shutdown; failed cycles are logged and skipped
    Continuous,
    /// Poll once and return the cycle's outcome
    RunOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u64,
}

pub struct Scheduler<S, K> {
    session: S,
    sink: K,
    table: VariableTable,
    options: CycleOptions,
    interval: Duration,
    mode: SchedulerMode,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl<S, K> Scheduler<S, K>
where
    S: DeviceSession,
    K: ReadingSink,
{
    pub fn new(
        session: S,
        sink: K,
        table: VariableTable,
        options: CycleOptions,
        interval: Duration,
        mode: SchedulerMode,
    ) -> Self {
        Self {
            session,
            sink,
            table,
            options,
            interval,
            mode,
            state: SchedulerState::Stopped,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Poll until `shutdown` is cancelled (continuous) or once (run-once).
    ///
    /// Only run-once mode returns a cycle error. Cancellation is observed
    /// between cycles; a cycle in progress always completes.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.state = SchedulerState::Running;

        if self.mode == SchedulerMode::RunOnce {
            let result = self.poll(Utc::now()).await;
            self.state = SchedulerState::Stopped;
            return result.map(|_| ());
        }

        // Deadlines are anchored at the start of the first cycle
        let started_at = Instant::now();
        let mut ticker = interval_at(started_at + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if let Err(e) = self.poll(Utc::now()).await {
            self.report_failure(&e);
        }
        self.skip_overrun(&mut ticker, started_at);

        info!(
            "started; will poll {} every {} and write to {}",
            self.session.describe(),
            humantime::format_duration(self.interval),
            self.sink.describe()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Exit: shutdown requested");
                    break;
                }
                cycle_start = ticker.tick() => {
                    if let Err(e) = self.poll(Utc::now()).await {
                        self.report_failure(&e);
                    }
                    self.skip_overrun(&mut ticker, cycle_start);
                }
            }
        }

        self.state = SchedulerState::Stopped;
        Ok(())
    }

    async fn poll(&mut self, now: chrono::DateTime<Utc>) -> Result<CycleReport> {
        let result = run_cycle(
            &mut self.session,
            &self.sink,
            &self.table,
            &self.options,
            now,
        )
        .await;

        match &result {
            Ok(report) => {
                if self.stats.consecutive_failures > 0 {
                    info!(
                        "Polling recovered after {} failed cycles",
                        self.stats.consecutive_failures
                    );
                }
                self.stats.cycles_succeeded += 1;
                self.stats.consecutive_failures = 0;
                debug!(
                    "Cycle complete: {} statuses, {} values, {} persisted",
                    report.statuses, report.values, report.persisted
                );
            },
            Err(_) => {
                self.stats.cycles_failed += 1;
                self.stats.consecutive_failures += 1;
            },
        }

        result
    }

    /// Restart the ticker from now if the cycle begun at `cycle_start`
    /// ran into its next deadline
    fn skip_overrun(&self, ticker: &mut Interval, cycle_start: Instant) {
        let elapsed = cycle_start.elapsed();
        if elapsed >= self.interval {
            warn!(
                "Cycle took {}, longer than the {} interval; skipping missed polls",
                humantime::format_duration(elapsed),
                humantime::format_duration(self.interval)
            );
            ticker.reset();
        }
    }

    fn report_failure(&self, err: &crate::error::PollError) {
        error!(
            "[{}] {} (consecutive failures: {})",
            err.error_code(),
            err,
            self.stats.consecutive_failures
        );
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::registers::{RegisterType, VariableSpec};
    use crate::test_utils::{MemorySession, MemorySink};
    use tracing_test::traced_test;

    fn table() -> VariableTable {
        VariableTable::new(vec![
            VariableSpec::status("s", 1, 200, RegisterType::U16),
            VariableSpec::measurement("v", 1, 100, RegisterType::S16, 0.1, "V"),
        ])
        .unwrap()
    }

    fn scheduler(
        session: &MemorySession,
        sink: &MemorySink,
        mode: SchedulerMode,
    ) -> Scheduler<MemorySession, MemorySink> {
        Scheduler::new(
            session.clone(),
            sink.clone(),
            table(),
            CycleOptions::new("solar"),
            Duration::from_secs(10),
            mode,
        )
    }

    #[tokio::test]
    async fn test_run_once_success() {
        let session = MemorySession::filled(&table(), 0x0004);
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::RunOnce);

        scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.stats().cycles_succeeded, 1);
        assert_eq!(sink.len(), 2);
        assert_eq!(session.open_count(), 1);
    }

    #[tokio::test]
    async fn test_run_once_propagates_failure() {
        let session = MemorySession::filled(&table(), 0);
        session.fail_open(true);
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::RunOnce);

        let err = scheduler.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, PollError::ConnectionError(_)));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.stats().cycles_failed, 1);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_continuous_survives_failures_until_cancelled() {
        let session = MemorySession::filled(&table(), 0);
        session.fail_read_at(1, 100);
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::Continuous);
        let token = CancellationToken::new();

        // Cycles at t=0, 10s and 20s; cancelled at 25s
        let cancel = token.clone();
        let (result, ()) = tokio::join!(scheduler.run(token), async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            cancel.cancel();
        });

        result.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(
            scheduler.stats(),
            SchedulerStats {
                cycles_succeeded: 0,
                cycles_failed: 3,
                consecutive_failures: 3,
            }
        );
        assert!(sink.is_empty());
        assert_eq!(session.close_count(), 3);
        assert!(logs_contain("started; will poll memory://device every 10s"));
        assert!(logs_contain("POLLSRV_READ_FAILURE"));
        assert!(logs_contain("failed to read v (100)"));
        assert!(logs_contain("consecutive failures: 3"));
        assert!(logs_contain("Exit: shutdown requested"));

        // The banner follows the outcome of the first cycle
        logs_assert(|lines: &[&str]| {
            let first_failure = lines
                .iter()
                .position(|l| l.contains("consecutive failures: 1"))
                .ok_or("first cycle failure not logged")?;
            let banner = lines
                .iter()
                .position(|l| l.contains("started; will poll"))
                .ok_or("start banner not logged")?;
            if first_failure < banner {
                Ok(())
            } else {
                Err(format!("banner at {banner} precedes first cycle at {first_failure}"))
            }
        });
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_overrun_waits_full_interval_after_slow_cycle() {
        let table = VariableTable::new(vec![VariableSpec::measurement(
            "v",
            1,
            100,
            RegisterType::S16,
            0.1,
            "V",
        )])
        .unwrap();
        let session = MemorySession::filled(&table, 1);
        session.set_read_delay(Duration::from_secs(25));
        let sink = MemorySink::new();
        let mut scheduler = Scheduler::new(
            session.clone(),
            sink.clone(),
            table,
            CycleOptions::new("solar"),
            Duration::from_secs(10),
            SchedulerMode::Continuous,
        );
        let token = CancellationToken::new();
        let origin = Instant::now();

        // Each cycle takes 25s against a 10s interval; stop at 90s, mid-cycle
        let cancel = token.clone();
        let (result, ()) = tokio::join!(scheduler.run(token), async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            cancel.cancel();
        });
        result.unwrap();

        let starts: Vec<u64> = session
            .open_times()
            .iter()
            .map(|t| t.duration_since(origin).as_secs())
            .collect();
        assert_eq!(starts, vec![0, 35, 70]);

        // The cycle running at cancellation still completed
        assert_eq!(scheduler.stats().cycles_succeeded, 3);
        assert_eq!(sink.len(), 3);
        assert!(logs_contain("longer than the 10s interval"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_cycles_keep_fixed_cadence() {
        let session = MemorySession::filled(&table(), 0);
        session.set_read_delay(Duration::from_secs(3));
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::Continuous);
        let token = CancellationToken::new();
        let origin = Instant::now();

        // Two 3s reads per cycle stay inside the 10s interval
        let cancel = token.clone();
        let (result, ()) = tokio::join!(scheduler.run(token), async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            cancel.cancel();
        });
        result.unwrap();

        let starts: Vec<u64> = session
            .open_times()
            .iter()
            .map(|t| t.duration_since(origin).as_secs())
            .collect();
        assert_eq!(starts, vec![0, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_continuous_recovers() {
        let session = MemorySession::filled(&table(), 0);
        session.fail_open(true);
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::Continuous);
        let token = CancellationToken::new();

        let cancel = token.clone();
        let healer = session.clone();
        let (result, ()) = tokio::join!(scheduler.run(token), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            healer.clear_failures();
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });

        result.unwrap();
        let stats = scheduler.stats();
        assert_eq!(stats.cycles_failed, 1);
        assert_eq!(stats.cycles_succeeded, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(sink.len(), 2);
        assert!(logs_contain("Polling recovered after 1 failed cycles"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick() {
        let session = MemorySession::filled(&table(), 0);
        let sink = MemorySink::new();
        let mut scheduler = scheduler(&session, &sink, SchedulerMode::Continuous);
        let token = CancellationToken::new();
        token.cancel();

        scheduler.run(token).await.unwrap();

        // The initial cycle always runs
        assert_eq!(scheduler.stats().cycles_succeeded, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
