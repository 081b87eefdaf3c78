//! Fixed-rate tick scheduler.
//!
//! Every interval the scheduler gets one chance to call the script's
//! `OnTick(tickIndex)`. At most one call is ever in flight: if the previous
//! call is still running when the next interval arrives, that interval is
//! counted as a missed tick instead.
//!
//! # Threads
//!
//! The driver is a tokio task ticking a [`tokio::time::interval`]. When it
//! acquires the busy guard it hands the hook call to
//! [`tokio::task::spawn_blocking`], so a slow or sleeping script never stops
//! intervals from being counted. [`TickScheduler::fire`] runs one interval
//! synchronously on the calling thread; the driver and the tests share the
//! same two halves (`begin` then `run`).
//!
//! # Cancellation
//!
//! Cooperative only. Stopping cancels the driver between ticks; a hook
//! already running finishes first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::constants::AUTOMATION_LOG_TARGET;

use super::automation::{lock, AutomationCore};
use super::environment::Hook;
use super::lifecycle::{LifecycleEvent, LifecycleState};

/// Tick counters and the busy guard.
#[derive(Debug)]
pub struct TickState {
    /// Intervals elapsed, whether executed or skipped.
    tick_count: AtomicU64,
    /// Consecutive skips since the last completed tick.
    missed_ticks: AtomicU64,
    /// Held while an `OnTick` call is in flight.
    busy: AtomicBool,
    /// Publishes `tick_count` after every interval.
    progress: watch::Sender<u64>,
}

impl Default for TickState {
    fn default() -> Self {
        Self {
            tick_count: AtomicU64::new(0),
            missed_ticks: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            progress: watch::Sender::new(0),
        }
    }
}

impl TickState {
    /// Intervals elapsed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Consecutive skipped intervals since the last completed tick.
    #[must_use]
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.load(Ordering::Acquire)
    }

    /// Whether an `OnTick` call is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Receiver woken with the new `tick_count` after every interval.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.progress.subscribe()
    }

    /// Count a skipped interval; returns the consecutive-skip count.
    fn record_skip(&self) -> u64 {
        let missed = self.missed_ticks.fetch_add(1, Ordering::AcqRel) + 1;
        self.advance();
        missed
    }

    fn record_completed(&self) {
        self.missed_ticks.store(0, Ordering::Release);
        self.advance();
    }

    fn advance(&self) {
        let count = self.tick_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.progress.send_replace(count);
    }
}

/// What one interval did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The scheduler is stopped or the automation is no longer running.
    Stopped,
    /// A previous tick was still in flight.
    Skipped {
        /// Consecutive skips, including this one.
        missed: u64,
    },
    /// `OnTick` returned normally.
    Completed {
        /// Index passed to `OnTick`.
        index: u64,
        /// Time spent inside the hook.
        elapsed: Duration,
    },
    /// `OnTick` raised an error; the automation is now failed.
    Failed {
        /// Index passed to `OnTick`.
        index: u64,
    },
}

/// Right to run one `OnTick` call. Releases the busy guard on drop.
struct TickPermit {
    core: Arc<AutomationCore>,
    index: u64,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.core.ticks.release();
    }
}

enum Begin {
    Stop,
    Skip(u64),
    Run(TickPermit),
}

/// First half of an interval: state check and busy guard. Never blocks.
fn begin(core: &Arc<AutomationCore>) -> Begin {
    if core.is_cancelled() || core.state() != LifecycleState::Running {
        core.stop();
        return Begin::Stop;
    }

    if !core.ticks.try_acquire() {
        let missed = core.ticks.record_skip();
        log::warn!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Skipping a tick, missed {} ticks",
            core.owner.name,
            missed
        );
        return Begin::Skip(missed);
    }

    Begin::Run(TickPermit {
        index: core.ticks.tick_count(),
        core: Arc::clone(core),
    })
}

/// Second half: call `OnTick` under the environment lock.
fn run(permit: TickPermit, budget: Duration) -> TickOutcome {
    let core = Arc::clone(&permit.core);
    let mut env = core.lock_env();

    // An unload may have completed between `begin` and taking the lock.
    if core.state() != LifecycleState::Running {
        return TickOutcome::Stopped;
    }

    let started = Instant::now();
    let result = env.call_hook(Hook::OnTick, permit.index);
    let elapsed = started.elapsed();

    match result {
        Ok(()) => {
            if elapsed > budget {
                log::warn!(
                    target: AUTOMATION_LOG_TARGET,
                    "[{}] Tick function exceeded {} ms, took: {} ms",
                    core.owner.name,
                    budget.as_millis(),
                    elapsed.as_millis()
                );
            }
            core.ticks.record_completed();
            TickOutcome::Completed {
                index: permit.index,
                elapsed,
            }
        }
        Err(err) => {
            let error = err.to_script_error();
            log::error!(
                target: AUTOMATION_LOG_TARGET,
                "[{}] {} failed at tick {}: {}\n{}",
                core.owner.name,
                Hook::OnTick,
                permit.index,
                error.message,
                error.trace_or_empty()
            );
            core.fail(&mut env, LifecycleEvent::TickFailed, Hook::OnTick, error);
            TickOutcome::Failed {
                index: permit.index,
            }
        }
    }
}

/// Driver loop: one `begin` per interval, hook calls on the blocking pool.
async fn drive(core: Arc<AutomationCore>, interval: Duration) {
    let cancel = core.cancel_token();
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    // Every elapsed interval must reach `begin` so skips are counted.
    timer.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        match begin(&core) {
            Begin::Stop => break,
            Begin::Skip(_) => {}
            Begin::Run(permit) => {
                tokio::task::spawn_blocking(move || run(permit, interval));
            }
        }
    }

    log::debug!(
        target: AUTOMATION_LOG_TARGET,
        "[{}] Tick driver stopped after {} ticks",
        core.owner.name,
        core.ticks.tick_count()
    );
}

/// Fixed-interval driver for one automation's `OnTick` hook.
pub struct TickScheduler {
    core: Arc<AutomationCore>,
    interval: Duration,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickScheduler")
            .field("interval", &self.interval)
            .field("tick_count", &self.tick_count())
            .field("missed_ticks", &self.missed_ticks())
            .field("busy", &self.is_busy())
            .field("started", &lock(&self.driver).is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl TickScheduler {
    pub(crate) fn new(core: Arc<AutomationCore>, interval: Duration) -> Self {
        Self {
            core,
            interval,
            driver: Mutex::new(None),
        }
    }

    /// Interval between ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the driver task on `handle`.
    ///
    /// Returns `false` if the driver is already running or the scheduler has
    /// been stopped; a stopped scheduler never restarts.
    pub fn start(&self, handle: &Handle) -> bool {
        let mut driver = lock(&self.driver);
        if driver.is_some() {
            log::warn!(target: AUTOMATION_LOG_TARGET, "[{}] Tick driver already started", self.core.owner.name);
            return false;
        }
        if self.is_stopped() {
            log::warn!(target: AUTOMATION_LOG_TARGET, "[{}] Tick driver is stopped", self.core.owner.name);
            return false;
        }

        *driver = Some(handle.spawn(drive(Arc::clone(&self.core), self.interval)));
        log::debug!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Tick driver started ({:?} interval)",
            self.core.owner.name,
            self.interval
        );
        true
    }

    /// Stop the scheduler permanently. Idempotent.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Whether the scheduler has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Run one interval on the calling thread.
    ///
    /// Blocks for as long as `OnTick` runs. Intervals fired from other
    /// threads meanwhile observe the busy guard and are counted as missed.
    pub fn fire(&self) -> TickOutcome {
        match begin(&self.core) {
            Begin::Stop => TickOutcome::Stopped,
            Begin::Skip(missed) => TickOutcome::Skipped { missed },
            Begin::Run(permit) => run(permit, self.interval),
        }
    }

    /// Intervals elapsed, executed or skipped.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.core.ticks.tick_count()
    }

    /// Consecutive skips since the last completed tick.
    #[must_use]
    pub fn missed_ticks(&self) -> u64 {
        self.core.ticks.missed_ticks()
    }

    /// Whether an `OnTick` call is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.core.ticks.is_busy()
    }

    /// Receiver woken with the new tick count after every interval.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.core.ticks.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_state_skip_accounting() {
        let state = TickState::default();
        assert!(state.try_acquire());
        assert!(state.is_busy());
        assert!(!state.try_acquire());

        assert_eq!(state.record_skip(), 1);
        assert_eq!(state.record_skip(), 2);
        assert_eq!(state.tick_count(), 2);
        assert_eq!(state.missed_ticks(), 2);

        state.record_completed();
        state.release();
        assert_eq!(state.tick_count(), 3);
        assert_eq!(state.missed_ticks(), 0);
        assert!(!state.is_busy());
        assert!(state.try_acquire());
    }

    #[test]
    fn test_progress_follows_tick_count() {
        let state = TickState::default();
        let mut progress = state.subscribe();
        assert_eq!(*progress.borrow(), 0);
        assert!(!progress.has_changed().expect("Sender should be alive"));

        state.record_skip();
        assert!(progress.has_changed().expect("Sender should be alive"));
        assert_eq!(*progress.borrow_and_update(), 1);

        state.record_completed();
        state.record_completed();
        assert_eq!(*progress.borrow_and_update(), 3);
        assert_eq!(state.tick_count(), 3);
    }
}
