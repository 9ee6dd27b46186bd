//! Timing governor: feedback throttle and performance measurement.
//!
//! The governor observes cumulative emulated cycle counts against wall-clock
//! time. When the emulation runs ahead of the original hardware's cycle rate
//! it asks the driving execution unit to sleep; once per measurement interval
//! it reports achieved performance and throttle share, then re-baselines.
//!
//! The correction baseline is deliberately *not* advanced on every call:
//! successive corrections react to the cumulative drift since the last
//! measurement checkpoint, which converges instead of oscillating around
//! per-call snapshots.

use std::time::Instant;

use crate::event::{EventBus, GovernorEvent};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

/// Waits shorter than this are skipped; the scheduler cannot honor them
/// precisely anyway.
pub const MIN_WAIT_MS: u64 = 10;

/// Upper bound on a single throttle wait, so `stop()` is never blocked
/// behind a long sleep.
pub const MAX_WAIT_MS: u64 = 250;

/// Wall-clock length of one performance-measurement interval.
pub const MEASUREMENT_INTERVAL_MS: u64 = 10_000;

/// An execution unit the governor can pace.
///
/// Implemented by the CPU loop collaborator; `throttle` blocks the calling
/// thread, which is always the emulation thread itself.
pub trait Throttleable {
    /// Block the calling thread for approximately `ms` milliseconds.
    fn throttle(&mut self, ms: u64);

    /// Cumulative milliseconds spent throttled since the last reset.
    fn throttled_time(&self) -> u64;

    /// Clear the throttled-time accumulator.
    fn reset_throttle_time(&mut self);
}

pub struct TimingGovernor {
    target_hz: u64,
    throttling: bool,
    started: bool,
    last_correction_ms: u64,
    last_correction_cycles: u64,
    interval_start_ms: u64,
    interval_start_cycles: u64,
    next_measurement_ms: u64,
    last_performance: u32,
    last_throttle_pct: u32,
    epoch: Instant,
    events: EventBus<GovernorEvent>,
}

impl TimingGovernor {
    pub fn new(target_hz: u64) -> Self {
        Self {
            target_hz: target_hz.max(1),
            throttling: true,
            started: false,
            last_correction_ms: 0,
            last_correction_cycles: 0,
            interval_start_ms: 0,
            interval_start_cycles: 0,
            next_measurement_ms: 0,
            last_performance: 0,
            last_throttle_pct: 0,
            epoch: Instant::now(),
            events: EventBus::new(),
        }
    }

    pub fn target_speed(&self) -> u64 {
        self.target_hz
    }

    pub fn set_target_speed(&mut self, hz: u64) {
        if hz == 0 {
            log::warn!("ignoring zero target speed");
            return;
        }
        self.target_hz = hz;
    }

    pub fn is_throttling_enabled(&self) -> bool {
        self.throttling
    }

    pub fn set_throttling_enabled(&mut self, enabled: bool) {
        self.throttling = enabled;
    }

    /// Achieved speed over the last completed interval, percent of target.
    pub fn last_performance(&self) -> u32 {
        self.last_performance
    }

    /// Share of the last completed interval spent in throttle waits.
    pub fn throttle_percentage(&self) -> u32 {
        self.last_throttle_pct
    }

    /// Subscribe to performance reports.
    pub fn subscribe(&mut self, listener: impl Fn(&GovernorEvent) + Send + 'static) {
        self.events.subscribe(listener);
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Drive one tick of the correction and measurement periods.
    ///
    /// `cycles` is the cumulative emulated cycle count. Blocks only inside the
    /// collaborator's bounded throttle wait.
    pub fn measure(&mut self, cycles: u64, unit: &mut impl Throttleable) {
        self.measure_at(self.now_ms(), cycles, unit);
    }

    /// Re-baseline both periods at the current time and cycle count.
    ///
    /// Used after a pause so idle wall-clock time is not read as lost
    /// performance or artificial throttling.
    pub fn reset_measurement(&mut self, cycles: u64) {
        let now = self.now_ms();
        self.rebaseline(now, cycles);
    }

    fn rebaseline(&mut self, now: u64, cycles: u64) {
        self.started = true;
        self.last_correction_ms = now;
        self.last_correction_cycles = cycles;
        self.interval_start_ms = now;
        self.interval_start_cycles = cycles;
        self.next_measurement_ms = now + MEASUREMENT_INTERVAL_MS;
    }

    /// Period logic with an explicit clock, so tests can drive synthetic time.
    pub(crate) fn measure_at(&mut self, now: u64, cycles: u64, unit: &mut impl Throttleable) {
        if !self.started {
            // First call only records the baseline.
            self.rebaseline(now, cycles);
            unit.reset_throttle_time();
            return;
        }

        if self.throttling {
            let time_diff = now.saturating_sub(self.last_correction_ms);
            let cycles_diff = cycles.saturating_sub(self.last_correction_cycles);
            let expected_cycles = time_diff * self.target_hz / 1000;
            if cycles_diff > expected_cycles {
                let wait_ms = 1000 * (cycles_diff - expected_cycles) / self.target_hz;
                if wait_ms >= MIN_WAIT_MS {
                    unit.throttle(wait_ms.min(MAX_WAIT_MS));
                }
            }
        }

        if now >= self.next_measurement_ms {
            self.finish_interval(now, cycles, unit);
        }
    }

    fn finish_interval(&mut self, now: u64, cycles: u64, unit: &mut impl Throttleable) {
        let elapsed_ms = now.saturating_sub(self.interval_start_ms).max(1);
        let executed = cycles.saturating_sub(self.interval_start_cycles);

        self.last_throttle_pct = (100 * unit.throttled_time() / elapsed_ms).min(100) as u32;
        self.last_performance =
            (100_000 * executed / (self.target_hz * elapsed_ms)).min(u64::from(u32::MAX)) as u32;

        log::info!(
            "performance {}% of target ({} Hz), throttled {}% of the last {:.1}s",
            self.last_performance,
            self.target_hz,
            self.last_throttle_pct,
            elapsed_ms as f64 / 1000.0
        );
        self.events.emit(&GovernorEvent::PerformanceReport {
            performance_pct: self.last_performance,
            throttle_pct: self.last_throttle_pct,
        });

        unit.reset_throttle_time();
        self.rebaseline(now, cycles);
    }
}

impl Snapshot for TimingGovernor {
    fn save(&self, w: &mut SnapshotWriter) {
        // Wall-clock baselines are meaningless across a save/load boundary;
        // only the configuration is persisted and the periods re-arm on the
        // first measure after restore.
        w.write_u64(self.target_hz);
        w.write_bool(self.throttling);
    }

    fn restore(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let target_hz = r.read_u64()?;
        if target_hz == 0 {
            return Err(SnapshotError::FieldOutOfRange {
                field: "target_hz",
                value: 0,
            });
        }
        self.target_hz = target_hz;
        self.throttling = r.read_bool()?;
        self.started = false;
        self.last_performance = 0;
        self.last_throttle_pct = 0;
        Ok(())
    }
}
