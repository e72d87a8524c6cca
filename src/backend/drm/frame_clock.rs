//! Per-output frame pacing
//!
//! The [`FrameClock`] predicts when the next commit of an output will complete. The prediction
//! is always the last completion plus a whole number of refresh intervals, pushed far enough
//! ahead of the current time that the frame rendered for it can still make the deadline.
//! The animation counter follows the predicted completion, so frames the hardware never
//! showed are skipped instead of slowing the animation down.

use std::time::Duration;

use drm::control::Mode;
use tracing::{debug, trace};

use super::error::Error;
use crate::utils::{Monotonic, Time};

/// Default time a frame has to be ready before its predicted completion
pub const DEFAULT_MARGIN: Duration = Duration::from_millis(4);
/// Default deviation between prediction and completion considered worth reporting
pub const DEFAULT_DRIFT_TOLERANCE: Duration = Duration::from_millis(1);

/// Refresh rate of a mode in millihertz
pub fn refresh_mhz(clock_khz: u32, htotal: u16, vtotal: u16) -> u64 {
    if htotal == 0 || vtotal == 0 {
        return 0;
    }
    let htotal = htotal as u64;
    let vtotal = vtotal as u64;
    (clock_khz as u64 * 1_000_000 / htotal + vtotal / 2) / vtotal
}

/// Length of one refresh cycle for a refresh rate in millihertz
pub fn refresh_interval(mhz: u64) -> Option<Duration> {
    if mhz == 0 {
        return None;
    }
    Some(Duration::from_nanos(1_000_000_000_000 / mhz))
}

/// Length of one refresh cycle of `mode`
pub fn mode_refresh_interval(mode: &Mode) -> Result<Duration, Error> {
    let (_, _, htotal) = mode.hsync();
    let (_, _, vtotal) = mode.vsync();
    refresh_interval(refresh_mhz(mode.clock(), htotal, vtotal)).ok_or(Error::InvalidRefresh(*mode))
}

/// Completion predictor and animation counter of one output
#[derive(Debug, Clone)]
pub struct FrameClock {
    refresh: Duration,
    margin: Duration,
    drift_tolerance: Duration,
    period: u64,
    frame: u64,
    last_completion: Option<Time<Monotonic>>,
    next_expected: Option<Time<Monotonic>>,
    counted_target: Option<Time<Monotonic>>,
    fresh_completion: bool,
}

impl FrameClock {
    /// Create a clock for a refresh interval, animating over `period` frames
    pub fn new(refresh: Duration, period: u64) -> Self {
        assert!(!refresh.is_zero(), "refresh interval must not be zero");
        FrameClock {
            refresh,
            margin: DEFAULT_MARGIN,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            period: period.max(1),
            frame: 0,
            last_completion: None,
            next_expected: None,
            counted_target: None,
            fresh_completion: false,
        }
    }

    /// Set the time a frame has to be ready before its predicted completion
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Set the deviation between prediction and completion worth reporting
    pub fn with_drift_tolerance(mut self, tolerance: Duration) -> Self {
        self.drift_tolerance = tolerance;
        self
    }

    /// Length of one refresh cycle
    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    /// Completion time of the last commit, `None` before the first one completed
    pub fn last_completion(&self) -> Option<Time<Monotonic>> {
        self.last_completion
    }

    /// Completion time the frame currently being prepared is rendered for
    pub fn next_expected(&self) -> Option<Time<Monotonic>> {
        self.next_expected
    }

    /// Current animation frame, `0..period`
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Predict the completion of the next commit and move the animation to it.
    ///
    /// The prediction is `last_completion + k * refresh` with the smallest `k >= 1`
    /// reaching at least `now + margin`. Without any completion yet, `now` is used as base.
    /// The animation advances by the number of refresh cycles between the previous and the
    /// new prediction, at least one after a fresh completion. Calling this again without a
    /// new completion and with the same `now` changes nothing.
    ///
    /// Returns the animation frame to render.
    #[profiling::function]
    pub fn advance(&mut self, now: Time<Monotonic>) -> u64 {
        let interval = self.refresh.as_nanos() as u64;
        let base = self.last_completion.unwrap_or(now).as_nanos();
        let deadline = (now + self.margin).as_nanos();

        let mut cycles = 1;
        if base + interval < deadline {
            cycles = (deadline - base + interval - 1) / interval;
        }
        let target = Time::<Monotonic>::from_nanos(base + cycles * interval);

        if let Some(previous) = self.counted_target {
            let mut steps = if target > previous {
                let ahead = target.as_nanos() - previous.as_nanos();
                (ahead + interval / 2) / interval
            } else {
                0
            };
            if self.fresh_completion {
                steps = steps.max(1);
            }
            if steps > 1 {
                debug!(steps, "catching up on missed frames");
            }
            self.frame = (self.frame + steps) % self.period;
        }
        self.fresh_completion = false;
        self.counted_target = Some(target);
        self.next_expected = Some(target);

        trace!(?now, ?target, cycles, frame = self.frame, "frame clock advanced");
        self.frame
    }

    /// Record the completion of a commit.
    ///
    /// Returns the deviation from the prediction if it exceeded the drift tolerance.
    /// The deviation is a diagnostic only.
    pub fn record_completion(&mut self, time: Time<Monotonic>) -> Option<Duration> {
        let drift = self
            .next_expected
            .map(|expected| expected.abs_diff(time))
            .filter(|drift| *drift > self.drift_tolerance);
        if let Some(drift) = drift {
            debug!(
                ?drift,
                expected = ?self.next_expected,
                actual = ?time,
                "frame completion drifted from prediction"
            );
        }
        self.last_completion = Some(time);
        self.fresh_completion = true;
        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: u64 = 16_666_666;

    fn at(nanos: u64) -> Time<Monotonic> {
        Time::from_nanos(nanos)
    }

    fn clock() -> FrameClock {
        FrameClock::new(Duration::from_nanos(INTERVAL), 60)
    }

    #[test]
    fn refresh_of_common_modes() {
        // 1920x1080@60, CEA timing
        assert_eq!(refresh_mhz(148_500, 2200, 1125), 60_000);
        assert_eq!(refresh_interval(60_000), Some(Duration::from_nanos(16_666_666)));
        // 2560x1440@59.951, CVT reduced blanking
        assert_eq!(refresh_mhz(241_500, 2720, 1481), 59_951);
        assert_eq!(refresh_mhz(148_500, 0, 1125), 0);
        assert_eq!(refresh_interval(0), None);
    }

    #[test]
    fn first_advance_targets_one_interval_ahead() {
        let mut clock = clock();
        let now = at(1_000_000_000);
        assert_eq!(clock.advance(now), 0);
        assert_eq!(clock.next_expected(), Some(at(1_000_000_000 + INTERVAL)));
        assert_eq!(clock.last_completion(), None);
    }

    #[test]
    fn advance_is_idempotent() {
        let mut clock = clock();
        clock.advance(at(1_000_000_000));
        clock.record_completion(at(1_000_000_000 + INTERVAL));

        let now = at(1_000_000_000 + INTERVAL + 500_000);
        let frame = clock.advance(now);
        let expected = clock.next_expected();
        for _ in 0..3 {
            assert_eq!(clock.advance(now), frame);
            assert_eq!(clock.next_expected(), expected);
        }
    }

    #[test]
    fn nominal_completions_advance_by_one() {
        let mut clock = clock();
        let start = 1_000_000_000;
        clock.advance(at(start));

        let mut previous = clock.frame();
        for i in 1..=100 {
            let completion = start + i * INTERVAL;
            assert_eq!(clock.record_completion(at(completion)), None);
            let frame = clock.advance(at(completion + 200_000));
            assert_eq!(frame, (previous + 1) % 60);
            assert_eq!(clock.next_expected(), Some(at(completion + INTERVAL)));
            previous = frame;
        }
    }

    #[test]
    fn missed_completion_advances_by_two() {
        let mut clock = clock();
        let t0 = 1_000_000_000;
        clock.advance(at(t0 - INTERVAL));
        clock.record_completion(at(t0));
        clock.advance(at(t0 + 100_000));
        let t1 = t0 + INTERVAL;
        clock.record_completion(at(t1));
        let before = clock.advance(at(t1 + 100_000));

        // t2 arrives two intervals after t1
        let t2 = t1 + 2 * INTERVAL;
        assert!(clock.record_completion(at(t2)).is_some());
        let after = clock.advance(at(t2 + 100_000));
        assert_eq!(after, (before + 2) % 60);
    }

    #[test]
    fn stall_catches_up_to_real_time() {
        let mut clock = clock();
        let t0 = 1_000_000_000;
        clock.advance(at(t0 - INTERVAL));
        clock.record_completion(at(t0));
        clock.advance(at(t0 + 100_000));

        // the loop stalled for ten intervals before rendering again
        let t1 = t0 + INTERVAL;
        clock.record_completion(at(t1));
        let now = t1 + 10 * INTERVAL + 1_000_000;
        let before = clock.frame();
        let frame = clock.advance(at(now));

        let target = clock.next_expected().unwrap().as_nanos();
        assert!(target >= now + DEFAULT_MARGIN.as_nanos() as u64);
        assert!(target < now + DEFAULT_MARGIN.as_nanos() as u64 + INTERVAL);
        assert_eq!((target - t1) % INTERVAL, 0);
        assert_eq!(frame, (before + 11) % 60);
    }

    #[test]
    fn margin_pushes_target_one_interval_further() {
        let mut clock = clock();
        clock.advance(at(1_000_000_000));
        let completion = 1_000_000_000 + INTERVAL;
        clock.record_completion(at(completion));

        // 13ms after the completion the next vblank is less than 4ms away
        clock.advance(at(completion + 13_000_000));
        assert_eq!(clock.next_expected(), Some(at(completion + 2 * INTERVAL)));
    }

    #[test]
    fn counter_wraps_at_period() {
        let mut clock = FrameClock::new(Duration::from_nanos(INTERVAL), 3);
        let start = 1_000_000_000;
        clock.advance(at(start));
        let frames = (1..=4)
            .map(|i| {
                let completion = start + i * INTERVAL;
                clock.record_completion(at(completion));
                clock.advance(at(completion + 100_000))
            })
            .collect::<Vec<_>>();
        assert_eq!(frames, vec![1, 2, 0, 1]);
    }

    #[test]
    fn drift_within_tolerance_is_silent() {
        let mut clock = clock().with_drift_tolerance(Duration::from_micros(500));
        clock.advance(at(1_000_000_000));
        assert_eq!(clock.record_completion(at(1_000_000_000 + INTERVAL + 400_000)), None);
        clock.advance(at(1_000_000_000 + INTERVAL + 500_000));
        let drift = clock.record_completion(at(1_000_000_000 + 2 * INTERVAL + 1_400_000));
        assert_eq!(drift, Some(Duration::from_micros(1_000)));
    }
}
