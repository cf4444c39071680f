use std::sync::Arc;

use crate::sampler::Sample;
use crate::smoothing::ExponentialSmoother;
use crate::state::{LatestInputs, RawInputs};

/// Fixed smoothing of the trace lines.
pub const TRACE_ALPHA: f64 = 0.6;
/// At or above this the bars skip their filter entirely.
const PASS_THROUGH_ALPHA: f64 = 0.999;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BarValues {
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
    pub clutch: f64,
}

/// Trace-line values: pedals 0..100, steer -100..100.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TraceValues {
    pub throttle: f64,
    pub brake: f64,
    pub steer: f64,
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl RawInputs {
    /// Display-scale view of a sample. Non-finite readings become zero.
    pub fn from_sample(s: &Sample) -> Self {
        let steering_pct = finite_or_zero(s.steering_pct);
        Self {
            throttle: finite_or_zero(s.throttle) * 100.0,
            brake: finite_or_zero(s.brake) * 100.0,
            steer_bar: (steering_pct * 100.0 + 100.0) / 2.0,
            clutch: finite_or_zero(s.clutch) * 100.0,
            steering_pct,
            gear: s.gear,
            speed: finite_or_zero(s.speed),
        }
    }
}

/// Sample callback handed to the source. Runs on the poll thread and only
/// stores the latest values; smoothing happens on the refresh thread.
#[derive(Clone)]
pub struct SamplePublisher {
    latest: Arc<LatestInputs>,
}

impl SamplePublisher {
    pub fn publish(&self, sample: &Sample) {
        self.latest.store(RawInputs::from_sample(sample));
    }
}

struct Channels<const N: usize>([ExponentialSmoother; N]);

impl<const N: usize> Channels<N> {
    fn new(alpha: f64) -> Self {
        Self(std::array::from_fn(|_| ExponentialSmoother::new(alpha)))
    }

    fn set_alpha(&mut self, alpha: f64) {
        self.0.iter_mut().for_each(|s| s.set_alpha(alpha));
    }

    fn reset(&mut self) {
        self.0.iter_mut().for_each(ExponentialSmoother::reset);
    }
}

/// Latest-value store plus the two smoother sets.
pub struct SignalPipeline {
    latest: Arc<LatestInputs>,
    bar: Channels<4>,
    trace: Channels<3>,
    bar_alpha: f64,
}

impl SignalPipeline {
    pub fn new(bar_smoothing_percent: u8) -> Self {
        let mut pipeline = Self {
            latest: Arc::new(LatestInputs::new()),
            bar: Channels::new(1.0),
            trace: Channels::new(TRACE_ALPHA),
            bar_alpha: 1.0,
        };
        pipeline.set_bar_smoothing_percent(bar_smoothing_percent);
        pipeline
    }

    pub fn publisher(&self) -> SamplePublisher {
        SamplePublisher { latest: Arc::clone(&self.latest) }
    }

    pub fn latest(&self) -> RawInputs {
        self.latest.load()
    }

    pub fn bar_alpha(&self) -> f64 {
        self.bar_alpha
    }

    /// 100 disables bar smoothing; lower values smooth harder.
    pub fn set_bar_smoothing_percent(&mut self, percent: u8) {
        let alpha = (f64::from(percent) / 100.0).clamp(0.01, 1.0);
        if alpha == self.bar_alpha {
            return;
        }
        // bars skipped their filters while passing through
        if self.bar_alpha >= PASS_THROUGH_ALPHA {
            self.bar.reset();
        }
        self.bar_alpha = alpha;
        self.bar.set_alpha(alpha);
    }

    pub fn bar_values(&mut self, raw: &RawInputs) -> BarValues {
        if self.bar_alpha >= PASS_THROUGH_ALPHA {
            return BarValues {
                throttle: raw.throttle,
                brake: raw.brake,
                steering: raw.steer_bar,
                clutch: raw.clutch,
            };
        }
        let [thr, brk, str_, clu] = &mut self.bar.0;
        BarValues {
            throttle: thr.update(raw.throttle),
            brake: brk.update(raw.brake),
            steering: str_.update(raw.steer_bar),
            clutch: clu.update(raw.clutch),
        }
    }

    pub fn trace_values(&mut self, raw: &RawInputs) -> TraceValues {
        let [thr, brk, steer] = &mut self.trace.0;
        TraceValues {
            throttle: thr.update(raw.throttle),
            brake: brk.update(raw.brake),
            steer: steer.update((raw.steer_bar - 50.0) * 2.0),
        }
    }

    pub fn reset(&mut self) {
        self.bar.reset();
        self.trace.reset();
    }
}
