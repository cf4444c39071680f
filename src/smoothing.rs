/// Single-value exponential moving average.
///
/// The first update after construction or [`reset`](Self::reset) is passed
/// through unchanged and becomes the baseline, so a fresh filter never ramps
/// up from zero.
#[derive(Debug, Clone)]
pub struct ExponentialSmoother {
    alpha: f64,
    prev: f64,
    initialized: bool,
}

impl ExponentialSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, prev: 0.0, initialized: false }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Takes effect on the next update only.
    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if !self.initialized {
            self.prev = x;
            self.initialized = true;
            return x;
        }
        self.prev = self.alpha * x + (1.0 - self.alpha) * self.prev;
        self.prev
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}
