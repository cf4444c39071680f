use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// An `f64` stored as its bit pattern, so reads never observe a torn value.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

/// Latest input values on the display scale.
///
/// Pedals are 0..100, `steer_bar` is steering mapped onto 0..100 (50 = center)
/// and `steering_pct` keeps the signed -1..1 fraction for the wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawInputs {
    pub throttle: f64,
    pub brake: f64,
    pub steer_bar: f64,
    pub clutch: f64,
    pub steering_pct: f64,
    pub gear: i32,
    pub speed: f64,
}

/// Cell shared between the poll thread (writer) and the refresh thread
/// (reader). The whole struct is swapped under one lock.
#[derive(Debug, Default)]
pub struct LatestInputs {
    inner: Mutex<RawInputs>,
}

impl LatestInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, inputs: RawInputs) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = inputs;
    }

    pub fn load(&self) -> RawInputs {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
