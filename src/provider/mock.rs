use std::f64::consts::TAU;
use std::time::Instant;

use super::{fields, FieldError, ProviderError, TelemetryProvider};

const LAP_SECONDS: f64 = 24.0;

/// Synthetic driver running a looping lap.
///
/// Clutch is published as `ClutchRaw`, so the primary clutch lookup always
/// misses and the fallback chain is exercised.
pub struct MockProvider {
    started: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LapState {
    pub throttle: f64,
    pub brake: f64,
    pub clutch: f64,
    pub steer_rad: f64,
    pub speed_mps: f64,
    pub gear: i32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { started: None }
    }

    fn state(&self) -> Result<LapState, FieldError> {
        match self.started {
            Some(t0) => Ok(lap_state(t0.elapsed().as_secs_f64())),
            None => Err(FieldError::Missing("session".into())),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn lap_state(t: f64) -> LapState {
    let phase = (t % LAP_SECONDS) / LAP_SECONDS;
    // two corners per lap: brake hard, coast through, then back on the power
    let corner = (phase * 2.0).fract();
    let (throttle, brake) = if corner < 0.55 {
        (1.0, 0.0)
    } else if corner < 0.68 {
        (0.0, 1.0 - (corner - 0.55) / 0.13 * 0.6)
    } else if corner < 0.78 {
        (0.15, 0.0)
    } else {
        ((corner - 0.78) / 0.22, 0.0)
    };
    let steer_rad = if (0.55..0.95).contains(&corner) {
        let s = ((corner - 0.55) / 0.4 * std::f64::consts::PI).sin();
        let dir = if phase < 0.5 { 1.0 } else { -1.0 };
        dir * s * 1.9
    } else {
        0.05 * (t * TAU * 0.7).sin()
    };
    let speed_mps = 25.0 + 45.0 * (1.0 - (corner * TAU).cos()) * 0.5 * throttle.max(0.3);
    let gear = if t % LAP_SECONDS < 1.5 { 0 } else { (1 + (speed_mps / 12.0) as i32).min(6) };
    // clutch pressed while in neutral at the start of each lap
    let clutch = if gear == 0 { 1.0 } else { 0.0 };
    LapState { throttle, brake, clutch, steer_rad, speed_mps, gear }
}

impl TelemetryProvider for MockProvider {
    fn start(&mut self) -> Result<(), ProviderError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn is_connected(&self) -> bool {
        self.started.is_some()
    }

    fn get_float(&self, field: &str) -> Result<f32, FieldError> {
        let s = self.state()?;
        let v = match field {
            fields::THROTTLE => s.throttle,
            fields::BRAKE => s.brake,
            fields::STEERING_WHEEL_ANGLE => s.steer_rad,
            fields::SPEED => s.speed_mps,
            "ClutchRaw" => s.clutch,
            _ => return Err(FieldError::Missing(field.to_string())),
        };
        Ok(v as f32)
    }

    fn get_int(&self, field: &str) -> Result<i32, FieldError> {
        match field {
            fields::GEAR => Ok(self.state()?.gear),
            _ => Err(FieldError::Missing(field.to_string())),
        }
    }
}
