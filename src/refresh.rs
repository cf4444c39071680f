use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use tracing::{info, warn};

use crate::pipeline::{BarValues, SignalPipeline};
use crate::settings::{SharedSettings, SpeedUnit};
use crate::trace::{TraceBuffer, TracePoint};

/// Percent points per responsiveness key press.
pub const BAR_STEP_PERCENT: i16 = 5;
const RANGE_STEP_DEG: f64 = 30.0;

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Each in 0..100.
    pub bars: BarValues,
    /// Wheel rotation in degrees, positive clockwise.
    pub wheel_angle_deg: f64,
    pub gear: String,
    pub speed: i64,
    pub speed_unit: SpeedUnit,
    pub trace: Vec<TracePoint>,
    pub connected: bool,
    pub bar_smoothing_percent: u8,
    pub steering_range_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiCommand {
    Quit,
    /// Change bar responsiveness by this many percent points.
    AdjustBarSmoothing(i16),
    /// Widen (+1) or narrow (-1) the steering range by one step.
    AdjustSteeringRange(i8),
    ClearTrace,
}

/// Renderer collaborator. `pump` waits at most `budget` for user input.
pub trait Renderer {
    fn render(&mut self, frame: &Frame) -> Result<()>;
    fn pump(&mut self, budget: Duration) -> Result<Vec<UiCommand>>;
}

pub fn gear_label(gear: i32) -> String {
    match gear {
        g if g < 0 => "R".to_string(),
        0 => "N".to_string(),
        g => g.to_string(),
    }
}

pub fn speed_label(speed: f64) -> i64 {
    if speed.is_finite() {
        speed.round() as i64
    } else {
        0
    }
}

fn display_bar(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Per-frame driver: turns the latest published inputs into a [`Frame`] and
/// appends one trace point per tick, independent of the sampling rate.
pub struct RefreshClock {
    pipeline: SignalPipeline,
    trace: Arc<TraceBuffer>,
    settings: Arc<SharedSettings>,
    connection_events: Receiver<bool>,
    connected: bool,
    epoch: Instant,
}

impl RefreshClock {
    pub fn new(
        pipeline: SignalPipeline,
        trace: Arc<TraceBuffer>,
        settings: Arc<SharedSettings>,
        connection_events: Receiver<bool>,
    ) -> Self {
        Self { pipeline, trace, settings, connection_events, connected: false, epoch: Instant::now() }
    }

    pub fn tick(&mut self) -> Frame {
        let now = self.epoch.elapsed().as_secs_f64();
        self.tick_at(now)
    }

    pub fn tick_at(&mut self, now_secs: f64) -> Frame {
        self.drain_connection_events();
        self.pipeline.set_bar_smoothing_percent(self.settings.bar_smoothing_percent());

        let raw = self.pipeline.latest();
        let bars = self.pipeline.bar_values(&raw);
        let clutch = if !self.connected {
            0.0
        } else if self.settings.invert_clutch() {
            100.0 - bars.clutch
        } else {
            bars.clutch
        };
        let bars = BarValues {
            throttle: display_bar(bars.throttle),
            brake: display_bar(bars.brake),
            steering: display_bar(bars.steering),
            clutch: display_bar(clutch),
        };

        let range = self.settings.steering_range_deg();
        let wheel_angle_deg = -raw.steering_pct * (range * 0.5);

        let line = self.pipeline.trace_values(&raw);
        self.trace.append(TracePoint { t: now_secs, throttle: line.throttle, brake: line.brake, steer: line.steer });

        Frame {
            bars,
            wheel_angle_deg,
            gear: gear_label(raw.gear),
            speed: speed_label(raw.speed),
            speed_unit: self.settings.speed_unit(),
            trace: self.trace.snapshot(),
            connected: self.connected,
            bar_smoothing_percent: self.settings.bar_smoothing_percent(),
            steering_range_deg: range,
        }
    }

    fn drain_connection_events(&mut self) {
        while let Ok(connected) = self.connection_events.try_recv() {
            if connected && !self.connected {
                // fresh session, don't blend with what was on screen before
                self.pipeline.reset();
            }
            self.connected = connected;
        }
    }

    /// Apply one UI command. Returns false on quit.
    pub fn apply(&mut self, command: UiCommand) -> bool {
        match command {
            UiCommand::Quit => return false,
            UiCommand::AdjustBarSmoothing(delta) => {
                let current = i16::from(self.settings.bar_smoothing_percent());
                let next = (current + delta).clamp(1, 100);
                self.settings.set_bar_smoothing_percent(next as u8);
                self.persist();
            }
            UiCommand::AdjustSteeringRange(direction) => {
                let next = self.settings.steering_range_deg() + f64::from(direction.signum()) * RANGE_STEP_DEG;
                self.settings.set_steering_range_deg(next);
                self.persist();
            }
            UiCommand::ClearTrace => self.trace.clear(),
        }
        true
    }

    fn persist(&self) {
        if let Err(e) = self.settings.persist() {
            warn!(error = ?e, "Could not save settings");
        }
    }

    /// Tick, render, pump input; until the renderer asks to quit or `stop`
    /// is set. The loop is paced by the renderer, not by a timer.
    pub fn run(&mut self, renderer: &mut dyn Renderer, stop: &AtomicBool) -> Result<()> {
        let budget = self.settings.frame_budget();
        info!(budget = ?budget, "Refresh loop running");
        while !stop.load(Ordering::Relaxed) {
            let frame = self.tick();
            renderer.render(&frame)?;
            for command in renderer.pump(budget)? {
                if !self.apply(command) {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}
