use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::AtomicF64;

pub const DEFAULT_STEERING_RANGE_DEG: f64 = 540.0;
pub const MIN_STEERING_RANGE_DEG: f64 = 90.0;
pub const MAX_STEERING_RANGE_DEG: f64 = 1800.0;

const DEFAULT_STALENESS_SECS: f64 = 8.0;
const MAX_POLL_MS: u64 = 1_000;
const MAX_LIVENESS_MS: u64 = 60_000;
const MAX_STALENESS_SECS: f64 = 3_600.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing settings file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding settings")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Mph,
    Kph,
}

impl SpeedUnit {
    /// Multiplier from meters per second.
    pub fn factor(self) -> f64 {
        match self {
            SpeedUnit::Mph => 2.236_936_29,
            SpeedUnit::Kph => 3.6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedUnit::Mph => "mph",
            SpeedUnit::Kph => "km/h",
        }
    }
}

/// Polling cadences of the sample source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceTimings {
    pub poll_ms: u64,
    pub liveness_ms: u64,
    pub staleness_secs: f64,
}

impl Default for SourceTimings {
    fn default() -> Self {
        Self { poll_ms: 16, liveness_ms: 2000, staleness_secs: DEFAULT_STALENESS_SECS }
    }
}

impl SourceTimings {
    /// Bound every cadence and keep poll < liveness <= staleness.
    pub fn normalized(self) -> Self {
        let poll_ms = self.poll_ms.clamp(1, MAX_POLL_MS);
        let liveness_ms = self.liveness_ms.clamp(poll_ms + 1, MAX_LIVENESS_MS);
        let floor = liveness_ms as f64 / 1000.0;
        let staleness_secs = if self.staleness_secs.is_finite() {
            self.staleness_secs.clamp(floor, MAX_STALENESS_SECS)
        } else {
            DEFAULT_STALENESS_SECS.max(floor)
        };
        Self { poll_ms, liveness_ms, staleness_secs }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_ms.max(1))
    }

    pub fn staleness(&self) -> Duration {
        Duration::try_from_secs_f64(self.staleness_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_STALENESS_SECS))
    }
}

/// Persisted overlay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Full lock-to-lock rotation of the wheel.
    pub steering_angle_range_deg: f64,
    /// Bar responsiveness; 100 means no smoothing.
    pub bar_smoothing_percent: u8,
    pub speed_unit: SpeedUnit,
    /// Show clutch as `100 - value` for sims that report 1.0 when released.
    pub invert_clutch: bool,
    pub refresh_hz: u32,
    pub timings: SourceTimings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steering_angle_range_deg: DEFAULT_STEERING_RANGE_DEG,
            bar_smoothing_percent: 100,
            speed_unit: SpeedUnit::Mph,
            invert_clutch: false,
            refresh_hz: 60,
            timings: SourceTimings::default(),
        }
    }
}

impl Settings {
    /// Pull every field back into its supported range.
    pub fn normalized(mut self) -> Self {
        self.steering_angle_range_deg = clamp_range(self.steering_angle_range_deg);
        self.bar_smoothing_percent = self.bar_smoothing_percent.clamp(1, 100);
        self.refresh_hz = self.refresh_hz.clamp(1, 240);
        self.timings = self.timings.normalized();
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Settings>(text).map(Settings::normalized)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Read { path: path.to_path_buf(), source })?;
        Self::from_json(&text).map_err(|source| SettingsError::Parse { path: path.to_path_buf(), source })
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = ?e, "Falling back to default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Encode)?;
        std::fs::write(path, json)
            .map_err(|source| SettingsError::Write { path: path.to_path_buf(), source })
    }
}

fn clamp_range(deg: f64) -> f64 {
    if deg.is_finite() {
        deg.clamp(MIN_STEERING_RANGE_DEG, MAX_STEERING_RANGE_DEG)
    } else {
        DEFAULT_STEERING_RANGE_DEG
    }
}

/// Settings as seen by the running threads.
///
/// Steering range and bar smoothing can change while running; the poll
/// thread reads the range, the refresh thread reads both.
#[derive(Debug)]
pub struct SharedSettings {
    base: Settings,
    path: Option<PathBuf>,
    steering_range_deg: AtomicF64,
    bar_smoothing_percent: AtomicU8,
}

impl SharedSettings {
    pub fn new(settings: Settings, path: Option<PathBuf>) -> Self {
        let settings = settings.normalized();
        Self {
            steering_range_deg: AtomicF64::new(settings.steering_angle_range_deg),
            bar_smoothing_percent: AtomicU8::new(settings.bar_smoothing_percent),
            base: settings,
            path,
        }
    }

    pub fn steering_range_deg(&self) -> f64 {
        self.steering_range_deg.load()
    }

    pub fn set_steering_range_deg(&self, deg: f64) {
        self.steering_range_deg.store(clamp_range(deg));
    }

    pub fn bar_smoothing_percent(&self) -> u8 {
        self.bar_smoothing_percent.load(Ordering::Relaxed)
    }

    pub fn set_bar_smoothing_percent(&self, percent: u8) {
        self.bar_smoothing_percent.store(percent.clamp(1, 100), Ordering::Relaxed);
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        self.base.speed_unit
    }

    pub fn invert_clutch(&self) -> bool {
        self.base.invert_clutch
    }

    pub fn timings(&self) -> SourceTimings {
        self.base.timings
    }

    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.base.refresh_hz.max(1)))
    }

    pub fn snapshot(&self) -> Settings {
        Settings {
            steering_angle_range_deg: self.steering_range_deg(),
            bar_smoothing_percent: self.bar_smoothing_percent(),
            ..self.base.clone()
        }
    }

    /// Write the current values back if a settings path was given.
    pub fn persist(&self) -> Result<(), SettingsError> {
        match &self.path {
            Some(path) => self.snapshot().save(path),
            None => Ok(()),
        }
    }
}
