//! Telemetry providers: the sim-facing side of the sampler.
//!
//! A provider exposes named channels that may individually fail to read.
//! The sampler treats every accessor call as independently fallible.

pub mod mock;
pub mod udp;

use thiserror::Error;

pub use mock::MockProvider;
pub use udp::UdpProvider;

/// Canonical channel names.
pub mod fields {
    pub const THROTTLE: &str = "Throttle";
    pub const BRAKE: &str = "Brake";
    /// Radians, positive to the left.
    pub const STEERING_WHEEL_ANGLE: &str = "SteeringWheelAngle";
    /// Meters per second.
    pub const SPEED: &str = "Speed";
    pub const GEAR: &str = "Gear";
    /// Clutch is published under different names depending on the sim and
    /// hardware; tried in this order.
    pub const CLUTCH_CANDIDATES: [&str; 4] = ["Clutch", "ClutchRaw", "ClutchPedal", "ClutchAxis"];
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {
    #[error("field {0} is not available")]
    Missing(String),
    #[error("field {field} has a non-numeric value")]
    WrongType { field: String },
    #[error("field {field} value {value} is out of range")]
    OutOfRange { field: String, value: i64 },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("binding telemetry socket at {addr}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("telemetry provider I/O")]
    Io(#[from] std::io::Error),
    #[error("telemetry provider unavailable: {0}")]
    Unavailable(String),
}

pub trait TelemetryProvider: Send {
    fn start(&mut self) -> Result<(), ProviderError>;
    fn stop(&mut self);
    fn is_connected(&self) -> bool;
    fn get_float(&self, field: &str) -> Result<f32, FieldError>;
    fn get_int(&self, field: &str) -> Result<i32, FieldError>;
}

/// Builds a fresh provider; called again after every teardown.
pub type Connector = Box<dyn Fn() -> Result<Box<dyn TelemetryProvider>, ProviderError> + Send + Sync>;
