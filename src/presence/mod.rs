//! Presence sources.
//!
//! A presence source wraps the occupancy sensor and exposes only what the
//! controller needs: configure, start/stop and a debounced presence boolean.

pub mod radar;

pub use radar::{MmWaveRadar, RadarSettings};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PresenceError {
    /// The sensor produced no valid frame in time.
    #[error("no presence frame received within {0:?}")]
    Timeout(Duration),

    #[error("invalid presence frame (state byte {0:#04x})")]
    InvalidFrame(u8),

    #[error("invalid detection range {start_m}m..{end_m}m")]
    InvalidRange { start_m: f32, end_m: f32 },

    #[error("invalid output latency {presence_s}s/{absence_s}s")]
    InvalidLatency { presence_s: f32, absence_s: f32 },

    #[error("sensor I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PresenceError {
    fn from(e: std::io::Error) -> Self {
        PresenceError::Io(e.to_string())
    }
}

/// Occupancy sensor as seen by the controller.
#[async_trait]
pub trait PresenceSource: Send {
    /// Drop any stored configuration. Runs before range and latency are set.
    async fn factory_reset(&mut self) -> Result<(), PresenceError>;

    /// Restrict detection to `start_m..end_m` meters.
    async fn configure_range(&mut self, start_m: f32, end_m: f32) -> Result<(), PresenceError>;

    /// Delay before reporting presence / absence, in seconds.
    async fn configure_latency(
        &mut self,
        presence_s: f32,
        absence_s: f32,
    ) -> Result<(), PresenceError>;

    async fn start(&mut self) -> Result<(), PresenceError>;

    async fn stop(&mut self) -> Result<(), PresenceError>;

    /// Read the current (sensor-debounced) presence state.
    ///
    /// May wait for the next sensor report; never waits forever.
    async fn read_presence(&mut self) -> Result<bool, PresenceError>;
}

/// Presence source shared between the sensor gate and the presence controller.
pub type SharedPresence = Arc<Mutex<Box<dyn PresenceSource>>>;

pub fn shared_presence(source: impl PresenceSource + 'static) -> SharedPresence {
    Arc::new(Mutex::new(Box::new(source)))
}
