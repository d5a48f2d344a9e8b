//! Hue presence controller library.
//!
//! Keeps a set of BLE light bulbs connected and switches them on and off
//! following an mmWave presence sensor. Bulbs switched by hand are left
//! alone until they are switched again.

pub mod ble;
pub mod bulbs;
pub mod config;
pub mod control;
pub mod error;
pub mod presence;
pub mod simulation;

pub use config::Config;
pub use control::{Controller, ControllerContext};
pub use error::{ControllerError, Result};
