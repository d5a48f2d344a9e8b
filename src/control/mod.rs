//! Control side of the controller.
//!
//! - [`orchestrator`] - Connects, bonds and subscribes to every target bulb
//! - [`notifications`] - Applies power notifications and the pause flip-flop
//! - [`power`] - Bulk power writes to the controllable bulbs
//! - [`presence_controller`] - Reacts to presence changes
//! - [`sensor_gate`] - Stops the sensor while every bulb is paused
//! - [`controller`] - The loop tying them together

mod context;
pub mod controller;
pub mod notifications;
pub mod orchestrator;
pub mod power;
pub mod presence_controller;
pub mod sensor_gate;

pub use context::ControllerContext;
pub use controller::Controller;
pub use notifications::NotificationSynchronizer;
pub use orchestrator::{AttemptState, ConnectOrchestrator};
pub use power::{BulkPowerOutcome, set_power_all};
pub use presence_controller::PresenceController;
pub use sensor_gate::SensorGate;
