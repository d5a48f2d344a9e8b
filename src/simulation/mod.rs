//! Simulated collaborators for development and testing.
//!
//! Lets the controller run on a desktop without a BLE radio or a radar
//! attached, and gives tests full control over bulbs and presence.

mod presence;
mod transport;

pub use presence::{SimulatedPresence, run_presence_simulation};
pub use transport::{SimulatedBulb, SimulatedTransport};
