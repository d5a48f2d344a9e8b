//! BLE side of the controller.
//!
//! - [`address`] - Bulb MAC addresses
//! - [`protocol`] - GATT identifiers and the power-state encoding
//! - [`transport`] - Outcome contract of the BLE stack and its link events
//! - [`link_pool`] - Bounded reuse of client link objects

pub mod address;
pub mod link_pool;
pub mod protocol;
pub mod transport;

pub use address::{AddressParseError, BulbAddress};
pub use link_pool::LinkPool;
pub use protocol::{ConnectionParams, LIGHT_SERVICE_UUID, POWER_STATE_CHAR_UUID};
pub use transport::{
    BleTransport, CharacteristicHandle, LinkEvent, LinkEventReceiver, LinkEventSender, LinkId,
    ScanMatcher, SubscriptionMode, TransportError, link_event_channel,
};
