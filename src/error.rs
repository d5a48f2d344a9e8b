use crate::ble::{AddressParseError, BulbAddress, TransportError};
use crate::presence::PresenceError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bulb {0} is not a configured target")]
    UnknownBulb(BulbAddress),

    #[error("No link available for {0}: all {1} connection slots are in use")]
    PoolExhausted(BulbAddress, usize),

    #[error("Bonding with {0} failed")]
    BondingFailed(BulbAddress),

    #[error("Light service not found on {0}")]
    ServiceNotFound(BulbAddress),

    #[error("Power characteristic on {0} supports neither notify nor indicate")]
    NotificationsUnsupported(BulbAddress),

    #[error("Failed to subscribe to power notifications from {0}: {1}")]
    SubscribeFailed(BulbAddress, TransportError),

    #[error("Power write failed for {failed} of {attempted} bulb(s)")]
    PartialPowerFailure { failed: usize, attempted: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error(transparent)]
    Address(#[from] AddressParseError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
