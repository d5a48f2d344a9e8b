//! Light bulb GATT protocol definitions.
//!
//! Service/characteristic identifiers, the power-state byte encoding and the
//! connection parameters used when linking to bulbs.

use std::time::Duration;
use uuid::Uuid;

/// Light control service exposed by the bulbs.
pub const LIGHT_SERVICE_UUID: Uuid = Uuid::from_u128(0x932c32bd_0000_47a2_835a_a8d455b859dd);

/// Power state characteristic (read / write / notify).
pub const POWER_STATE_CHAR_UUID: Uuid = Uuid::from_u128(0x932c32bd_0002_47a2_835a_a8d455b859dd);

pub const POWER_OFF: u8 = 0x00;
pub const POWER_ON: u8 = 0x01;

/// Encode a power state as the single byte the bulb expects.
pub fn encode_power(on: bool) -> [u8; 1] {
    [if on { POWER_ON } else { POWER_OFF }]
}

/// Decode a power state payload. Returns `None` for an empty payload.
pub fn decode_power(payload: &[u8]) -> Option<bool> {
    payload.first().map(|b| *b == POWER_ON)
}

/// BLE connection parameters.
///
/// Intervals are in 1.25ms units, supervision timeout in 10ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl ConnectionParams {
    /// Used while establishing a link: 15ms interval, 510ms timeout.
    /// Safe for three simultaneous links.
    pub const INITIAL: Self = Self {
        interval_min: 12,
        interval_max: 12,
        latency: 0,
        supervision_timeout: 51,
    };

    /// Applied once connected, we don't need fast responses: 150ms interval, 1s timeout.
    pub const ESTABLISHED: Self = Self {
        interval_min: 120,
        interval_max: 120,
        latency: 0,
        supervision_timeout: 100,
    };

    /// Whether a parameter update requested by the peripheral should be accepted.
    pub fn accepts_peer_request(requested: &ConnectionParams) -> bool {
        requested.interval_min >= 24
            && requested.interval_max <= 40
            && requested.latency <= 2
            && requested.supervision_timeout <= 100
    }

    pub fn supervision_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.supervision_timeout) * 10)
    }
}
