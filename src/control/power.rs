//! Bulk power writes.
//!
//! The cached power state is updated before the write goes out, so the
//! bulb's own change notification for our write matches what is stored and
//! cannot be mistaken for an external switch. A failed write restores it.

use super::ControllerContext;
use crate::ble::BulbAddress;
use crate::ble::protocol::encode_power;
use crate::ble::TransportError;
use crate::bulbs::BulbLink;
use crate::error::{ControllerError, Result};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerWrite {
    Written,
    /// Already at the requested state, disconnected or paused.
    Skipped,
}

/// Result of one bulk power request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkPowerOutcome {
    pub written: Vec<BulbAddress>,
    pub skipped: usize,
    pub failed: Vec<BulbAddress>,
}

impl BulkPowerOutcome {
    /// Logical AND of every per-bulb outcome.
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn error(&self) -> Option<ControllerError> {
        (!self.succeeded()).then(|| ControllerError::PartialPowerFailure {
            failed: self.failed.len(),
            attempted: self.written.len() + self.failed.len(),
        })
    }
}

/// Switch every connected, unpaused bulb to `on`.
///
/// A failing bulb does not stop the others; failures are reported once as a
/// warning and never retried here.
pub async fn set_power_all(ctx: &ControllerContext, on: bool) -> BulkPowerOutcome {
    let targets = ctx.registry.read().controllable();
    let mut outcome = BulkPowerOutcome::default();

    for (address, link) in targets {
        match set_power(ctx, address, link, on).await {
            Ok(PowerWrite::Written) => outcome.written.push(address),
            Ok(PowerWrite::Skipped) => outcome.skipped += 1,
            Err(e) => {
                warn!("[Presence] Could not turn {} {}: {}", address, on_off(on), e);
                outcome.failed.push(address);
            }
        }
    }

    if let Some(e) = outcome.error() {
        warn!("[Presence] {}", e);
    }
    outcome
}

async fn set_power(
    ctx: &ControllerContext,
    address: BulbAddress,
    link: BulbLink,
    on: bool,
) -> Result<PowerWrite> {
    let previous = {
        let mut registry = ctx.registry.write();
        let Some(record) = registry.get(address) else {
            return Ok(PowerWrite::Skipped);
        };
        if !record.is_connected() || record.paused() || record.powered_on() == on {
            return Ok(PowerWrite::Skipped);
        }
        if !link.power.can_write {
            return Err(TransportError::Write("power characteristic is not writable".into()).into());
        }
        registry.set_powered_on(address, on)?
    };

    match ctx.transport.write(&link.power, &encode_power(on)).await {
        Ok(()) => {
            info!("[Presence] Turned {} {}", address, on_off(on));
            Ok(PowerWrite::Written)
        }
        Err(e) => {
            ctx.registry.write().set_powered_on(address, previous)?;
            Err(e.into())
        }
    }
}

pub(crate) fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}
