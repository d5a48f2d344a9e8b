use super::ControllerContext;
use super::power::on_off;
use crate::ble::protocol::decode_power;
use crate::ble::{BulbAddress, POWER_STATE_CHAR_UUID};
use crate::bulbs::PowerReport;
use log::{debug, info, warn};
use uuid::Uuid;

/// Keeps the registry's power state in step with what the bulbs report and
/// runs the pause flip-flop on external changes.
pub struct NotificationSynchronizer {
    ctx: ControllerContext,
}

impl NotificationSynchronizer {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    /// Apply one notification. Returns `None` when it was ignored.
    pub fn handle(
        &self,
        address: BulbAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> Option<PowerReport> {
        if characteristic != POWER_STATE_CHAR_UUID {
            info!(
                "[Sync] Ignoring notification from {} for characteristic {}",
                address, characteristic
            );
            return None;
        }
        let Some(on) = decode_power(value) else {
            warn!("[Sync] Empty power notification from {}", address);
            return None;
        };

        let report = match self.ctx.registry.write().apply_power_report(
            address,
            on,
            self.ctx.pause_on_external_control(),
        ) {
            Ok(report) => report,
            Err(e) => {
                warn!("[Sync] {}", e);
                return None;
            }
        };

        debug!(
            "[Sync] {} reports power {} (was {})",
            address,
            on_off(report.current),
            on_off(report.previous)
        );
        match report.pause_toggled {
            Some(true) => info!(
                "[Sync] {} switched externally, pausing automatic control",
                address
            ),
            Some(false) => info!(
                "[Sync] {} switched again, resuming automatic control",
                address
            ),
            None => {}
        }
        Some(report)
    }
}
