use super::ControllerContext;
use super::power::{BulkPowerOutcome, set_power_all};
use crate::error::Result;
use log::info;

/// Turns presence changes into bulk power writes.
pub struct PresenceController {
    ctx: ControllerContext,
    /// Last presence state acted on.
    detected: bool,
}

impl PresenceController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            detected: false,
        }
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Read the sensor once and switch the bulbs if presence changed.
    ///
    /// Returns the bulk outcome when a change was acted on.
    pub async fn evaluate(&mut self) -> Result<Option<BulkPowerOutcome>> {
        let sample = self.ctx.presence.lock().await.read_presence().await?;
        if sample == self.detected {
            return Ok(None);
        }

        info!(
            "[Presence] Presence state changed, new state: {}",
            if sample { "present" } else { "absent" }
        );
        Ok(Some(self.apply(sample).await))
    }

    /// Adopt `present` as the current state and write it to every bulb.
    pub async fn apply(&mut self, present: bool) -> BulkPowerOutcome {
        self.detected = present;
        set_power_all(&self.ctx, present).await
    }
}
