//! Starts and stops the presence sensor depending on whether any bulb is
//! still under automatic control.
//!
//! After a restart the radar reports absence for a few seconds even when
//! someone is there. On resume the gate therefore samples for a window and
//! takes the first positive reading, then writes the sampled state once.

use super::ControllerContext;
use super::presence_controller::PresenceController;
use crate::error::Result;
use log::{debug, info};
use tokio::time::{Instant, sleep, timeout_at};

pub struct SensorGate {
    ctx: ControllerContext,
    active: bool,
}

impl SensorGate {
    /// `active` is whether the sensor is currently running.
    pub fn new(ctx: ControllerContext, active: bool) -> Self {
        Self { ctx, active }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop or resume the sensor to match the pause state of the bulbs.
    ///
    /// Returns whether presence sensing is active afterwards.
    pub async fn evaluate(&mut self, presence: &mut PresenceController) -> Result<bool> {
        let all_paused = self.ctx.registry.read().all_paused();

        if self.active && all_paused {
            info!("[Gate] All bulbs paused, stopping presence sensor");
            self.stop().await?;
        } else if !self.active && !all_paused {
            info!("[Gate] Resuming presence sensor");
            self.ctx.presence.lock().await.start().await?;
            self.active = true;

            let sampled = self.sample_resume_window().await;
            info!(
                "[Gate] Presence after resume: {}",
                if sampled { "present" } else { "absent" }
            );
            presence.apply(sampled).await;
        }
        Ok(self.active)
    }

    /// Stop the sensor while bulbs are being connected.
    pub async fn suspend(&mut self) -> Result<()> {
        if self.active {
            debug!("[Gate] Suspending presence sensor");
            self.stop().await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // Considered inactive even if the stop command failed, so resume runs
        // the full start sequence
        self.active = false;
        self.ctx.presence.lock().await.stop().await?;
        Ok(())
    }

    /// Sample until presence is seen or the resume window closes.
    async fn sample_resume_window(&self) -> bool {
        let sensor = &self.ctx.config.sensor;
        let deadline = Instant::now() + sensor.resume_window();
        let interval = sensor.resume_sample_interval();

        loop {
            let read = {
                let mut source = self.ctx.presence.lock().await;
                timeout_at(deadline, source.read_presence()).await
            };
            match read {
                Ok(Ok(true)) => return true,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => debug!("[Gate] Sample failed during resume window: {}", e),
                Err(_) => return false,
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::POWER_STATE_CHAR_UUID;
    use crate::control::NotificationSynchronizer;
    use crate::control::test_support::{Harness, addr};

    fn pause(harness: &Harness, last: u8, reported: bool) {
        let sync = NotificationSynchronizer::new(harness.ctx.clone());
        sync.handle(addr(last), POWER_STATE_CHAR_UUID, &[reported as u8]);
    }

    #[tokio::test]
    async fn test_stops_sensor_when_all_paused() {
        let harness = Harness::connected(&[1, 2]).await;
        let mut gate = SensorGate::new(harness.ctx.clone(), true);
        let mut presence = PresenceController::new(harness.ctx.clone());

        pause(&harness, 1, true);
        assert!(gate.evaluate(&mut presence).await.unwrap());

        pause(&harness, 2, true);
        assert!(!gate.evaluate(&mut presence).await.unwrap());
        assert!(!harness.presence.is_running());
        assert_eq!(harness.presence.stop_count(), 1);

        // Stays stopped without repeating the command
        assert!(!gate.evaluate(&mut presence).await.unwrap());
        assert_eq!(harness.presence.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_writes_sampled_state_once() {
        let harness = Harness::connected(&[1, 2]).await;
        let mut gate = SensorGate::new(harness.ctx.clone(), true);
        let mut presence = PresenceController::new(harness.ctx.clone());

        // Both bulbs switched on externally and paused
        pause(&harness, 1, true);
        pause(&harness, 2, true);
        gate.evaluate(&mut presence).await.unwrap();

        // Bulb 1 switched again: resumed, still on
        pause(&harness, 1, true);
        harness.presence.set_present(false);
        assert!(gate.evaluate(&mut presence).await.unwrap());

        assert_eq!(harness.presence.start_count(), 1);
        assert_eq!(harness.transport.writes(), vec![(addr(1), false)]);
        assert!(!presence.detected());
    }

    #[tokio::test]
    async fn test_resume_takes_first_positive_sample() {
        let harness = Harness::connected(&[1]).await;
        let mut gate = SensorGate::new(harness.ctx.clone(), false);
        let mut presence = PresenceController::new(harness.ctx.clone());

        harness.presence.set_present(true);
        harness.presence.queue([Ok(false), Ok(false)]);
        assert!(gate.evaluate(&mut presence).await.unwrap());

        assert_eq!(harness.presence.read_count(), 3);
        assert!(presence.detected());
        assert_eq!(harness.transport.writes(), vec![(addr(1), true)]);
    }

    #[tokio::test]
    async fn test_resume_without_presence_waits_full_window() {
        let harness = Harness::connected(&[1]).await;
        let mut gate = SensorGate::new(harness.ctx.clone(), false);
        let mut presence = PresenceController::new(harness.ctx.clone());

        let started = Instant::now();
        gate.evaluate(&mut presence).await.unwrap();
        assert!(started.elapsed() >= harness.ctx.config.sensor.resume_window());
        assert!(harness.presence.read_count() > 1);
        assert!(!presence.detected());
    }

    #[tokio::test]
    async fn test_suspend_stops_only_once() {
        let harness = Harness::connected(&[1]).await;
        let mut gate = SensorGate::new(harness.ctx.clone(), true);

        gate.suspend().await.unwrap();
        gate.suspend().await.unwrap();
        assert!(!gate.is_active());
        assert_eq!(harness.presence.stop_count(), 1);
    }
}
