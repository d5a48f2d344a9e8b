//! The control loop.
//!
//! Each iteration first applies every link event queued by the BLE stack,
//! then either works on connecting missing bulbs (with the sensor suspended)
//! or, once every bulb is connected, runs the sensor gate and the presence
//! controller. Errors are logged and retried on the next iteration.

use super::ControllerContext;
use super::notifications::NotificationSynchronizer;
use super::orchestrator::ConnectOrchestrator;
use super::presence_controller::PresenceController;
use super::sensor_gate::SensorGate;
use crate::ble::{LinkEvent, LinkEventReceiver};
use crate::error::Result;
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

pub struct Controller {
    ctx: ControllerContext,
    events: LinkEventReceiver,
    orchestrator: ConnectOrchestrator,
    synchronizer: NotificationSynchronizer,
    gate: SensorGate,
    presence: PresenceController,
}

impl Controller {
    pub fn new(ctx: ControllerContext, events: LinkEventReceiver) -> Self {
        Self {
            orchestrator: ConnectOrchestrator::new(ctx.clone()),
            synchronizer: NotificationSynchronizer::new(ctx.clone()),
            // The sensor runs as soon as it has been configured
            gate: SensorGate::new(ctx.clone(), true),
            presence: PresenceController::new(ctx.clone()),
            ctx,
            events,
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    pub fn orchestrator(&self) -> &ConnectOrchestrator {
        &self.orchestrator
    }

    pub fn gate(&self) -> &SensorGate {
        &self.gate
    }

    pub fn presence(&self) -> &PresenceController {
        &self.presence
    }

    /// Reset the sensor, then push detection range and output latency.
    pub async fn initialize(&mut self) -> Result<()> {
        let sensor = &self.ctx.config.sensor;
        let mut source = self.ctx.presence.lock().await;
        source.factory_reset().await?;
        source
            .configure_range(sensor.range_start_m, sensor.range_end_m)
            .await?;
        source
            .configure_latency(sensor.presence_latency_s, sensor.absence_latency_s)
            .await?;
        info!(
            "[Presence] Sensor configured: {}m - {}m, latency {}s/{}s",
            sensor.range_start_m,
            sensor.range_end_m,
            sensor.presence_latency_s,
            sensor.absence_latency_s
        );
        Ok(())
    }

    /// Apply every queued link event. Returns how many were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("[BLE] Link event channel closed");
                    break;
                }
            }
        }
        handled
    }

    fn dispatch(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Disconnected { address, link } => {
                self.orchestrator.handle_disconnect(address, link);
            }
            LinkEvent::Notification {
                address,
                characteristic,
                value,
            } => {
                self.synchronizer.handle(address, characteristic, &value);
            }
        }
    }

    /// Run a single control loop iteration.
    pub async fn iterate(&mut self) -> Result<()> {
        self.drain_events();

        let all_connected = self.ctx.registry.read().all_connected();
        if !all_connected {
            if let Err(e) = self.gate.suspend().await {
                warn!("[Gate] Failed to suspend presence sensor: {}", e);
            }
            self.orchestrator.step().await?;
        } else if self.gate.evaluate(&mut self.presence).await? {
            self.presence.evaluate().await?;
        }
        Ok(())
    }

    /// Loop until `shutdown` is cancelled, then stop the sensor.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "[Presence] Controlling {} bulb(s)",
            self.ctx.registry.read().len()
        );
        let interval = self.ctx.config.ble.loop_interval();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.iterate() => {
                    if let Err(e) = result {
                        warn!("[Presence] {}", e);
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("[Presence] Shutting down");
        if let Err(e) = self.gate.suspend().await {
            warn!("[Gate] Failed to stop presence sensor: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link_event_channel;
    use crate::control::test_support::{Harness, addr, test_config};
    use crate::presence::{MmWaveRadar, RadarSettings, shared_presence};
    use crate::simulation::{SimulatedBulb, SimulatedTransport};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use uuid::Uuid;

    async fn settle(controller: &mut Controller, iterations: usize) {
        for _ in 0..iterations {
            let _ = controller.iterate().await;
        }
    }

    #[tokio::test]
    async fn test_initialize_configures_sensor() {
        let harness = Harness::new(&[1]);
        let mut controller = harness.controller();
        controller.initialize().await.unwrap();

        assert_eq!(harness.presence.range(), Some((0.0, 6.0)));
        assert_eq!(harness.presence.latency(), Some((0.0, 15.0)));
        assert!(harness.presence.is_running());
        assert_eq!(harness.presence.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_resets_radar_before_configuring() {
        let (client, mut device) = tokio::io::duplex(4096);
        let settings = RadarSettings {
            command_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(100),
        };
        let (tx, rx) = link_event_channel();
        let transport = Arc::new(SimulatedTransport::new(tx));
        transport.add_bulb(SimulatedBulb::new(addr(1)));
        let ctx = ControllerContext::new(
            test_config(vec![addr(1)]),
            transport,
            shared_presence(MmWaveRadar::new(client, settings)),
        );

        Controller::new(ctx, rx).initialize().await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = device.read(&mut buf).await.unwrap();
        let sent = String::from_utf8(buf[..n].to_vec()).unwrap();
        let reset = sent.find("factoryReset").unwrap();
        let range = sent.find("detRangeCfg -1 0 40").unwrap();
        let latency = sent.find("outputLatency -1 0 600").unwrap();
        assert!(reset < range && range < latency);
        assert!(sent.ends_with("sensorStart"));
    }

    #[tokio::test]
    async fn test_unknown_characteristic_notification_is_ignored() {
        let harness = Harness::connected(&[1]).await;
        let mut controller = harness.controller();
        controller.drain_events();
        let before = controller.context().registry.read().get(addr(1)).unwrap().powered_on();

        harness
            .transport
            .raw_notification(addr(1), Uuid::nil(), vec![1]);
        assert_eq!(controller.drain_events(), 1);

        let registry = controller.context().registry.read();
        let record = registry.get(addr(1)).unwrap();
        assert_eq!(record.powered_on(), before);
        assert!(!record.paused());
    }

    #[tokio::test]
    async fn test_connecting_suspends_sensor() {
        let harness = Harness::new(&[1, 2]);
        let mut controller = harness.controller();

        controller.iterate().await.unwrap();
        assert!(!controller.gate().is_active());
        assert!(!harness.presence.is_running());
        assert_eq!(controller.context().registry.read().connected_count(), 1);
    }

    #[tokio::test]
    async fn test_presence_switches_bulbs_after_connecting() {
        let harness = Harness::new(&[1, 2]);
        let mut controller = harness.controller();

        settle(&mut controller, 3).await;
        assert!(controller.context().registry.read().all_connected());
        assert!(controller.gate().is_active());
        assert!(harness.transport.writes().is_empty());

        harness.presence.set_present(true);
        controller.iterate().await.unwrap();
        assert_eq!(
            harness.transport.writes(),
            vec![(addr(1), true), (addr(2), true)]
        );

        // Our own writes come back as notifications and must not pause anything
        controller.drain_events();
        assert_eq!(controller.context().registry.read().paused_count(), 0);
    }

    #[tokio::test]
    async fn test_link_drop_triggers_reconnect() {
        let harness = Harness::new(&[1, 2]);
        let mut controller = harness.controller();
        settle(&mut controller, 3).await;

        harness.transport.drop_link(addr(2));
        controller.drain_events();
        assert_eq!(controller.context().registry.read().connected_count(), 1);

        controller.iterate().await.unwrap();
        assert!(controller.context().registry.read().all_connected());
        assert_eq!(harness.transport.cached_reconnects(addr(2)), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let harness = Harness::new(&[1]);
        let controller = harness.controller();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(controller.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(harness.transport.is_bonded_with(addr(1)));
        assert!(!harness.presence.is_running());
    }
}
