//! Scripted presence source.

use crate::presence::{PresenceError, PresenceSource};
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Timeout reported when the simulated sensor is read while stopped.
const STOPPED_READ_TIMEOUT: Duration = Duration::from_millis(0);

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<Result<bool, PresenceError>>,
    present: bool,
    running: bool,
    resets: usize,
    starts: usize,
    stops: usize,
    reads: usize,
    range: Option<(f32, f32)>,
    latency: Option<(f32, f32)>,
}

/// Presence source driven by tests or the simulation task.
///
/// Clones share state, so a handle can be kept to steer the source after it
/// has been handed to the controller. Queued samples are returned first, then
/// the steady `present` value.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPresence {
    script: Arc<Mutex<Script>>,
}

impl SimulatedPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that is already running, as the radar is after configuration.
    pub fn running() -> Self {
        let presence = Self::default();
        presence.script.lock().running = true;
        presence
    }

    /// Set the steady presence value and drop any queued samples.
    pub fn set_present(&self, present: bool) {
        let mut script = self.script.lock();
        script.queued.clear();
        script.present = present;
    }

    pub fn is_present(&self) -> bool {
        self.script.lock().present
    }

    /// Queue samples returned by the next reads, ahead of the steady value.
    pub fn queue(&self, samples: impl IntoIterator<Item = Result<bool, PresenceError>>) {
        self.script.lock().queued.extend(samples);
    }

    pub fn is_running(&self) -> bool {
        self.script.lock().running
    }

    pub fn reset_count(&self) -> usize {
        self.script.lock().resets
    }

    pub fn start_count(&self) -> usize {
        self.script.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.script.lock().stops
    }

    pub fn read_count(&self) -> usize {
        self.script.lock().reads
    }

    pub fn range(&self) -> Option<(f32, f32)> {
        self.script.lock().range
    }

    pub fn latency(&self) -> Option<(f32, f32)> {
        self.script.lock().latency
    }
}

#[async_trait]
impl PresenceSource for SimulatedPresence {
    async fn factory_reset(&mut self) -> Result<(), PresenceError> {
        let mut script = self.script.lock();
        script.resets += 1;
        script.range = None;
        script.latency = None;
        script.running = true;
        Ok(())
    }

    async fn configure_range(&mut self, start_m: f32, end_m: f32) -> Result<(), PresenceError> {
        if end_m <= start_m {
            return Err(PresenceError::InvalidRange { start_m, end_m });
        }
        let mut script = self.script.lock();
        script.range = Some((start_m, end_m));
        script.running = true;
        Ok(())
    }

    async fn configure_latency(
        &mut self,
        presence_s: f32,
        absence_s: f32,
    ) -> Result<(), PresenceError> {
        let mut script = self.script.lock();
        script.latency = Some((presence_s, absence_s));
        script.running = true;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), PresenceError> {
        let mut script = self.script.lock();
        script.running = true;
        script.starts += 1;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PresenceError> {
        let mut script = self.script.lock();
        script.running = false;
        script.stops += 1;
        Ok(())
    }

    async fn read_presence(&mut self) -> Result<bool, PresenceError> {
        let mut script = self.script.lock();
        if !script.running {
            return Err(PresenceError::Timeout(STOPPED_READ_TIMEOUT));
        }
        script.reads += 1;
        match script.queued.pop_front() {
            Some(sample) => sample,
            None => Ok(script.present),
        }
    }
}

/// Spawn a task that flips the simulated presence every `period`.
pub fn run_presence_simulation(presence: SimulatedPresence, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let present = !presence.is_present();
            presence.set_present(present);
            info!(
                "[Sim] Presence {}",
                if present { "detected" } else { "cleared" }
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_samples_before_steady_value() {
        let mut presence = SimulatedPresence::running();
        presence.set_present(true);
        presence.queue([Ok(false), Err(PresenceError::Timeout(Duration::from_secs(1)))]);

        assert_eq!(presence.read_presence().await, Ok(false));
        assert!(presence.read_presence().await.is_err());
        assert_eq!(presence.read_presence().await, Ok(true));
        assert_eq!(presence.read_count(), 3);
    }

    #[tokio::test]
    async fn test_stopped_source_times_out() {
        let mut presence = SimulatedPresence::new();
        assert!(matches!(
            presence.read_presence().await,
            Err(PresenceError::Timeout(_))
        ));

        presence.start().await.unwrap();
        assert!(presence.is_running());
        presence.stop().await.unwrap();
        assert!(!presence.is_running());
        assert_eq!((presence.start_count(), presence.stop_count()), (1, 1));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let presence = SimulatedPresence::running();
        let mut handed_out = presence.clone();
        presence.set_present(true);
        assert_eq!(handed_out.read_presence().await, Ok(true));
    }
}
