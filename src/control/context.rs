use crate::ble::BleTransport;
use crate::bulbs::{BulbRegistry, SharedRegistry};
use crate::config::Config;
use crate::presence::SharedPresence;
use std::sync::Arc;

/// Everything the control components share.
///
/// Cheap to clone; each component keeps its own copy instead of reaching for
/// process-wide statics.
#[derive(Clone)]
pub struct ControllerContext {
    pub config: Arc<Config>,
    pub registry: SharedRegistry,
    pub transport: Arc<dyn BleTransport>,
    pub presence: SharedPresence,
}

impl ControllerContext {
    /// Build a context with a fresh registry holding every configured target.
    pub fn new(config: Config, transport: Arc<dyn BleTransport>, presence: SharedPresence) -> Self {
        let registry = BulbRegistry::new(config.targets.iter().copied()).into_shared();
        Self {
            config: Arc::new(config),
            registry,
            transport,
            presence,
        }
    }

    pub fn pause_on_external_control(&self) -> bool {
        self.config.policy.pause_on_external_control
    }
}
