//! Brings every target bulb to a connected, bonded and subscribed state.
//!
//! One candidate is connected per pass: scan until a target that is still
//! disconnected advertises, obtain a link from the pool, make sure the bulb
//! is bonded, resolve the power characteristic and subscribe to it. Any
//! failure tears the link down and returns the bulb to `Disconnected`, so the
//! next pass retries it.

use super::ControllerContext;
use crate::ble::protocol::decode_power;
use crate::ble::{
    BulbAddress, LIGHT_SERVICE_UUID, LinkId, LinkPool, POWER_STATE_CHAR_UUID, SubscriptionMode,
};
use crate::bulbs::BulbLink;
use crate::error::{ControllerError, Result};
use log::{debug, error, info, trace, warn};

/// Where the current connection attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AttemptState {
    Idle,
    Scanning,
    CandidateFound,
    Linking,
    Bonding,
    ServiceDiscovery,
    Subscribed,
    Connected,
    Failed,
}

pub struct ConnectOrchestrator {
    ctx: ControllerContext,
    pool: LinkPool,
    /// Target picked by the last scan, awaiting its connection attempt.
    pending: Option<BulbAddress>,
    state: AttemptState,
}

impl ConnectOrchestrator {
    pub fn new(ctx: ControllerContext) -> Self {
        let pool = LinkPool::new(
            ctx.transport.clone(),
            ctx.config.ble.max_connections,
            ctx.config.ble.connect_timeout(),
        );
        Self {
            ctx,
            pool,
            pending: None,
            state: AttemptState::Idle,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn pending(&self) -> Option<BulbAddress> {
        self.pending
    }

    pub fn pool(&self) -> &LinkPool {
        &self.pool
    }

    fn transition(&mut self, next: AttemptState) {
        trace!("[BLE] Connect attempt: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run one orchestration pass.
    ///
    /// Returns the bulb connected during this pass. `Ok(None)` means every
    /// target is already connected or the scan window closed without a match.
    pub async fn step(&mut self) -> Result<Option<BulbAddress>> {
        if self.ctx.registry.read().all_connected() {
            return Ok(None);
        }

        let candidate = match self.pending {
            Some(address) => address,
            None => match self.scan().await? {
                Some(address) => address,
                None => return Ok(None),
            },
        };

        let result = self.connect_candidate(candidate).await;
        self.pending = None;

        match result {
            Ok(()) => {
                self.transition(AttemptState::Connected);
                let (connected, total) = {
                    let registry = self.ctx.registry.read();
                    (registry.connected_count(), registry.len())
                };
                info!(
                    "[BLE] {} ready ({}/{} bulbs connected)",
                    candidate, connected, total
                );
                self.transition(AttemptState::Idle);
                Ok(Some(candidate))
            }
            Err(e) => {
                self.transition(AttemptState::Failed);
                self.ctx.registry.write().abort_connecting(candidate)?;
                self.transition(AttemptState::Idle);
                Err(e)
            }
        }
    }

    /// Scan for a target still waiting for a connection.
    async fn scan(&mut self) -> Result<Option<BulbAddress>> {
        self.transition(AttemptState::Scanning);

        let registry = self.ctx.registry.clone();
        let matcher = move |address: &BulbAddress| {
            let wanted = registry.read().awaiting_connection(*address);
            if wanted {
                debug!("[BLE] Found advertising target {}", address);
            }
            wanted
        };

        let transport = self.ctx.transport.clone();
        let scan = transport.scan(&matcher);
        let scanned = match self.ctx.config.ble.scan_window() {
            Some(window) => match tokio::time::timeout(window, scan).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("[BLE] No target found within {:?}", window);
                    self.transition(AttemptState::Idle);
                    return Ok(None);
                }
            },
            None => scan.await,
        };

        let address = match scanned {
            Ok(address) => address,
            Err(e) => {
                self.transition(AttemptState::Idle);
                return Err(e.into());
            }
        };

        self.ctx.registry.write().begin_connecting(address)?;
        self.pending = Some(address);
        self.transition(AttemptState::CandidateFound);
        Ok(Some(address))
    }

    async fn connect_candidate(&mut self, address: BulbAddress) -> Result<()> {
        self.transition(AttemptState::Linking);
        let link = self.pool.acquire(address).await?;
        debug!("[BLE] Linked to {} on {}", address, link);

        if let Err(e) = self.handshake(address, link).await {
            self.pool.teardown(link).await;
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&mut self, address: BulbAddress, link: LinkId) -> Result<()> {
        self.transition(AttemptState::Bonding);
        self.ensure_bonded(address, link).await?;

        self.transition(AttemptState::ServiceDiscovery);
        let transport = self.ctx.transport.clone();
        let power = transport
            .discover_characteristic(link, LIGHT_SERVICE_UUID, POWER_STATE_CHAR_UUID)
            .await?
            .ok_or(ControllerError::ServiceNotFound(address))?;

        let initial = if power.can_read {
            match transport.read(&power).await {
                Ok(value) => decode_power(&value),
                Err(e) => {
                    warn!("[BLE] Could not read power state of {}: {}", address, e);
                    None
                }
            }
        } else {
            None
        };

        let mode = SubscriptionMode::preferred_for(&power)
            .ok_or(ControllerError::NotificationsUnsupported(address))?;
        transport
            .subscribe(&power, mode)
            .await
            .map_err(|e| ControllerError::SubscribeFailed(address, e))?;
        self.transition(AttemptState::Subscribed);
        debug!("[BLE] Subscribed to {} power state via {}", address, mode);

        self.ctx
            .registry
            .write()
            .mark_connected(address, BulbLink { id: link, power }, initial)
    }

    async fn ensure_bonded(&self, address: BulbAddress, link: LinkId) -> Result<()> {
        if self.ctx.transport.is_bonded(address).await {
            trace!("[BLE] Already bonded with {}", address);
            return Ok(());
        }

        info!("[BLE] Bonding with {}", address);
        self.ctx.transport.bond(link).await.map_err(|e| {
            error!(
                "[BLE] Bonding with {} failed, the bulb must be in pairing mode: {}",
                address, e
            );
            ControllerError::BondingFailed(address)
        })
    }

    /// Record a link drop reported by the BLE stack.
    ///
    /// Events for a link the bulb no longer uses are ignored.
    pub fn handle_disconnect(&mut self, address: BulbAddress, link: LinkId) {
        if self.ctx.registry.write().mark_disconnected(address, link) {
            warn!("[BLE] {} disconnected from {}, will rescan", address, link);
        } else {
            trace!("[BLE] Ignoring stale disconnect of {} on {}", address, link);
        }
    }
}
