//! Bounded pool of client link objects.
//!
//! The BLE controller can only hold a fixed number of client objects, shared
//! across all targets. Link objects outlive their connection so a known peer
//! can be reconnected without rediscovering its service table.

use super::address::BulbAddress;
use super::protocol::ConnectionParams;
use super::transport::{BleTransport, LinkId};
use crate::error::{ControllerError, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

struct LinkSlot {
    id: LinkId,
    /// Peer whose service table this link object has cached.
    peer: Option<BulbAddress>,
}

pub struct LinkPool {
    transport: Arc<dyn BleTransport>,
    capacity: usize,
    connect_timeout: Duration,
    slots: Vec<LinkSlot>,
}

impl LinkPool {
    pub fn new(transport: Arc<dyn BleTransport>, capacity: usize, connect_timeout: Duration) -> Self {
        Self {
            transport,
            capacity,
            connect_timeout,
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of link objects currently allocated.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The link object last bound to `address`, if any.
    pub fn link_for(&self, address: BulbAddress) -> Option<LinkId> {
        self.slots
            .iter()
            .find(|slot| slot.peer == Some(address))
            .map(|slot| slot.id)
    }

    /// Get a connected link to `address`.
    ///
    /// Order of preference: reconnect the link object that already knows this
    /// peer (skipping service discovery), create a new link object while
    /// capacity remains, then recycle any idle link object. A link object
    /// that fails to reconnect is deleted first.
    pub async fn acquire(&mut self, address: BulbAddress) -> Result<LinkId> {
        if let Some(link) = self.link_for(address) {
            if self.transport.is_connected(link) {
                return Ok(link);
            }
            match self.transport.connect(link, address, false).await {
                Ok(()) => {
                    info!("[BLE] Reconnected {} on {}", address, link);
                    return Ok(link);
                }
                Err(e) => {
                    warn!("[BLE] Reconnect of {} on {} failed: {}", address, link, e);
                    self.release(link);
                }
            }
        }

        if self.slots.len() < self.capacity {
            let link = self
                .transport
                .create_link(ConnectionParams::INITIAL, self.connect_timeout)?;
            debug!("[BLE] Created {} for {}", link, address);

            if let Err(e) = self.transport.connect(link, address, true).await {
                // A fresh link object holds no cached data, no reason to keep it
                self.transport.delete_link(link);
                warn!("[BLE] Failed to connect {}, deleted {}", address, link);
                return Err(e.into());
            }

            self.slots.push(LinkSlot {
                id: link,
                peer: Some(address),
            });
            return Ok(link);
        }

        let idle = self
            .slots
            .iter()
            .map(|slot| slot.id)
            .find(|id| !self.transport.is_connected(*id));

        let Some(link) = idle else {
            warn!("[BLE] Max clients reached, no more connections available");
            return Err(ControllerError::PoolExhausted(address, self.capacity));
        };

        debug!("[BLE] Recycling idle {} for {}", link, address);
        self.transport.connect(link, address, true).await?;
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == link) {
            slot.peer = Some(address);
        }
        Ok(link)
    }

    /// Delete a link object that could not be reconnected and free its slot.
    fn release(&mut self, link: LinkId) {
        self.transport.delete_link(link);
        self.slots.retain(|slot| slot.id != link);
        debug!("[BLE] Deleted {}", link);
    }

    /// Drop the connection on `link` but keep the link object for reuse.
    pub async fn teardown(&self, link: LinkId) {
        if let Err(e) = self.transport.disconnect(link).await {
            debug!("[BLE] Disconnect of {} failed: {}", link, e);
        }
    }
}
