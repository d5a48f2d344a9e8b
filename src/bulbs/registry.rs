//! Bulb registry: one record per configured target address.
//!
//! The registry is the single source of truth for each bulb's connectivity,
//! power and pause state. The `connected` and `paused` aggregates are running
//! counters changed in the same method as the record field they derive from,
//! so a reader holding the lock never sees them disagree.

use crate::ble::{BulbAddress, CharacteristicHandle, LinkId};
use crate::error::{ControllerError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Active link to a bulb and its resolved power characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulbLink {
    pub id: LinkId,
    pub power: CharacteristicHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulbRecord {
    address: BulbAddress,
    link: Option<BulbLink>,
    connection_state: ConnectionState,
    powered_on: bool,
    paused: bool,
}

impl BulbRecord {
    fn new(address: BulbAddress) -> Self {
        Self {
            address,
            link: None,
            connection_state: ConnectionState::Disconnected,
            powered_on: false,
            paused: false,
        }
    }

    pub fn address(&self) -> BulbAddress {
        self.address
    }

    pub fn link(&self) -> Option<BulbLink> {
        self.link
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Last known power state. Only meaningful while connected.
    pub fn powered_on(&self) -> bool {
        self.powered_on
    }

    /// Paused bulbs are never written by the controller.
    pub fn paused(&self) -> bool {
        self.paused
    }
}

/// Outcome of applying a power notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerReport {
    pub previous: bool,
    pub current: bool,
    /// New pause state if the flip-flop toggled.
    pub pause_toggled: Option<bool>,
}

#[derive(Debug)]
pub struct BulbRegistry {
    records: Vec<BulbRecord>,
    connected_count: usize,
    paused_count: usize,
}

pub type SharedRegistry = Arc<RwLock<BulbRegistry>>;

impl BulbRegistry {
    /// Create a record for every target. Duplicate addresses are collapsed.
    pub fn new(targets: impl IntoIterator<Item = BulbAddress>) -> Self {
        let mut records: Vec<BulbRecord> = Vec::new();
        for address in targets {
            if !records.iter().any(|r| r.address == address) {
                records.push(BulbRecord::new(address));
            }
        }
        Self {
            records,
            connected_count: 0,
            paused_count: 0,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, address: BulbAddress) -> Option<&BulbRecord> {
        self.records.iter().find(|r| r.address == address)
    }

    pub fn contains(&self, address: BulbAddress) -> bool {
        self.get(address).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BulbRecord> {
        self.records.iter()
    }

    pub fn addresses(&self) -> Vec<BulbAddress> {
        self.records.iter().map(|r| r.address).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected_count
    }

    pub fn paused_count(&self) -> usize {
        self.paused_count
    }

    pub fn all_connected(&self) -> bool {
        self.connected_count == self.records.len()
    }

    pub fn all_paused(&self) -> bool {
        self.paused_count == self.records.len()
    }

    /// Whether `address` is a target waiting for a connection attempt.
    pub fn awaiting_connection(&self, address: BulbAddress) -> bool {
        self.get(address)
            .is_some_and(|r| r.connection_state == ConnectionState::Disconnected)
    }

    fn record_mut(&mut self, address: BulbAddress) -> Result<&mut BulbRecord> {
        self.records
            .iter_mut()
            .find(|r| r.address == address)
            .ok_or(ControllerError::UnknownBulb(address))
    }

    pub fn begin_connecting(&mut self, address: BulbAddress) -> Result<()> {
        let record = self.record_mut(address)?;
        if record.connection_state == ConnectionState::Disconnected {
            record.connection_state = ConnectionState::Connecting;
        }
        Ok(())
    }

    /// Return a bulb whose connection attempt failed to `Disconnected`.
    pub fn abort_connecting(&mut self, address: BulbAddress) -> Result<()> {
        let record = self.record_mut(address)?;
        if record.connection_state == ConnectionState::Connecting {
            record.connection_state = ConnectionState::Disconnected;
            record.link = None;
        }
        Ok(())
    }

    /// Mark a bulb connected over `link`. `powered_on` seeds the power state
    /// when it could be read from the bulb.
    pub fn mark_connected(
        &mut self,
        address: BulbAddress,
        link: BulbLink,
        powered_on: Option<bool>,
    ) -> Result<()> {
        let record = self.record_mut(address)?;
        let newly_connected = record.connection_state != ConnectionState::Connected;
        record.connection_state = ConnectionState::Connected;
        record.link = Some(link);
        if let Some(on) = powered_on {
            record.powered_on = on;
        }
        if newly_connected {
            self.connected_count += 1;
        }
        Ok(())
    }

    /// Handle a link drop. Pause and power state are left untouched.
    ///
    /// Returns false when the event does not concern the bulb's current link.
    pub fn mark_disconnected(&mut self, address: BulbAddress, link: LinkId) -> bool {
        let Ok(record) = self.record_mut(address) else {
            return false;
        };
        if record.connection_state != ConnectionState::Connected
            || record.link.map(|l| l.id) != Some(link)
        {
            return false;
        }
        record.connection_state = ConnectionState::Disconnected;
        record.link = None;
        self.connected_count -= 1;
        true
    }

    /// Overwrite the cached power state, returning the previous value.
    pub fn set_powered_on(&mut self, address: BulbAddress, on: bool) -> Result<bool> {
        let record = self.record_mut(address)?;
        Ok(std::mem::replace(&mut record.powered_on, on))
    }

    /// Apply a power state reported by the bulb.
    ///
    /// With `pause_on_external_control`, a report that differs from the
    /// stored state, or any report while paused, toggles the pause flip-flop.
    /// The decision uses the previous value, which is overwritten afterwards.
    pub fn apply_power_report(
        &mut self,
        address: BulbAddress,
        on: bool,
        pause_on_external_control: bool,
    ) -> Result<PowerReport> {
        let record = self.record_mut(address)?;
        let previous = record.powered_on;

        let mut pause_toggled = None;
        if pause_on_external_control && (on != previous || record.paused) {
            record.paused = !record.paused;
            pause_toggled = Some(record.paused);
        }
        record.powered_on = on;

        match pause_toggled {
            Some(true) => self.paused_count += 1,
            Some(false) => self.paused_count -= 1,
            None => {}
        }

        Ok(PowerReport {
            previous,
            current: on,
            pause_toggled,
        })
    }

    /// Connected, unpaused bulbs with their power characteristic.
    pub fn controllable(&self) -> Vec<(BulbAddress, BulbLink)> {
        self.records
            .iter()
            .filter(|r| r.is_connected() && !r.paused)
            .filter_map(|r| r.link.map(|link| (r.address, link)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn addr(last: u8) -> BulbAddress {
        BulbAddress::new([0xfe, 0x2e, 0x97, 0x4e, 0x16, last])
    }

    fn link(id: u32) -> BulbLink {
        BulbLink {
            id: LinkId(id),
            power: CharacteristicHandle {
                link: LinkId(id),
                uuid: Uuid::nil(),
                can_read: true,
                can_write: true,
                can_notify: true,
                can_indicate: false,
            },
        }
    }

    fn assert_counts_consistent(registry: &BulbRegistry) {
        let connected = registry.iter().filter(|r| r.is_connected()).count();
        let paused = registry.iter().filter(|r| r.paused()).count();
        assert_eq!(registry.connected_count(), connected);
        assert_eq!(registry.paused_count(), paused);
    }

    #[test]
    fn test_records_created_for_each_target() {
        let registry = BulbRegistry::new([addr(1), addr(2), addr(1)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addresses(), vec![addr(1), addr(2)]);
        assert!(registry.awaiting_connection(addr(1)));
        assert!(!registry.contains(addr(3)));
        assert_counts_consistent(&registry);
    }

    #[test]
    fn test_connection_lifecycle_keeps_count() {
        let mut registry = BulbRegistry::new([addr(1), addr(2)]);

        registry.begin_connecting(addr(1)).unwrap();
        assert_eq!(
            registry.get(addr(1)).unwrap().connection_state(),
            ConnectionState::Connecting
        );
        assert_eq!(registry.connected_count(), 0);

        registry
            .mark_connected(addr(1), link(0), Some(true))
            .unwrap();
        assert_counts_consistent(&registry);
        assert_eq!(registry.connected_count(), 1);
        assert!(registry.get(addr(1)).unwrap().powered_on());

        // Marking twice must not double count
        registry.mark_connected(addr(1), link(0), None).unwrap();
        assert_eq!(registry.connected_count(), 1);

        assert!(registry.mark_disconnected(addr(1), LinkId(0)));
        assert_counts_consistent(&registry);
        assert_eq!(registry.connected_count(), 0);
        assert!(registry.get(addr(1)).unwrap().link().is_none());

        // Repeated disconnect is a no-op
        assert!(!registry.mark_disconnected(addr(1), LinkId(0)));
        assert_eq!(registry.connected_count(), 0);
    }

    #[test]
    fn test_stale_disconnect_ignored() {
        let mut registry = BulbRegistry::new([addr(1)]);
        registry.mark_connected(addr(1), link(4), None).unwrap();

        assert!(!registry.mark_disconnected(addr(1), LinkId(3)));
        assert!(registry.get(addr(1)).unwrap().is_connected());
        assert_counts_consistent(&registry);
    }

    #[test]
    fn test_abort_connecting() {
        let mut registry = BulbRegistry::new([addr(1)]);
        registry.begin_connecting(addr(1)).unwrap();
        registry.abort_connecting(addr(1)).unwrap();
        assert!(registry.awaiting_connection(addr(1)));
        assert!(registry.begin_connecting(addr(9)).is_err());
    }

    #[test]
    fn test_pause_flip_flop() {
        let mut registry = BulbRegistry::new([addr(1)]);
        registry.mark_connected(addr(1), link(0), Some(true)).unwrap();

        // Same value, not paused: no toggle
        let report = registry.apply_power_report(addr(1), true, true).unwrap();
        assert_eq!(report.pause_toggled, None);

        // External change pauses
        let report = registry.apply_power_report(addr(1), false, true).unwrap();
        assert_eq!(report.previous, true);
        assert_eq!(report.pause_toggled, Some(true));
        assert_eq!(registry.paused_count(), 1);

        // Any report while paused resumes, whatever the direction
        let report = registry.apply_power_report(addr(1), false, true).unwrap();
        assert_eq!(report.pause_toggled, Some(false));
        assert_eq!(registry.paused_count(), 0);
        assert_counts_consistent(&registry);
    }

    #[test]
    fn test_pause_disabled_only_stores_power() {
        let mut registry = BulbRegistry::new([addr(1)]);
        let report = registry.apply_power_report(addr(1), true, false).unwrap();
        assert_eq!(report.pause_toggled, None);
        assert!(registry.get(addr(1)).unwrap().powered_on());
        assert_eq!(registry.paused_count(), 0);
    }

    #[test]
    fn test_pause_survives_disconnect() {
        let mut registry = BulbRegistry::new([addr(1)]);
        registry.mark_connected(addr(1), link(0), Some(false)).unwrap();
        registry.apply_power_report(addr(1), true, true).unwrap();
        assert!(registry.get(addr(1)).unwrap().paused());

        registry.mark_disconnected(addr(1), LinkId(0));
        let record = registry.get(addr(1)).unwrap();
        assert!(record.paused());
        assert!(record.powered_on());

        registry.mark_connected(addr(1), link(1), None).unwrap();
        assert!(registry.get(addr(1)).unwrap().paused());
        assert_counts_consistent(&registry);
    }

    #[test]
    fn test_controllable_excludes_paused_and_disconnected() {
        let mut registry = BulbRegistry::new([addr(1), addr(2), addr(3)]);
        registry.mark_connected(addr(1), link(0), Some(false)).unwrap();
        registry.mark_connected(addr(2), link(1), Some(false)).unwrap();
        registry.apply_power_report(addr(2), true, true).unwrap();

        let controllable: Vec<_> = registry.controllable().into_iter().map(|(a, _)| a).collect();
        assert_eq!(controllable, vec![addr(1)]);
    }

    #[test]
    fn test_set_powered_on_returns_previous() {
        let mut registry = BulbRegistry::new([addr(1)]);
        assert_eq!(registry.set_powered_on(addr(1), true).unwrap(), false);
        assert_eq!(registry.set_powered_on(addr(1), false).unwrap(), true);
    }
}
