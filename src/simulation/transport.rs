//! In-memory BLE transport with simulated bulbs.
//!
//! Behaves like a well-mannered BLE stack: connected peripherals stop
//! advertising, local and remote disconnects both raise
//! [`LinkEvent::Disconnected`], and a bulb notifies subscribers whenever its
//! power state changes, including after our own writes.

use crate::ble::protocol::{decode_power, encode_power};
use crate::ble::{
    BleTransport, BulbAddress, CharacteristicHandle, ConnectionParams, LIGHT_SERVICE_UUID,
    LinkEvent, LinkEventSender, LinkId, POWER_STATE_CHAR_UUID, ScanMatcher, SubscriptionMode,
    TransportError,
};
use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const SCAN_TICK: Duration = Duration::from_millis(10);

/// Behaviour of one simulated bulb.
#[derive(Debug, Clone)]
pub struct SimulatedBulb {
    pub address: BulbAddress,
    pub powered_on: bool,
    pub advertising: bool,
    pub accepts_bond: bool,
    pub has_light_service: bool,
    pub can_read: bool,
    pub can_write: bool,
    pub can_notify: bool,
    pub can_indicate: bool,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    pub fail_writes: bool,
}

impl SimulatedBulb {
    pub fn new(address: BulbAddress) -> Self {
        Self {
            address,
            powered_on: false,
            advertising: true,
            accepts_bond: true,
            has_light_service: true,
            can_read: true,
            can_write: true,
            can_notify: true,
            can_indicate: true,
            fail_connect: false,
            fail_subscribe: false,
            fail_writes: false,
        }
    }

    pub fn powered(mut self, on: bool) -> Self {
        self.powered_on = on;
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn rejecting_bond(mut self) -> Self {
        self.accepts_bond = false;
        self
    }

    pub fn without_light_service(mut self) -> Self {
        self.has_light_service = false;
        self
    }

    pub fn indicate_only(mut self) -> Self {
        self.can_notify = false;
        self
    }

    pub fn without_subscriptions(mut self) -> Self {
        self.can_notify = false;
        self.can_indicate = false;
        self
    }

    pub fn with_subscribe_failure(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn with_write_failure(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

#[derive(Debug)]
struct BulbState {
    bulb: SimulatedBulb,
    bonded: bool,
    subscription: Option<SubscriptionMode>,
    full_discoveries: usize,
    cached_reconnects: usize,
}

#[derive(Debug)]
struct LinkState {
    peer: Option<BulbAddress>,
    connected: bool,
    params: ConnectionParams,
}

#[derive(Debug, Default)]
struct SimState {
    bulbs: HashMap<BulbAddress, BulbState>,
    links: HashMap<LinkId, LinkState>,
    next_link: u32,
    writes: Vec<(BulbAddress, bool)>,
}

impl SimState {
    fn connected_peer(&self, link: LinkId) -> Result<BulbAddress, TransportError> {
        let state = self.links.get(&link).ok_or(TransportError::UnknownLink(link))?;
        match (state.connected, state.peer) {
            (true, Some(peer)) => Ok(peer),
            _ => Err(TransportError::NotConnected(link)),
        }
    }

    fn link_to(&self, address: BulbAddress) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, l)| l.connected && l.peer == Some(address))
            .map(|(id, _)| *id)
    }
}

/// Simulated BLE stack.
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    events: LinkEventSender,
}

impl SimulatedTransport {
    pub fn new(events: LinkEventSender) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    pub fn add_bulb(&self, bulb: SimulatedBulb) {
        self.state.lock().bulbs.insert(
            bulb.address,
            BulbState {
                bulb,
                bonded: false,
                subscription: None,
                full_discoveries: 0,
                cached_reconnects: 0,
            },
        );
    }

    /// Every power write received, in order.
    pub fn writes(&self) -> Vec<(BulbAddress, bool)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn powered_on(&self, address: BulbAddress) -> Option<bool> {
        self.state.lock().bulbs.get(&address).map(|b| b.bulb.powered_on)
    }

    pub fn is_bonded_with(&self, address: BulbAddress) -> bool {
        self.state
            .lock()
            .bulbs
            .get(&address)
            .is_some_and(|b| b.bonded)
    }

    pub fn subscription(&self, address: BulbAddress) -> Option<SubscriptionMode> {
        self.state
            .lock()
            .bulbs
            .get(&address)
            .and_then(|b| b.subscription)
    }

    pub fn full_discoveries(&self, address: BulbAddress) -> usize {
        self.state
            .lock()
            .bulbs
            .get(&address)
            .map_or(0, |b| b.full_discoveries)
    }

    pub fn cached_reconnects(&self, address: BulbAddress) -> usize {
        self.state
            .lock()
            .bulbs
            .get(&address)
            .map_or(0, |b| b.cached_reconnects)
    }

    /// Number of allocated link objects.
    pub fn live_links(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn connection_params(&self, link: LinkId) -> Option<ConnectionParams> {
        self.state.lock().links.get(&link).map(|l| l.params)
    }

    pub fn set_write_failure(&self, address: BulbAddress, fail: bool) {
        if let Some(state) = self.state.lock().bulbs.get_mut(&address) {
            state.bulb.fail_writes = fail;
        }
    }

    pub fn set_advertising(&self, address: BulbAddress, advertising: bool) {
        if let Some(state) = self.state.lock().bulbs.get_mut(&address) {
            state.bulb.advertising = advertising;
        }
    }

    /// Someone flipped the bulb outside our control (wall switch, app).
    pub fn external_power_change(&self, address: BulbAddress, on: bool) {
        let mut state = self.state.lock();
        let subscribed = match state.bulbs.get_mut(&address) {
            Some(bulb) => {
                bulb.bulb.powered_on = on;
                bulb.subscription.is_some()
            }
            None => return,
        };
        if subscribed && state.link_to(address).is_some() {
            self.emit(LinkEvent::Notification {
                address,
                characteristic: POWER_STATE_CHAR_UUID,
                value: encode_power(on).to_vec(),
            });
        }
    }

    /// Deliver an arbitrary notification as if it came from `address`.
    pub fn raw_notification(&self, address: BulbAddress, characteristic: Uuid, value: Vec<u8>) {
        self.emit(LinkEvent::Notification {
            address,
            characteristic,
            value,
        });
    }

    /// The peripheral went out of range.
    pub fn drop_link(&self, address: BulbAddress) {
        let mut state = self.state.lock();
        let Some(link) = state.link_to(address) else {
            return;
        };
        if let Some(l) = state.links.get_mut(&link) {
            l.connected = false;
        }
        if let Some(bulb) = state.bulbs.get_mut(&address) {
            bulb.subscription = None;
        }
        self.emit(LinkEvent::Disconnected { address, link });
    }

    /// A peripheral asks for new connection parameters. Returns whether they were applied.
    pub fn peer_requests_params(&self, address: BulbAddress, params: ConnectionParams) -> bool {
        if !ConnectionParams::accepts_peer_request(&params) {
            return false;
        }
        let mut state = self.state.lock();
        let Some(link) = state.link_to(address) else {
            return false;
        };
        if let Some(l) = state.links.get_mut(&link) {
            l.params = params;
        }
        true
    }

    fn emit(&self, event: LinkEvent) {
        trace!("[Sim] {:?}", event);
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn scan(&self, matcher: ScanMatcher<'_>) -> Result<BulbAddress, TransportError> {
        loop {
            let found = {
                let state = self.state.lock();
                let mut candidates: Vec<BulbAddress> = state
                    .bulbs
                    .values()
                    .filter(|b| b.bulb.advertising && state.link_to(b.bulb.address).is_none())
                    .map(|b| b.bulb.address)
                    .collect();
                candidates.sort();
                candidates.into_iter().find(|a| matcher(a))
            };
            if let Some(address) = found {
                return Ok(address);
            }
            tokio::time::sleep(SCAN_TICK).await;
        }
    }

    fn create_link(
        &self,
        params: ConnectionParams,
        _connect_timeout: Duration,
    ) -> Result<LinkId, TransportError> {
        let mut state = self.state.lock();
        let link = LinkId(state.next_link);
        state.next_link += 1;
        state.links.insert(
            link,
            LinkState {
                peer: None,
                connected: false,
                params,
            },
        );
        Ok(link)
    }

    async fn connect(
        &self,
        link: LinkId,
        address: BulbAddress,
        refresh_services: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.links.contains_key(&link) {
            return Err(TransportError::UnknownLink(link));
        }
        let bulb = state
            .bulbs
            .get_mut(&address)
            .filter(|b| !b.bulb.fail_connect)
            .ok_or(TransportError::ConnectFailed(address))?;
        if refresh_services {
            bulb.full_discoveries += 1;
        } else {
            bulb.cached_reconnects += 1;
        }

        if let Some(l) = state.links.get_mut(&link) {
            l.peer = Some(address);
            l.connected = true;
            l.params = ConnectionParams::ESTABLISHED;
        }
        debug!("[Sim] {} connected to {}", link, address);
        Ok(())
    }

    fn is_connected(&self, link: LinkId) -> bool {
        self.state.lock().links.get(&link).is_some_and(|l| l.connected)
    }

    async fn is_bonded(&self, address: BulbAddress) -> bool {
        self.is_bonded_with(address)
    }

    async fn bond(&self, link: LinkId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let peer = state.connected_peer(link)?;
        let bulb = state
            .bulbs
            .get_mut(&peer)
            .ok_or(TransportError::BondRejected(peer))?;
        if !bulb.bulb.accepts_bond {
            return Err(TransportError::BondRejected(peer));
        }
        bulb.bonded = true;
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>, TransportError> {
        let state = self.state.lock();
        let peer = state.connected_peer(link)?;
        let Some(bulb) = state.bulbs.get(&peer) else {
            return Ok(None);
        };
        if !bulb.bulb.has_light_service
            || service != LIGHT_SERVICE_UUID
            || characteristic != POWER_STATE_CHAR_UUID
        {
            return Ok(None);
        }
        Ok(Some(CharacteristicHandle {
            link,
            uuid: characteristic,
            can_read: bulb.bulb.can_read,
            can_write: bulb.bulb.can_write,
            can_notify: bulb.bulb.can_notify,
            can_indicate: bulb.bulb.can_indicate,
        }))
    }

    async fn read(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let state = self.state.lock();
        let peer = state.connected_peer(handle.link)?;
        let bulb = state
            .bulbs
            .get(&peer)
            .ok_or(TransportError::NotConnected(handle.link))?;
        if !bulb.bulb.can_read {
            return Err(TransportError::Read("characteristic not readable".into()));
        }
        Ok(encode_power(bulb.bulb.powered_on).to_vec())
    }

    async fn write(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let peer = state.connected_peer(handle.link)?;
        let on = decode_power(value).ok_or_else(|| TransportError::Write("empty payload".into()))?;
        let bulb = state
            .bulbs
            .get_mut(&peer)
            .ok_or(TransportError::NotConnected(handle.link))?;
        if bulb.bulb.fail_writes {
            return Err(TransportError::Write(format!("{peer} rejected the write")));
        }
        let changed = bulb.bulb.powered_on != on;
        bulb.bulb.powered_on = on;
        let subscribed = bulb.subscription.is_some();
        state.writes.push((peer, on));

        if changed && subscribed {
            self.emit(LinkEvent::Notification {
                address: peer,
                characteristic: POWER_STATE_CHAR_UUID,
                value: encode_power(on).to_vec(),
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: &CharacteristicHandle,
        mode: SubscriptionMode,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let peer = state.connected_peer(handle.link)?;
        let bulb = state
            .bulbs
            .get_mut(&peer)
            .ok_or(TransportError::NotConnected(handle.link))?;
        if bulb.bulb.fail_subscribe {
            return Err(TransportError::Subscribe(format!("{peer} refused {mode}")));
        }
        bulb.subscription = Some(mode);
        Ok(())
    }

    async fn disconnect(&self, link: LinkId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let peer = state.connected_peer(link)?;
        if let Some(l) = state.links.get_mut(&link) {
            l.connected = false;
        }
        if let Some(bulb) = state.bulbs.get_mut(&peer) {
            bulb.subscription = None;
        }
        self.emit(LinkEvent::Disconnected {
            address: peer,
            link,
        });
        Ok(())
    }

    fn delete_link(&self, link: LinkId) {
        self.state.lock().links.remove(&link);
    }
}
