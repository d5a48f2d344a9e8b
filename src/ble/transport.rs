//! Outcome contract of the BLE stack.
//!
//! The controller never touches radio, pairing or GATT internals directly; it
//! drives a [`BleTransport`] and receives asynchronous link-layer callbacks as
//! [`LinkEvent`]s on a channel handed to the transport at construction time.

use super::address::BulbAddress;
use super::protocol::ConnectionParams;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a client link object owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A resolved remote characteristic and the operations it advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub link: LinkId,
    pub uuid: Uuid,
    pub can_read: bool,
    pub can_write: bool,
    pub can_notify: bool,
    pub can_indicate: bool,
}

/// How value changes are delivered by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SubscriptionMode {
    Notify,
    Indicate,
}

impl SubscriptionMode {
    /// Pick the subscription mode for a characteristic, preferring notify.
    pub fn preferred_for(handle: &CharacteristicHandle) -> Option<Self> {
        if handle.can_notify {
            Some(Self::Notify)
        } else if handle.can_indicate {
            Some(Self::Indicate)
        } else {
            None
        }
    }
}

/// Asynchronous link-layer callback, queued for the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link to a peer dropped.
    Disconnected { address: BulbAddress, link: LinkId },
    /// A subscribed characteristic changed value.
    Notification {
        address: BulbAddress,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create the channel the transport uses to deliver [`LinkEvent`]s.
pub fn link_event_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// Predicate deciding whether a discovered device ends the scan.
pub type ScanMatcher<'a> = &'a (dyn Fn(&BulbAddress) -> bool + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("scan failed: {0}")]
    Scan(String),

    #[error("connection to {0} failed")]
    ConnectFailed(BulbAddress),

    #[error("{0} is not connected")]
    NotConnected(LinkId),

    #[error("unknown {0}")]
    UnknownLink(LinkId),

    #[error("bonding rejected by {0}")]
    BondRejected(BulbAddress),

    #[error("GATT read failed: {0}")]
    Read(String),

    #[error("GATT write failed: {0}")]
    Write(String),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("BLE stack error: {0}")]
    Stack(String),
}

/// Client-side BLE operations needed to control the bulbs.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan until an advertiser satisfies `matcher`, then stop and return it.
    ///
    /// Does not return on its own until a match is found; callers bound it
    /// with a timeout and cancel by dropping the future.
    async fn scan(&self, matcher: ScanMatcher<'_>) -> Result<BulbAddress, TransportError>;

    /// Allocate a new client link object.
    fn create_link(
        &self,
        params: ConnectionParams,
        connect_timeout: Duration,
    ) -> Result<LinkId, TransportError>;

    /// Connect a link object to `address`.
    ///
    /// With `refresh_services == false` the cached service table of a
    /// previously connected peer is reused.
    async fn connect(
        &self,
        link: LinkId,
        address: BulbAddress,
        refresh_services: bool,
    ) -> Result<(), TransportError>;

    fn is_connected(&self, link: LinkId) -> bool;

    /// Whether a bond with `address` is already stored.
    async fn is_bonded(&self, address: BulbAddress) -> bool;

    /// Establish a secure, bonded connection on an open link.
    async fn bond(&self, link: LinkId) -> Result<(), TransportError>;

    /// Resolve `characteristic` within `service`. `None` if either is absent.
    async fn discover_characteristic(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>, TransportError>;

    async fn read(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, handle: &CharacteristicHandle, value: &[u8])
    -> Result<(), TransportError>;

    /// Subscribe to value changes; they arrive as [`LinkEvent::Notification`].
    async fn subscribe(
        &self,
        handle: &CharacteristicHandle,
        mode: SubscriptionMode,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, link: LinkId) -> Result<(), TransportError>;

    /// Release a link object entirely.
    fn delete_link(&self, link: LinkId);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(can_notify: bool, can_indicate: bool) -> CharacteristicHandle {
        CharacteristicHandle {
            link: LinkId(0),
            uuid: Uuid::nil(),
            can_read: true,
            can_write: true,
            can_notify,
            can_indicate,
        }
    }

    #[test]
    fn test_notify_preferred_over_indicate() {
        assert_eq!(
            SubscriptionMode::preferred_for(&handle(true, true)),
            Some(SubscriptionMode::Notify)
        );
        assert_eq!(
            SubscriptionMode::preferred_for(&handle(false, true)),
            Some(SubscriptionMode::Indicate)
        );
        assert_eq!(SubscriptionMode::preferred_for(&handle(false, false)), None);
    }
}
