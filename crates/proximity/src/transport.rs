// Proximity transport abstraction
// The session drives any peer-to-peer radio through this trait

use crate::types::{PeerId, TransportEvent, TransportOperation};
use crate::{ProximityError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Capacity of the transport event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Peer-to-peer proximity transport (advertise, discover, connect, send).
///
/// Connection results are not synchronous: `accept_connection` only sends
/// the acceptance, and the outcome arrives later as a [`TransportEvent`].
#[async_trait]
pub trait ProximityTransport: Send + Sync {
    /// Start advertising under a display name; returns the local peer id
    async fn start_advertising(&self, display_name: &str) -> Result<PeerId>;

    /// Stop advertising. Idempotent.
    async fn stop_advertising(&self) -> Result<()>;

    /// Start discovering peers on a service id
    async fn start_discovery(&self, service_id: &str) -> Result<()>;

    /// Stop discovery. Idempotent.
    async fn stop_discovery(&self) -> Result<()>;

    async fn accept_connection(&self, peer_id: &PeerId) -> Result<()>;

    async fn reject_connection(&self, peer_id: &PeerId) -> Result<()>;

    /// Send bytes to a connected peer
    async fn send_payload(&self, peer_id: &PeerId, payload: &[u8]) -> Result<()>;

    async fn is_advertising(&self) -> bool;

    async fn is_discovering(&self) -> bool;

    /// Subscribe to unsolicited transport events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Get the transport name
    fn transport_name(&self) -> &str;
}

/// A call made against a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartAdvertising(String),
    StopAdvertising,
    StartDiscovery(String),
    StopDiscovery,
    AcceptConnection(PeerId),
    RejectConnection(PeerId),
    SendPayload(PeerId, Vec<u8>),
}

#[derive(Debug, Default)]
struct MemoryTransportState {
    advertising: Option<(String, PeerId)>,
    discovering: Option<String>,
    calls: Vec<TransportCall>,
    failing: HashSet<TransportOperation>,
    /// Advertising reports inactive even after a successful start
    advertising_silent: bool,
}

/// In-process transport used by tests and local development.
///
/// Records every call, lets a caller inject events and fail individual
/// operations.
pub struct MemoryTransport {
    state: RwLock<MemoryTransportState>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(MemoryTransportState::default()),
            events,
        }
    }

    /// Deliver an event to subscribers; returns how many received it
    pub fn emit(&self, event: TransportEvent) -> usize {
        debug!(event = event.kind(), peer_id = %event.peer_id(), "Injecting transport event");
        self.events.send(event).unwrap_or(0)
    }

    /// Make an operation fail until [`MemoryTransport::recover`] is called
    pub async fn fail(&self, operation: TransportOperation) {
        self.state.write().await.failing.insert(operation);
    }

    pub async fn recover(&self, operation: TransportOperation) {
        self.state.write().await.failing.remove(&operation);
    }

    /// Start advertising successfully but report it as inactive
    pub async fn set_advertising_silent(&self, silent: bool) {
        self.state.write().await.advertising_silent = silent;
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.read().await.calls.clone()
    }

    /// Payloads sent so far, in order
    pub async fn sent_payloads(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::SendPayload(peer, bytes) => Some((peer.clone(), bytes.clone())),
                _ => None,
            })
            .collect()
    }

    pub async fn advertised_name(&self) -> Option<String> {
        self.state
            .read()
            .await
            .advertising
            .as_ref()
            .map(|(name, _)| name.clone())
    }

    pub async fn discovery_service(&self) -> Option<String> {
        self.state.read().await.discovering.clone()
    }

    async fn record(&self, call: TransportCall, operation: TransportOperation) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(call);
        if state.failing.contains(&operation) {
            return Err(ProximityError::transport(operation, "injected failure"));
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProximityTransport for MemoryTransport {
    async fn start_advertising(&self, display_name: &str) -> Result<PeerId> {
        self.record(
            TransportCall::StartAdvertising(display_name.to_string()),
            TransportOperation::StartAdvertising,
        )
        .await?;

        let mut state = self.state.write().await;
        if state.advertising.is_some() {
            return Err(ProximityError::transport(
                TransportOperation::StartAdvertising,
                "already advertising",
            ));
        }

        let local_peer_id = format!("local-{}", uuid::Uuid::new_v4().simple());
        info!(display_name = %display_name, peer_id = %local_peer_id, "Advertising started");
        state.advertising = Some((display_name.to_string(), local_peer_id.clone()));
        Ok(local_peer_id)
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.record(TransportCall::StopAdvertising, TransportOperation::StopAdvertising)
            .await?;
        self.state.write().await.advertising = None;
        Ok(())
    }

    async fn start_discovery(&self, service_id: &str) -> Result<()> {
        self.record(
            TransportCall::StartDiscovery(service_id.to_string()),
            TransportOperation::StartDiscovery,
        )
        .await?;

        let mut state = self.state.write().await;
        if state.discovering.is_some() {
            return Err(ProximityError::transport(
                TransportOperation::StartDiscovery,
                "already discovering",
            ));
        }
        state.discovering = Some(service_id.to_string());
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.record(TransportCall::StopDiscovery, TransportOperation::StopDiscovery)
            .await?;
        self.state.write().await.discovering = None;
        Ok(())
    }

    async fn accept_connection(&self, peer_id: &PeerId) -> Result<()> {
        self.record(
            TransportCall::AcceptConnection(peer_id.clone()),
            TransportOperation::AcceptConnection,
        )
        .await
    }

    async fn reject_connection(&self, peer_id: &PeerId) -> Result<()> {
        self.record(
            TransportCall::RejectConnection(peer_id.clone()),
            TransportOperation::RejectConnection,
        )
        .await
    }

    async fn send_payload(&self, peer_id: &PeerId, payload: &[u8]) -> Result<()> {
        self.record(
            TransportCall::SendPayload(peer_id.clone(), payload.to_vec()),
            TransportOperation::SendPayload,
        )
        .await
    }

    async fn is_advertising(&self) -> bool {
        let state = self.state.read().await;
        state.advertising.is_some() && !state.advertising_silent
    }

    async fn is_discovering(&self) -> bool {
        self.state.read().await.discovering.is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn transport_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertising_lifecycle() {
        let transport = MemoryTransport::new();

        let peer_id = transport.start_advertising("Student-R1").await.unwrap();
        assert!(peer_id.starts_with("local-"));
        assert!(transport.is_advertising().await);
        assert_eq!(transport.advertised_name().await.as_deref(), Some("Student-R1"));

        // A second start without stopping is rejected
        assert!(transport.start_advertising("Student-R1").await.is_err());

        transport.stop_advertising().await.unwrap();
        transport.stop_advertising().await.unwrap();
        assert!(!transport.is_advertising().await);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let transport = MemoryTransport::new();
        transport.fail(TransportOperation::StartDiscovery).await;

        let err = transport.start_discovery("attendance.R1").await.unwrap_err();
        assert!(matches!(
            err,
            ProximityError::TransportFailed {
                operation: TransportOperation::StartDiscovery,
                ..
            }
        ));
        assert!(!transport.is_discovering().await);

        transport.recover(TransportOperation::StartDiscovery).await;
        transport.start_discovery("attendance.R1").await.unwrap();
        assert_eq!(transport.discovery_service().await.as_deref(), Some("attendance.R1"));
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let transport = MemoryTransport::new();
        assert_eq!(
            transport.emit(TransportEvent::PeerLost { peer_id: "p".into() }),
            0
        );

        let mut rx = transport.subscribe();
        transport.emit(TransportEvent::Connected { peer_id: "p1".into() });
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Connected { peer_id: "p1".into() }
        );
    }

    #[tokio::test]
    async fn test_records_payloads() {
        let transport = MemoryTransport::new();
        transport.send_payload(&"p1".to_string(), b"R1").await.unwrap();

        assert_eq!(
            transport.sent_payloads().await,
            vec![("p1".to_string(), b"R1".to_vec())]
        );
    }
}
