// Attendance Session - advertise, discover, accept one peer, send the roll number

use crate::transport::ProximityTransport;
use crate::types::{
    NearbyPeer, PeerId, Precondition, SessionNotice, SessionState, TransportEvent,
    TransportOperation,
};
use crate::{ProximityError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::config::ProximityConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Naming and timing of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub display_name_prefix: String,
    pub service_id_prefix: String,
    /// Pause between advertising start and discovery start
    pub discovery_delay: Duration,
}

impl SessionConfig {
    /// Name advertised to nearby peers
    pub fn display_name(&self, roll_number: &str) -> String {
        format!("{}{}", self.display_name_prefix, roll_number)
    }

    /// Service id discovered on
    pub fn service_id(&self, roll_number: &str) -> String {
        format!("{}{}", self.service_id_prefix, roll_number)
    }
}

impl From<&ProximityConfig> for SessionConfig {
    fn from(config: &ProximityConfig) -> Self {
        Self {
            display_name_prefix: config.display_name_prefix.clone(),
            service_id_prefix: config.service_id_prefix.clone(),
            discovery_delay: Duration::from_millis(config.discovery_delay_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ProximityConfig::default())
    }
}

/// Everything that must hold before a session may start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreconditions {
    pub permissions_granted: bool,
    pub binding_valid: bool,
    pub roll_number: Option<String>,
}

impl SessionPreconditions {
    /// Returns the roll number, or the first unmet precondition
    pub fn check(&self) -> Result<String> {
        if !self.permissions_granted {
            return Err(ProximityError::PreconditionFailed(Precondition::PermissionsGranted));
        }
        if !self.binding_valid {
            return Err(ProximityError::PreconditionFailed(Precondition::BindingValid));
        }
        match self.roll_number.as_deref().map(str::trim) {
            Some(roll) if !roll.is_empty() => Ok(roll.to_string()),
            _ => Err(ProximityError::PreconditionFailed(Precondition::RollNumber)),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub local_peer_id: Option<PeerId>,
    pub roll_number: Option<String>,
    pub last_event: Option<TransportEvent>,
    pub nearby_peers: Vec<NearbyPeer>,
}

struct SessionInner {
    state: SessionState,
    local_peer_id: Option<PeerId>,
    roll_number: Option<String>,
    last_event: Option<TransportEvent>,
    nearby: HashMap<PeerId, NearbyPeer>,
    /// Bumped on every teardown so an in-flight start can tell it was stopped
    generation: u64,
}

impl SessionInner {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            local_peer_id: None,
            roll_number: None,
            last_event: None,
            nearby: HashMap::new(),
            generation: 0,
        }
    }
}

/// Handle to a running driver task
pub struct SessionDriver {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl SessionDriver {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the driver to exit and wait for it
    pub async fn shutdown(self) -> std::result::Result<(), JoinError> {
        self.shutdown.notify_one();
        self.task.await
    }
}

/// The student's attendance session.
///
/// One instance owns the transport for its lifetime. Commands and transport
/// events are serialized through a single lock, and every exit path returns
/// to [`SessionState::Idle`] with advertising and discovery stopped.
pub struct AttendanceSession {
    transport: Arc<dyn ProximityTransport>,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    notices: broadcast::Sender<SessionNotice>,
}

impl AttendanceSession {
    pub fn new(transport: Arc<dyn ProximityTransport>, config: SessionConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            transport,
            config,
            inner: Mutex::new(SessionInner::idle()),
            notices,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn local_peer_id(&self) -> Option<PeerId> {
        self.inner.lock().await.local_peer_id.clone()
    }

    /// Peers currently visible, most recently seen first
    pub async fn nearby_peers(&self) -> Vec<NearbyPeer> {
        let inner = self.inner.lock().await;
        sorted_peers(&inner.nearby)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            state: inner.state.clone(),
            local_peer_id: inner.local_peer_id.clone(),
            roll_number: inner.roll_number.clone(),
            last_event: inner.last_event.clone(),
            nearby_peers: sorted_peers(&inner.nearby),
        }
    }

    /// Start advertising, then discovery after the configured delay.
    ///
    /// Fails without touching the transport if a precondition is unmet or a
    /// session is already running. A transport failure tears the partial
    /// session down and leaves it idle.
    pub async fn start(&self, preconditions: &SessionPreconditions) -> Result<()> {
        let roll_number = preconditions.check()?;
        let display_name = self.config.display_name(&roll_number);
        let service_id = self.config.service_id(&roll_number);

        let generation = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_idle() {
                return Err(ProximityError::SessionAlreadyActive(inner.state.to_string()));
            }

            inner.state = SessionState::Starting;
            inner.roll_number = Some(roll_number.clone());
            inner.last_event = None;
            inner.nearby.clear();

            info!(
                display_name = %display_name,
                service_id = %service_id,
                transport = self.transport.transport_name(),
                "Starting attendance session"
            );

            let local_peer_id = match self.transport.start_advertising(&display_name).await {
                Ok(peer_id) => peer_id,
                Err(e) => {
                    return Err(self
                        .abort_start(&mut inner, TransportOperation::StartAdvertising, e)
                        .await)
                }
            };
            inner.local_peer_id = Some(local_peer_id);
            inner.generation
        };

        // The lock is released so stop() is not held up by the delay
        tokio::time::sleep(self.config.discovery_delay).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            info!("Attendance session stopped while starting");
            return Err(ProximityError::StartCancelled);
        }

        if !self.transport.is_advertising().await {
            let e = ProximityError::AdvertisingInactive;
            return Err(self.abort_start(&mut inner, TransportOperation::StartAdvertising, e).await);
        }

        if let Err(e) = self.transport.start_discovery(&service_id).await {
            return Err(self.abort_start(&mut inner, TransportOperation::StartDiscovery, e).await);
        }

        inner.state = SessionState::Broadcasting;
        info!(peer_id = ?inner.local_peer_id, "Attendance session broadcasting");
        self.notify(SessionNotice::Started {
            display_name,
            service_id,
        });
        Ok(())
    }

    async fn abort_start(
        &self,
        inner: &mut SessionInner,
        operation: TransportOperation,
        err: ProximityError,
    ) -> ProximityError {
        error!(operation = %operation, error = %err, "Failed to start attendance session");
        self.teardown(inner).await;
        self.notify(SessionNotice::TransportFailure {
            operation,
            message: err.user_message(),
        });
        err
    }

    /// Accept the pending invitation. The session stays pending until the
    /// transport reports the connection.
    pub async fn accept_invitation(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let peer_id = match &inner.state {
            SessionState::InvitationPending {
                peer_id,
                accepted: false,
                ..
            } => peer_id.clone(),
            SessionState::InvitationPending { peer_id, .. } => {
                debug!(peer_id = %peer_id, "Invitation already accepted");
                return Ok(());
            }
            _ => return Err(ProximityError::NoPendingInvitation),
        };

        if let Err(e) = self.transport.accept_connection(&peer_id).await {
            warn!(peer_id = %peer_id, error = %e, "Failed to accept connection");
            inner.state = SessionState::Broadcasting;
            self.notify(SessionNotice::TransportFailure {
                operation: TransportOperation::AcceptConnection,
                message: e.user_message(),
            });
            return Err(e);
        }

        if let SessionState::InvitationPending { accepted, .. } = &mut inner.state {
            *accepted = true;
        }
        info!(peer_id = %peer_id, "Invitation accepted");
        Ok(())
    }

    /// Decline the pending invitation and keep broadcasting
    pub async fn decline_invitation(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let peer_id = match &inner.state {
            SessionState::InvitationPending {
                peer_id,
                accepted: false,
                ..
            } => peer_id.clone(),
            SessionState::InvitationPending { .. } => {
                return Err(ProximityError::InvalidState(
                    "invitation was already accepted".to_string(),
                ))
            }
            _ => return Err(ProximityError::NoPendingInvitation),
        };

        inner.state = SessionState::Broadcasting;
        let rejected = self.transport.reject_connection(&peer_id).await;

        info!(peer_id = %peer_id, "Invitation declined");
        self.notify(SessionNotice::InvitationDeclined {
            peer_id: peer_id.clone(),
        });

        if let Err(e) = rejected {
            warn!(peer_id = %peer_id, error = %e, "Failed to reject connection");
            self.notify(SessionNotice::TransportFailure {
                operation: TransportOperation::RejectConnection,
                message: e.user_message(),
            });
            return Err(e);
        }
        Ok(())
    }

    /// Apply one transport event
    pub async fn handle_event(&self, event: TransportEvent) {
        let mut inner = self.inner.lock().await;

        if inner.state.is_idle() {
            debug!(event = event.kind(), peer_id = %event.peer_id(), "Ignoring event while idle");
            return;
        }
        inner.last_event = Some(event.clone());

        match event {
            TransportEvent::PeerFound { peer_id, name } => {
                let now = Utc::now();
                inner
                    .nearby
                    .entry(peer_id.clone())
                    .and_modify(|peer| {
                        peer.name = name.clone();
                        peer.last_seen = now;
                    })
                    .or_insert_with(|| NearbyPeer {
                        peer_id,
                        name,
                        discovered_at: now,
                        last_seen: now,
                    });
            }
            TransportEvent::PeerLost { peer_id } => {
                if inner.nearby.remove(&peer_id).is_some() {
                    debug!(peer_id = %peer_id, "Peer lost");
                }
            }
            TransportEvent::InvitationReceived { peer_id, name } => {
                if inner.state != SessionState::Broadcasting {
                    warn!(
                        peer_id = %peer_id,
                        state = %inner.state,
                        "Ignoring invitation while not broadcasting"
                    );
                    return;
                }

                info!(peer_id = %peer_id, peer_name = %name, "Invitation received");
                inner.state = SessionState::InvitationPending {
                    peer_id: peer_id.clone(),
                    peer_name: name.clone(),
                    accepted: false,
                };
                self.notify(SessionNotice::InvitationReceived {
                    peer_id,
                    peer_name: name,
                });
            }
            TransportEvent::Connected { peer_id } => {
                let expected = matches!(
                    &inner.state,
                    SessionState::InvitationPending { peer_id: pending, accepted: true, .. }
                        if *pending == peer_id
                );
                if !expected {
                    warn!(
                        peer_id = %peer_id,
                        state = %inner.state,
                        "Ignoring unexpected connection"
                    );
                    return;
                }

                info!(peer_id = %peer_id, "Connected to peer");
                inner.state = SessionState::Connected {
                    peer_id: peer_id.clone(),
                };
                self.notify(SessionNotice::Connected {
                    peer_id: peer_id.clone(),
                });
                self.send_roll_number(&mut inner, peer_id).await;
            }
            TransportEvent::Disconnected { peer_id } => {
                match inner.state.counterpart() {
                    Some(counterpart) if *counterpart == peer_id => {}
                    Some(_) => {
                        debug!(peer_id = %peer_id, "Ignoring disconnect from unrelated peer");
                        return;
                    }
                    None => {
                        debug!(
                            peer_id = %peer_id,
                            state = %inner.state,
                            "Ignoring disconnect with no peer in session"
                        );
                        return;
                    }
                }

                info!(peer_id = %peer_id, state = %inner.state, "Peer disconnected, ending session");
                self.teardown(&mut inner).await;
                self.notify(SessionNotice::Disconnected { peer_id });
            }
        }
    }

    async fn send_roll_number(&self, inner: &mut SessionInner, peer_id: PeerId) {
        let payload = inner.roll_number.clone().unwrap_or_default();

        match self.transport.send_payload(&peer_id, payload.as_bytes()).await {
            Ok(()) => {
                info!(peer_id = %peer_id, "Roll number sent");
                inner.state = SessionState::PayloadSent {
                    peer_id: peer_id.clone(),
                };
                self.notify(SessionNotice::PayloadSent { peer_id });
            }
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "Failed to send roll number");
                self.notify(SessionNotice::TransportFailure {
                    operation: TransportOperation::SendPayload,
                    message: e.user_message(),
                });
            }
        }
    }

    /// Stop the session from any state. Never fails.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let was_idle = inner.state.is_idle();

        self.teardown(&mut inner).await;

        if !was_idle {
            info!("Attendance session stopped");
            self.notify(SessionNotice::Stopped);
        }
    }

    /// Stop both transport activities and return to idle; failures are logged
    async fn teardown(&self, inner: &mut SessionInner) {
        if let Err(e) = self.transport.stop_advertising().await {
            warn!(error = %e, "Error stopping advertising");
        }
        if let Err(e) = self.transport.stop_discovery().await {
            warn!(error = %e, "Error stopping discovery");
        }

        inner.state = SessionState::Idle;
        inner.local_peer_id = None;
        inner.roll_number = None;
        inner.last_event = None;
        inner.nearby.clear();
        inner.generation = inner.generation.wrapping_add(1);
    }

    /// Spawn the task that feeds transport events into this session.
    ///
    /// The event subscription is taken before returning, so events emitted
    /// after this call are never missed.
    pub fn spawn_driver(self: &Arc<Self>) -> SessionDriver {
        let session = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let mut events = self.transport.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => session.handle_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Session driver lagged behind transport events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Transport event channel closed");
                            break;
                        }
                    },
                    _ = signal.notified() => {
                        debug!("Session driver received shutdown signal");
                        break;
                    }
                }
            }
        });

        SessionDriver { task, shutdown }
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

fn sorted_peers(nearby: &HashMap<PeerId, NearbyPeer>) -> Vec<NearbyPeer> {
    let mut peers: Vec<NearbyPeer> = nearby.values().cloned().collect();
    peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.peer_id.cmp(&b.peer_id)));
    peers
}
