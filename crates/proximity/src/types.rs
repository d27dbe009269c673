use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-assigned identifier for a peer
pub type PeerId = String;

/// Unsolicited events delivered by the proximity transport.
///
/// All transport callbacks arrive on this one channel so a single driver can
/// apply them in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportEvent {
    PeerFound { peer_id: PeerId, name: String },
    PeerLost { peer_id: PeerId },
    InvitationReceived { peer_id: PeerId, name: String },
    Connected { peer_id: PeerId },
    Disconnected { peer_id: PeerId },
}

impl TransportEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            TransportEvent::PeerFound { peer_id, .. }
            | TransportEvent::PeerLost { peer_id }
            | TransportEvent::InvitationReceived { peer_id, .. }
            | TransportEvent::Connected { peer_id }
            | TransportEvent::Disconnected { peer_id } => peer_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::PeerFound { .. } => "peer_found",
            TransportEvent::PeerLost { .. } => "peer_lost",
            TransportEvent::InvitationReceived { .. } => "invitation_received",
            TransportEvent::Connected { .. } => "connected",
            TransportEvent::Disconnected { .. } => "disconnected",
        }
    }
}

/// A counterpart currently visible to discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyPeer {
    pub peer_id: PeerId,
    pub name: String,
    pub discovered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// State of the proximity attendance session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    /// Advertising and discovering
    Broadcasting,
    InvitationPending {
        peer_id: PeerId,
        peer_name: String,
        /// Accept was sent; waiting for the transport's `Connected`
        accepted: bool,
    },
    Connected {
        peer_id: PeerId,
    },
    PayloadSent {
        peer_id: PeerId,
    },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    /// Peer the session is currently negotiating or connected with
    pub fn counterpart(&self) -> Option<&PeerId> {
        match self {
            SessionState::InvitationPending { peer_id, .. }
            | SessionState::Connected { peer_id }
            | SessionState::PayloadSent { peer_id } => Some(peer_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Broadcasting => "broadcasting",
            SessionState::InvitationPending { .. } => "invitation_pending",
            SessionState::Connected { .. } => "connected",
            SessionState::PayloadSent { .. } => "payload_sent",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Requirement that must hold before a session may start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    PermissionsGranted,
    BindingValid,
    RollNumber,
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::PermissionsGranted => write!(f, "required permissions are not granted"),
            Precondition::BindingValid => write!(f, "this device is not validated for the student"),
            Precondition::RollNumber => write!(f, "no roll number is available"),
        }
    }
}

/// Transport operations that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportOperation {
    StartAdvertising,
    StopAdvertising,
    StartDiscovery,
    StopDiscovery,
    AcceptConnection,
    RejectConnection,
    SendPayload,
}

impl std::fmt::Display for TransportOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportOperation::StartAdvertising => write!(f, "start advertising"),
            TransportOperation::StopAdvertising => write!(f, "stop advertising"),
            TransportOperation::StartDiscovery => write!(f, "start discovery"),
            TransportOperation::StopDiscovery => write!(f, "stop discovery"),
            TransportOperation::AcceptConnection => write!(f, "accept connection"),
            TransportOperation::RejectConnection => write!(f, "reject connection"),
            TransportOperation::SendPayload => write!(f, "send payload"),
        }
    }
}

/// User-visible notices published by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionNotice {
    Started { display_name: String, service_id: String },
    InvitationReceived { peer_id: PeerId, peer_name: String },
    InvitationDeclined { peer_id: PeerId },
    Connected { peer_id: PeerId },
    PayloadSent { peer_id: PeerId },
    Disconnected { peer_id: PeerId },
    Stopped,
    TransportFailure { operation: TransportOperation, message: String },
}
