use crate::types::{Precondition, TransportOperation};
use device::DeviceError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ProximityError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot start session: {0}")]
    PreconditionFailed(Precondition),

    #[error("Session already active: {0}")]
    SessionAlreadyActive(String),

    #[error("No pending invitation")]
    NoPendingInvitation,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Transport failed to {operation}: {reason}")]
    TransportFailed {
        operation: TransportOperation,
        reason: String,
    },

    #[error("Session was stopped while starting")]
    StartCancelled,

    #[error("Advertising is not active")]
    AdvertisingInactive,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProximityError>;

impl ProximityError {
    pub fn transport(operation: TransportOperation, reason: impl Into<String>) -> Self {
        ProximityError::TransportFailed {
            operation,
            reason: reason.into(),
        }
    }
}

/// Context for error logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub user_id: Option<String>,
    pub peer_id: Option<String>,
    pub session_state: Option<String>,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            user_id: None,
            peer_id: None,
            session_state: None,
            additional_info: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_session_state(mut self, state: impl Into<String>) -> Self {
        self.session_state = Some(state.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            error_type = ?self,
            category = %self.category(),
            user_id = ?context.user_id,
            peer_id = ?context.peer_id,
            session_state = ?context.session_state,
            additional_info = ?context.additional_info,
            timestamp = %chrono::Utc::now(),
            "Attendance session error occurred"
        );
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ProximityError::PermissionDenied(details) => {
                format!("Permission denied: {}. Please grant the necessary permissions in your device settings.", details)
            }
            ProximityError::PreconditionFailed(precondition) => {
                format!("Attendance cannot start: {}.", precondition)
            }
            ProximityError::SessionAlreadyActive(state) => {
                format!("Attendance is already running ({}). Stop it before starting again.", state)
            }
            ProximityError::NoPendingInvitation => {
                "There is no connection request to answer.".to_string()
            }
            ProximityError::InvalidState(details) => {
                format!("That action is not available right now: {}.", details)
            }
            ProximityError::TransportFailed { operation, reason } => {
                format!("Could not {}: {}. Please try again.", operation, reason)
            }
            ProximityError::StartCancelled => {
                "Attendance was stopped before it finished starting.".to_string()
            }
            ProximityError::AdvertisingInactive => {
                "Your device could not start broadcasting. Please check Bluetooth and try again.".to_string()
            }
            ProximityError::NotAuthenticated => {
                "Please sign in to give attendance.".to_string()
            }
            ProximityError::Device(DeviceError::BindingConflict(report)) => report.message.clone(),
            ProximityError::Device(err) if err.is_connectivity() => {
                "Could not reach the attendance server. Please check your connection and try again.".to_string()
            }
            ProximityError::Device(err) => {
                format!("Device check failed: {}. Please try again or contact admin.", err)
            }
            ProximityError::InternalError(details) => {
                format!("An internal error occurred: {}. Please try again or contact support.", details)
            }
        }
    }

    /// Get error category for metrics and monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProximityError::PermissionDenied(_) => ErrorCategory::Permission,
            ProximityError::PreconditionFailed(_) => ErrorCategory::Precondition,
            ProximityError::SessionAlreadyActive(_) => ErrorCategory::Session,
            ProximityError::NoPendingInvitation => ErrorCategory::Session,
            ProximityError::InvalidState(_) => ErrorCategory::Session,
            ProximityError::StartCancelled => ErrorCategory::Session,
            ProximityError::TransportFailed { .. } => ErrorCategory::Transport,
            ProximityError::AdvertisingInactive => ErrorCategory::Transport,
            ProximityError::NotAuthenticated => ErrorCategory::Authentication,
            ProximityError::Device(DeviceError::BindingConflict(_)) => ErrorCategory::Binding,
            ProximityError::Device(DeviceError::Auth(_)) => ErrorCategory::Authentication,
            ProximityError::Device(_) => ErrorCategory::Binding,
            ProximityError::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Permission,
    Precondition,
    Session,
    Transport,
    Authentication,
    Binding,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Binding => write!(f, "binding"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
