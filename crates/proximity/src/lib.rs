pub mod types;
pub mod error;
pub mod transport;
pub mod permissions;
pub mod session;
pub mod controller;
pub mod app;

pub use types::*;
pub use error::{ProximityError, Result, ErrorContext, ErrorCategory};
pub use transport::{ProximityTransport, MemoryTransport, TransportCall};
pub use permissions::{Capability, CapabilityGate, PermissionManager, PermissionStatus};
pub use session::{
    AttendanceSession, SessionConfig, SessionDriver, SessionPreconditions, SessionSnapshot,
};
pub use controller::{AppEvent, AttendanceController, Drawer};
pub use app::{bootstrap, App};
