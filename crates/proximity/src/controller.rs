// Attendance Controller - ties login, binding, permissions and the session together

use crate::error::ErrorContext;
use crate::permissions::CapabilityGate;
use crate::session::{AttendanceSession, SessionDriver, SessionPreconditions};
use crate::types::{SessionNotice, SessionState};
use crate::{ProximityError, Result};
use device::{BindingOutcome, BindingResult, DeviceError, LoginGate};
use shared::models::AuthIdentity;
use shared::EventBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cross-screen application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ToggleDrawer,
    SignedIn { user_id: String },
    SignedOut,
    /// The login-time scan found this device bound to another student
    DeviceConflict { message: String },
    BindingRejected { outcome: BindingOutcome, message: String },
    Session(SessionNotice),
}

/// Drawer visibility, driven by [`AppEvent`]s on the bus
#[derive(Debug, Clone, Default)]
pub struct Drawer {
    open: Arc<AtomicBool>,
}

impl Drawer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn apply(&self, event: &AppEvent) {
        match event {
            AppEvent::ToggleDrawer => {
                self.open.fetch_xor(true, Ordering::SeqCst);
            }
            AppEvent::SignedOut => self.open.store(false, Ordering::SeqCst),
            _ => {}
        }
    }

    /// Follow the bus until it closes
    pub fn follow(&self, bus: &EventBus<AppEvent>) -> JoinHandle<()> {
        let drawer = self.clone();
        let mut events = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => drawer.apply(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Drawer lagged behind app events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct ActiveStudent {
    identity: AuthIdentity,
    binding: BindingResult,
    roll_number: Option<String>,
}

#[derive(Default)]
struct MountedTasks {
    driver: Option<SessionDriver>,
    forwarder: Option<JoinHandle<()>>,
}

/// UI-facing owner of the attendance session
pub struct AttendanceController {
    gate: LoginGate,
    permissions: Arc<dyn CapabilityGate>,
    session: Arc<AttendanceSession>,
    bus: EventBus<AppEvent>,
    student: RwLock<Option<ActiveStudent>>,
    tasks: Mutex<MountedTasks>,
}

impl AttendanceController {
    pub fn new(
        gate: LoginGate,
        permissions: Arc<dyn CapabilityGate>,
        session: Arc<AttendanceSession>,
        bus: EventBus<AppEvent>,
    ) -> Self {
        Self {
            gate,
            permissions,
            session,
            bus,
            student: RwLock::new(None),
            tasks: Mutex::new(MountedTasks::default()),
        }
    }

    pub fn session(&self) -> &Arc<AttendanceSession> {
        &self.session
    }

    pub fn bus(&self) -> &EventBus<AppEvent> {
        &self.bus
    }

    /// Request permissions and start feeding transport events into the
    /// session. Session notices are republished on the bus.
    pub async fn mount(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.driver.is_some() {
            debug!("Controller already mounted");
            return;
        }

        if !self.permissions.request_all().await {
            warn!("Not every permission was granted; broadcasting is unavailable");
        }

        tasks.driver = Some(self.session.spawn_driver());

        let mut notices = self.session.subscribe_notices();
        let bus = self.bus.clone();
        tasks.forwarder = Some(tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        bus.publish(AppEvent::Session(notice));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notice forwarder lagged behind session");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        info!("Attendance controller mounted");
    }

    /// Stop any session and the background tasks
    pub async fn unmount(&self) {
        self.session.stop().await;

        let mut tasks = self.tasks.lock().await;
        if let Some(driver) = tasks.driver.take() {
            if let Err(e) = driver.shutdown().await {
                warn!(error = %e, "Session driver ended abnormally");
            }
        }
        if let Some(forwarder) = tasks.forwarder.take() {
            forwarder.abort();
        }

        info!("Attendance controller unmounted");
    }

    /// Admit the authenticated user and bind this device to them.
    ///
    /// A device conflict signs the user out and is returned as an error. Any
    /// other failed binding is returned as a result with `is_valid` false.
    pub async fn login(&self) -> Result<BindingResult> {
        let user = match self.gate.admit().await {
            Ok(user) => user,
            Err(DeviceError::BindingConflict(report)) => {
                *self.student.write().await = None;
                self.bus.publish(AppEvent::DeviceConflict {
                    message: report.message.clone(),
                });
                self.bus.publish(AppEvent::SignedOut);
                return Err(ProximityError::Device(DeviceError::BindingConflict(report)));
            }
            Err(DeviceError::Auth(reason)) => {
                debug!(reason = %reason, "Login attempted without a session");
                return Err(ProximityError::NotAuthenticated);
            }
            Err(e) => return Err(e.into()),
        };

        let binding = self.gate.bind(&user).await;

        if !binding.is_valid {
            self.bus.publish(AppEvent::BindingRejected {
                outcome: binding.outcome,
                message: binding.message.clone(),
            });

            if binding.outcome.requires_sign_out() {
                *self.student.write().await = None;
                self.bus.publish(AppEvent::SignedOut);
                return Ok(binding);
            }
        }

        let roll_number = if binding.is_valid {
            self.lookup_roll_number(&user).await
        } else {
            None
        };

        *self.student.write().await = Some(ActiveStudent {
            identity: user.clone(),
            binding: binding.clone(),
            roll_number,
        });
        self.bus.publish(AppEvent::SignedIn {
            user_id: user.user_id,
        });

        Ok(binding)
    }

    async fn lookup_roll_number(&self, user: &AuthIdentity) -> Option<String> {
        match self.gate.validator().records().get_by_user_id(&user.user_id).await {
            Ok(Some(record)) => Some(record.roll_number),
            Ok(None) => None,
            Err(e) => {
                warn!(user_id = %user.user_id, error = %e, "Could not load roll number");
                None
            }
        }
    }

    /// Current binding, if a student is signed in
    pub async fn binding(&self) -> Option<BindingResult> {
        self.student
            .read()
            .await
            .as_ref()
            .map(|student| student.binding.clone())
    }

    pub async fn roll_number(&self) -> Option<String> {
        self.student
            .read()
            .await
            .as_ref()
            .and_then(|student| student.roll_number.clone())
    }

    pub async fn preconditions(&self) -> SessionPreconditions {
        let permissions_granted = self.permissions.permissions_granted().await;
        let student = self.student.read().await;

        SessionPreconditions {
            permissions_granted,
            binding_valid: student
                .as_ref()
                .map(|student| student.binding.is_valid)
                .unwrap_or(false),
            roll_number: student
                .as_ref()
                .and_then(|student| student.roll_number.clone()),
        }
    }

    pub async fn start_broadcasting(&self) -> Result<()> {
        let preconditions = self.preconditions().await;

        if let Err(e) = self.session.start(&preconditions).await {
            e.log_with_context(&self.error_context().await.with_info("start_broadcasting"));
            return Err(e);
        }
        Ok(())
    }

    pub async fn accept_invitation(&self) -> Result<()> {
        let peer_id = self.session.state().await.counterpart().cloned();

        if let Err(e) = self.session.accept_invitation().await {
            let mut context = self.error_context().await.with_info("accept_invitation");
            if let Some(peer_id) = peer_id {
                context = context.with_peer_id(peer_id);
            }
            e.log_with_context(&context);
            return Err(e);
        }
        Ok(())
    }

    pub async fn decline_invitation(&self) -> Result<()> {
        self.session.decline_invitation().await
    }

    pub async fn stop_broadcasting(&self) {
        self.session.stop().await;
    }

    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }

    pub fn toggle_drawer(&self) {
        self.bus.publish(AppEvent::ToggleDrawer);
    }

    /// Stop broadcasting and end the authenticated session
    pub async fn sign_out(&self) -> Result<()> {
        self.session.stop().await;
        *self.student.write().await = None;

        let signed_out = self.gate.sign_out().await;
        self.bus.publish(AppEvent::SignedOut);
        signed_out.map_err(ProximityError::from)
    }

    async fn error_context(&self) -> ErrorContext {
        let mut context =
            ErrorContext::new().with_session_state(self.session.state().await.to_string());
        if let Some(student) = self.student.read().await.as_ref() {
            context = context.with_user_id(student.identity.user_id.clone());
        }
        context
    }
}
