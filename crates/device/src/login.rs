// Login gate - device checks that run right after authentication

use crate::binding::{BindingResult, DeviceBindingValidator};
use crate::error::{DeviceError, Result};
use async_trait::async_trait;
use shared::models::AuthIdentity;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The authentication backend's session, as seen by the device checks
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Currently authenticated user, if any
    async fn current_user(&self) -> Result<Option<AuthIdentity>>;

    /// End the authenticated session remotely
    async fn sign_out(&self) -> Result<()>;
}

/// Runs the conflict scan at login and the authoritative binding check,
/// signing the user out whenever either is fatal.
#[derive(Clone)]
pub struct LoginGate {
    validator: DeviceBindingValidator,
    auth: Arc<dyn AuthSession>,
}

impl LoginGate {
    pub fn new(validator: DeviceBindingValidator, auth: Arc<dyn AuthSession>) -> Self {
        Self { validator, auth }
    }

    pub fn validator(&self) -> &DeviceBindingValidator {
        &self.validator
    }

    /// Admit the authenticated user unless this device belongs to someone else.
    ///
    /// On conflict the session is signed out and the report is returned as
    /// [`DeviceError::BindingConflict`]. A failed lookup does not block.
    pub async fn admit(&self) -> Result<AuthIdentity> {
        let user = self
            .auth
            .current_user()
            .await?
            .ok_or_else(|| DeviceError::Auth("no authenticated session".to_string()))?;

        let local = self.validator.identity().get_or_create_identity().await;
        let report = self.validator.check_conflicts(&local, &user).await;

        if report.has_conflict {
            warn!(user_id = %user.user_id, "Device conflict at login, signing out");
            self.sign_out_quietly().await;
            return Err(DeviceError::BindingConflict(report));
        }

        if report.lookup_failed {
            warn!(user_id = %user.user_id, "Conflict check unavailable, admitting user");
        } else {
            info!(user_id = %user.user_id, "User admitted");
        }

        Ok(user)
    }

    /// Bind or validate the device for the user; signs out on fatal outcomes
    pub async fn bind(&self, user: &AuthIdentity) -> BindingResult {
        let result = self.validator.validate(&user.user_id).await;

        if result.outcome.requires_sign_out() {
            warn!(user_id = %user.user_id, outcome = %result.outcome, "Binding failed fatally, signing out");
            self.sign_out_quietly().await;
        }

        result
    }

    /// End the authenticated session
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await
    }

    async fn sign_out_quietly(&self) {
        if let Err(e) = self.auth.sign_out().await {
            error!(error = %e, "Error signing out");
        }
    }
}
