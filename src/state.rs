use std::sync::Arc;

use crate::auth::{AuthOrchestrator, CredentialVerifier, RefreshRotation, TokenCodec};
use crate::configuration::{AuthSettings, CookieSettings, JwtSettings};
use crate::error::AppError;
use crate::middleware::GateConfig;
use crate::session::SessionStore;
use crate::users::UserStore;

/// Components shared by every worker. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthOrchestrator,
    pub rotation: RefreshRotation,
    pub codec: TokenCodec,
    pub cookies: CookieSettings,
    pub gate: GateConfig,
}

impl AppState {
    pub fn build(
        jwt: &JwtSettings,
        cookies: CookieSettings,
        auth: &AuthSettings,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, AppError> {
        let codec = TokenCodec::new(jwt)?;
        let rotation = RefreshRotation::new(codec.clone(), sessions.clone(), users.clone());
        let orchestrator = AuthOrchestrator::new(codec.clone(), sessions, users, verifier)?;
        let gate = GateConfig::from_settings(&cookies, auth);

        Ok(Self {
            auth: orchestrator,
            rotation,
            codec,
            cookies,
            gate,
        })
    }
}
