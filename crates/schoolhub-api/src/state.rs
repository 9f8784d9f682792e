use std::sync::Arc;

use schoolhub_db::sea_orm::DatabaseConnection;

use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::{AppConfig, ConfigError};
use crate::error::ApiError;
use crate::identity::{GoogleVerifier, IdentityError};
use crate::ledger::DbLedger;
use crate::security::RateLimiter;
use crate::session::SessionService;
use crate::token::TokenCodec;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    /// `None` when no signing secret is configured (development only).
    pub sessions: Option<SessionService>,
    pub google: Option<GoogleVerifier>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        clock: SharedClock,
    ) -> Result<Self, StateError> {
        // A configured but unusable secret is fatal; only an absent one
        // disables the auth routes.
        let sessions = config
            .jwt_secret
            .as_deref()
            .map(|secret| TokenCodec::new(secret, clock.clone()))
            .transpose()?
            .map(|codec| {
                let ledger = Arc::new(DbLedger::new(db.clone(), clock.clone()));
                SessionService::new(codec, ledger, clock.clone())
            });

        let google = config
            .features
            .google
            .as_ref()
            .map(GoogleVerifier::new)
            .transpose()?;

        Ok(Self {
            db,
            sessions,
            google,
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            config: Arc::new(config),
        })
    }

    pub fn sessions(&self) -> Result<&SessionService, ApiError> {
        self.sessions.as_ref().ok_or(ApiError::AuthUnavailable)
    }

    pub fn google(&self) -> Result<&GoogleVerifier, ApiError> {
        self.google
            .as_ref()
            .ok_or(ApiError::FeatureDisabled("Google OAuth"))
    }
}
