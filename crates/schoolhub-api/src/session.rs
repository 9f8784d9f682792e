use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::ledger::{LedgerError, RefreshTokenLedger};
use crate::token::{Role, TokenCodec, TokenError, TokenPayload};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid token: {0}")]
    InvalidToken(TokenError),

    #[error("refresh token was never issued")]
    UnknownToken,

    #[error("refresh token already used or expired (user {user_id})")]
    TokenReuse { user_id: Uuid },

    #[error("refresh token collided with an existing ledger entry")]
    DuplicateToken,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(sea_orm::DbErr),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => SessionError::Signing(msg),
            other => SessionError::InvalidToken(other),
        }
    }
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateToken => SessionError::DuplicateToken,
            LedgerError::Store(e) => SessionError::Store(e),
        }
    }
}

/// An authenticated identity, as handed over by the identity collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub school_id: Uuid,
    pub role: Role,
}

impl SessionUser {
    fn payload(&self) -> TokenPayload {
        TokenPayload {
            user_id: self.id,
            email: self.email.clone(),
            school_id: self.school_id,
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues, rotates and revokes sessions. Refresh tokens are single use: of
/// several rotations racing on one token, exactly one gets a new pair.
#[derive(Clone)]
pub struct SessionService {
    codec: TokenCodec,
    ledger: Arc<dyn RefreshTokenLedger>,
    clock: SharedClock,
}

impl SessionService {
    pub fn new(codec: TokenCodec, ledger: Arc<dyn RefreshTokenLedger>, clock: SharedClock) -> Self {
        Self {
            codec,
            ledger,
            clock,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Mint a token pair for a freshly authenticated user.
    pub async fn issue(&self, user: &SessionUser) -> Result<TokenPair, SessionError> {
        self.issue_for(&user.payload()).await
    }

    /// Exchange a refresh token for a new pair, consuming it.
    pub async fn rotate(&self, presented: &str) -> Result<TokenPair, SessionError> {
        // Forged or expired tokens are rejected before any store access.
        let claims = self.codec.verify_refresh(presented)?;

        let record = self
            .ledger
            .lookup(presented)
            .await?
            .ok_or(SessionError::UnknownToken)?;

        if !record.is_usable_at(self.clock.now()) {
            return Err(reuse_detected(record.user_id, record.revoked_at.is_some()));
        }

        if !self.ledger.revoke(presented).await? {
            // Lost the race against a concurrent rotation of the same token.
            return Err(reuse_detected(record.user_id, true));
        }

        // Role is carried through unchanged; a role change needs a new login.
        let pair = self.issue_for(&claims.payload).await?;
        tracing::debug!(user_id = %record.user_id, "refresh token rotated");
        Ok(pair)
    }

    /// Logout. Never reports whether the token existed or was still active.
    pub async fn revoke(&self, token: &str) {
        match self.ledger.revoke(token).await {
            Ok(true) => tracing::debug!("refresh token revoked"),
            Ok(false) => tracing::debug!("logout with unknown or already revoked refresh token"),
            Err(err) => tracing::warn!(%err, "failed to revoke refresh token"),
        }
    }

    pub fn verify_access(&self, token: &str) -> Result<TokenPayload, SessionError> {
        Ok(self.codec.verify_access(token)?)
    }

    async fn issue_for(&self, payload: &TokenPayload) -> Result<TokenPair, SessionError> {
        match self.mint(payload).await {
            Err(SessionError::DuplicateToken) => {
                tracing::warn!(user_id = %payload.user_id, "refresh token collision, retrying issuance once");
                self.mint(payload).await
            }
            other => other,
        }
    }

    async fn mint(&self, payload: &TokenPayload) -> Result<TokenPair, SessionError> {
        let access_token = self.codec.sign_access(payload)?;
        let refresh_token = self.codec.sign_refresh(payload)?;

        // Persist the exact expiry that was signed into the token.
        let expires_at = self.codec.verify_refresh(&refresh_token)?.expires_at()?;
        self.ledger
            .persist(payload.user_id, &refresh_token, expires_at)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

fn reuse_detected(user_id: Uuid, revoked: bool) -> SessionError {
    tracing::warn!(
        security_event = "refresh_token_reuse",
        %user_id,
        revoked,
        "rejected refresh token that is no longer active"
    );
    SessionError::TokenReuse { user_id }
}
