use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schoolhub_db::entities::refresh_tokens;
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, SqlErr};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::SharedClock;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("refresh token is already recorded")]
    DuplicateToken,

    #[error("ledger store error: {0}")]
    Store(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    /// Unrevoked and strictly before expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

impl From<refresh_tokens::Model> for RefreshTokenRecord {
    fn from(m: refresh_tokens::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            token_hash: m.token_hash,
            created_at: m.created_at.with_timezone(&Utc),
            expires_at: m.expires_at.with_timezone(&Utc),
            revoked_at: m.revoked_at.map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Record a freshly issued token as active.
    async fn persist(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Mark the token revoked if it is not already.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// concurrent callers can use it as a compare-and-set.
    async fn revoke(&self, token: &str) -> Result<bool, LedgerError>;

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, LedgerError>;

    async fn is_usable(&self, token: &str) -> Result<bool, LedgerError>;
}

pub fn hash_token(raw: &str) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Ledger backed by the `refresh_tokens` table.
#[derive(Clone)]
pub struct DbLedger {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
}

impl DbLedger {
    pub fn new(db: Arc<DatabaseConnection>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    fn now(&self) -> DateTimeWithTimeZone {
        self.clock.now().into()
    }
}

#[async_trait]
impl RefreshTokenLedger for DbLedger {
    async fn persist(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let model = refresh_tokens::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_hash: Set(hash_token(token)),
            created_at: Set(self.now()),
            expires_at: Set(expires_at.into()),
            revoked_at: Set(None),
        };

        match refresh_tokens::Entity::insert(model)
            .exec_without_returning(&*self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(LedgerError::DuplicateToken)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn revoke(&self, token: &str) -> Result<bool, LedgerError> {
        // Single conditional write: of any number of concurrent callers, only
        // one sees `rows_affected == 1`.
        let res = refresh_tokens::Entity::update_many()
            .col_expr(refresh_tokens::Column::RevokedAt, Expr::value(self.now()))
            .filter(refresh_tokens::Column::TokenHash.eq(hash_token(token)))
            .filter(refresh_tokens::Column::RevokedAt.is_null())
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        let row = refresh_tokens::Entity::find()
            .filter(refresh_tokens::Column::TokenHash.eq(hash_token(token)))
            .one(&*self.db)
            .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn is_usable(&self, token: &str) -> Result<bool, LedgerError> {
        let now = self.clock.now();
        Ok(self
            .lookup(token)
            .await?
            .is_some_and(|r| r.is_usable_at(now)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(revoked_at: Option<DateTime<Utc>>, expires_at: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: hash_token("t"),
            created_at: expires_at - Duration::days(30),
            expires_at,
            revoked_at,
        }
    }

    #[test]
    fn usable_window_excludes_expiry_instant() {
        let exp = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
        let r = record(None, exp);
        assert!(r.is_usable_at(exp - Duration::seconds(1)));
        assert!(!r.is_usable_at(exp));
        assert!(!r.is_usable_at(exp + Duration::seconds(1)));
    }

    #[test]
    fn revoked_record_is_never_usable() {
        let exp = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
        let r = record(Some(exp - Duration::days(29)), exp);
        assert!(!r.is_usable_at(exp - Duration::days(20)));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_token("refresh");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, hash_token("refresh"));
        assert_ne!(h, hash_token("refresh2"));
    }
}
