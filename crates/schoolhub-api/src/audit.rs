use std::fmt;

use schoolhub_db::entities::audit_events;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use uuid::Uuid;

use crate::request_meta::RequestMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Login,
    LoginGoogle,
    Register,
    RefreshReuse,
    Logout,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Login => "auth.login",
            AuditAction::LoginGoogle => "auth.login_google",
            AuditAction::Register => "auth.register",
            AuditAction::RefreshReuse => "auth.refresh_reuse",
            AuditAction::Logout => "auth.logout",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best effort: a failed audit write is logged, never surfaced to the caller.
pub async fn record(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    user_id: Option<Uuid>,
    action: AuditAction,
    detail: Option<serde_json::Value>,
) {
    let model = audit_events::ActiveModel {
        id: Set(Uuid::new_v4()),
        request_id: Set(meta.request_id.clone()),
        user_id: Set(user_id),
        action: Set(action.as_str().to_string()),
        client_ip: Set(meta.client_ip.clone()),
        detail: Set(detail),
        occurred_at: Set(chrono::Utc::now().into()),
    };

    if let Err(err) = model.insert(db).await {
        tracing::warn!(%err, %action, "failed to write audit event");
    }
}
