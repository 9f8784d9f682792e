#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schoolhub_api::clock::{ManualClock, SharedClock};
use schoolhub_api::config::AppConfig;
use schoolhub_api::identity;
use schoolhub_api::ledger::DbLedger;
use schoolhub_api::session::{SessionService, SessionUser};
use schoolhub_api::state::AppState;
use schoolhub_api::token::{Role, TokenCodec};
use schoolhub_db::entities::{schools, users};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

pub const SECRET: &str = "integration-test-secret";

pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

/// Fresh in-memory database with every migration applied. A single pooled
/// connection keeps all queries on the same in-memory database.
pub async fn database() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    schoolhub_migration::Migrator::up(&db, None).await.unwrap();
    Arc::new(db)
}

pub async fn seed_school(db: &DatabaseConnection) -> schools::Model {
    let now = Utc::now();
    schools::ActiveModel {
        id: Set(Uuid::new_v4()),
        school_name: Set("Demo School".into()),
        display_name: Set("Demo School".into()),
        institute_type: Set("SCHOOL".into()),
        school_address: Set("123 Education Street".into()),
        principal_name: Set("Dr. Rao".into()),
        principal_email: Set("principal@demoschool.test".into()),
        principal_phone: Set("+911234567890".into()),
        subscription_status: Set("TRIAL".into()),
        trial_ends_at: Set(None),
        created_by: Set("seed".into()),
        created_at: Set(now.into()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_user(db: &DatabaseConnection, role: Role) -> SessionUser {
    let school = seed_school(db).await;
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@demoschool.test", Uuid::new_v4().simple())),
        password_hash: Set(Some(identity::hash_password("Teacher@12345").unwrap())),
        full_name: Set("Asha Rao".into()),
        role: Set(role.as_str().to_string()),
        school_id: Set(school.id),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap();
    identity::session_user(&user).unwrap()
}

pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub clock: ManualClock,
    pub ledger: Arc<DbLedger>,
    pub sessions: SessionService,
}

pub async fn harness() -> Harness {
    let db = database().await;
    let clock = ManualClock::new(epoch());
    let shared: SharedClock = Arc::new(clock.clone());
    let ledger = Arc::new(DbLedger::new(db.clone(), shared.clone()));
    let codec = TokenCodec::new(SECRET, shared.clone()).unwrap();
    let sessions = SessionService::new(codec, ledger.clone(), shared);
    Harness {
        db,
        clock,
        ledger,
        sessions,
    }
}

pub fn config(pairs: &[(&str, &str)]) -> AppConfig {
    let mut all: Vec<(String, String)> = vec![("DATABASE_URL".into(), "sqlite::memory:".into())];
    all.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    AppConfig::from_lookup(move |key| {
        all.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .unwrap()
}

/// Application state over a fresh database, ticking on the real clock.
pub async fn app_state(pairs: &[(&str, &str)]) -> AppState {
    let db = database().await;
    AppState::new(db, config(pairs), Arc::new(schoolhub_api::clock::SystemClock)).unwrap()
}
