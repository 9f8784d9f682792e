use std::time::Duration;

use chrono::Utc;
use schoolhub_db::entities::{schools, users};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr, TransactionTrait,
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::GoogleOAuthConfig;
use crate::session::SessionUser;
use crate::token::Role;

const TRIAL_DAYS: i64 = 14;
const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid identity assertion: {0}")]
    InvalidAssertion(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("schoolId is required for first-time Google login")]
    SchoolRequired,

    #[error("school not found")]
    SchoolNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("user {user_id} has unknown role {role:?}")]
    UnknownRole { user_id: Uuid, role: String },

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("identity provider unreachable: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] DbErr),
}

pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    argon2::Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| IdentityError::PasswordHash(e.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2::Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn session_user(user: &users::Model) -> Result<SessionUser, IdentityError> {
    let role = user
        .role
        .parse::<Role>()
        .map_err(|_| IdentityError::UnknownRole {
            user_id: user.id,
            role: user.role.clone(),
        })?;
    Ok(SessionUser {
        id: user.id,
        email: user.email.clone(),
        school_id: user.school_id,
        role,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub school_name: String,
    pub institute_type: String,
    pub school_address: String,
    pub principal_name: String,
    pub principal_email: String,
    pub principal_phone: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Create a school and its first ADMIN user in one transaction.
pub async fn register_school(
    db: &DatabaseConnection,
    input: RegisterInput,
) -> Result<(users::Model, schools::Model), IdentityError> {
    let email = normalize_email(&input.email);

    let existing = users::Entity::find()
        .filter(users::Column::Email.eq(email.clone()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(IdentityError::EmailTaken);
    }

    let password_hash = hash_password(&input.password)?;
    let now = Utc::now();

    let txn = db.begin().await?;

    let school = schools::ActiveModel {
        id: Set(Uuid::new_v4()),
        school_name: Set(input.school_name.clone()),
        display_name: Set(input.school_name),
        institute_type: Set(input.institute_type.to_ascii_uppercase()),
        school_address: Set(input.school_address),
        principal_name: Set(input.principal_name),
        principal_email: Set(input.principal_email),
        principal_phone: Set(input.principal_phone),
        subscription_status: Set("TRIAL".to_string()),
        trial_ends_at: Set(Some((now + chrono::Duration::days(TRIAL_DAYS)).into())),
        created_by: Set(email.clone()),
        created_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        password_hash: Set(Some(password_hash)),
        full_name: Set(input.full_name),
        role: Set(Role::Admin.as_str().to_string()),
        school_id: Set(school.id),
        created_at: Set(now.into()),
    }
    .insert(&txn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            IdentityError::EmailTaken
        } else {
            IdentityError::Store(e)
        }
    })?;

    txn.commit().await?;
    Ok((user, school))
}

/// Email/password check. Unknown email, wrong password and password-less
/// (Google-only) accounts are indistinguishable to the caller.
pub async fn authenticate(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<users::Model, IdentityError> {
    let user = users::Entity::find()
        .filter(users::Column::Email.eq(normalize_email(email)))
        .one(db)
        .await?
        .ok_or(IdentityError::InvalidCredentials)?;

    let valid = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(hash, password));
    if !valid {
        return Err(IdentityError::InvalidCredentials);
    }
    Ok(user)
}

pub async fn load_user(db: &DatabaseConnection, user_id: Uuid) -> Result<users::Model, IdentityError> {
    users::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(IdentityError::UserNotFound)
}

pub async fn load_school(
    db: &DatabaseConnection,
    school_id: Uuid,
) -> Result<schools::Model, IdentityError> {
    schools::Entity::find_by_id(school_id)
        .one(db)
        .await?
        .ok_or(IdentityError::SchoolNotFound)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    sub: Option<String>,
    email: Option<String>,
    // Google returns this as the string "true" on tokeninfo.
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
}

fn truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

impl TokenInfo {
    fn into_profile(self, client_id: &str) -> Result<GoogleProfile, IdentityError> {
        if self.aud.as_deref() != Some(client_id) {
            return Err(IdentityError::InvalidAssertion("audience mismatch".into()));
        }
        if !self.email_verified.as_ref().is_some_and(truthy) {
            return Err(IdentityError::InvalidAssertion("Google email not verified".into()));
        }
        let email = self
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| IdentityError::InvalidAssertion("missing email".into()))?;
        let sub = self
            .sub
            .ok_or_else(|| IdentityError::InvalidAssertion("missing subject".into()))?;
        Ok(GoogleProfile {
            sub,
            email: normalize_email(&email),
            full_name: self.name,
        })
    }
}

/// Verifies Google ID tokens. Only constructed when Google sign-in is
/// configured.
#[derive(Clone, Debug)]
pub struct GoogleVerifier {
    client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleVerifier {
    pub fn new(config: &GoogleOAuthConfig) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .user_agent("schoolhub-api")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            endpoint: GOOGLE_TOKENINFO_URL.to_string(),
        })
    }

    pub async fn verify(&self, id_token: &str) -> Result<GoogleProfile, IdentityError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if resp.status().is_client_error() {
            return Err(IdentityError::InvalidAssertion("token rejected by Google".into()));
        }
        let info: TokenInfo = resp.error_for_status()?.json().await?;
        info.into_profile(&self.client_id)
    }
}

/// Resolve a verified Google identity to a local user, creating a USER-role
/// account without a password on first sign-in.
pub async fn find_or_create_google_user(
    db: &DatabaseConnection,
    profile: &GoogleProfile,
    school_id: Option<Uuid>,
) -> Result<users::Model, IdentityError> {
    if let Some(user) = users::Entity::find()
        .filter(users::Column::Email.eq(profile.email.clone()))
        .one(db)
        .await?
    {
        return Ok(user);
    }

    let school_id = school_id.ok_or(IdentityError::SchoolRequired)?;
    load_school(db, school_id).await?;

    tracing::info!(email = %profile.email, %school_id, "creating user on first Google sign-in");
    users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(profile.email.clone()),
        password_hash: Set(None),
        full_name: Set(profile
            .full_name
            .clone()
            .unwrap_or_else(|| profile.email.clone())),
        role: Set(Role::User.as_str().to_string()),
        school_id: Set(school_id),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            IdentityError::EmailTaken
        } else {
            IdentityError::Store(e)
        }
    })
}
