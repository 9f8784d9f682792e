use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use schoolhub_db::entities::{schools, users};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{self, AuditAction};
use crate::error::ApiError;
use crate::identity::{self, RegisterInput};
use crate::request_meta::RequestMeta;
use crate::security::AuthUser;
use crate::session::{SessionError, TokenPair};
use crate::state::AppState;
use crate::validation::FieldErrors;

const INSTITUTE_TYPES: &[&str] = &[
    "school",
    "ielts_center",
    "computer_center",
    "tuition_center",
    "coaching_center",
];

const MIN_PASSWORD_LEN: usize = 8;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
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

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        FieldErrors::new()
            .required("schoolName", &self.school_name)
            .one_of("instituteType", &self.institute_type, INSTITUTE_TYPES)
            .required("schoolAddress", &self.school_address)
            .required("principalName", &self.principal_name)
            .email("principalEmail", &self.principal_email)
            .required("principalPhone", &self.principal_phone)
            .email("email", &self.email)
            .min_len("password", &self.password, MIN_PASSWORD_LEN)
            .required("fullName", &self.full_name)
            .finish()
    }
}

impl From<RegisterRequest> for RegisterInput {
    fn from(r: RegisterRequest) -> Self {
        Self {
            school_name: r.school_name.trim().to_string(),
            institute_type: r.institute_type,
            school_address: r.school_address.trim().to_string(),
            principal_name: r.principal_name.trim().to_string(),
            principal_email: r.principal_email.trim().to_string(),
            principal_phone: r.principal_phone.trim().to_string(),
            email: r.email,
            password: r.password,
            full_name: r.full_name.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleLoginRequest {
    pub id_token: String,
    pub school_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl From<&users::Model> for UserView {
    fn from(u: &users::Model) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            full_name: u.full_name.clone(),
            role: u.role.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolView {
    pub id: Uuid,
    pub school_name: String,
    pub display_name: String,
    pub institute_type: String,
    pub subscription_status: String,
    pub trial_ends_at: Option<DateTimeWithTimeZone>,
}

impl From<&schools::Model> for SchoolView {
    fn from(s: &schools::Model) -> Self {
        Self {
            id: s.id,
            school_name: s.school_name.clone(),
            display_name: s.display_name.clone(),
            institute_type: s.institute_type.clone(),
            subscription_status: s.subscription_status.clone(),
            trial_ends_at: s.trial_ends_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserView,
    pub school: SchoolView,
}

impl SessionResponse {
    fn new(message: &'static str, tokens: TokenPair, user: &users::Model, school: &schools::Model) -> Self {
        Self {
            success: true,
            message,
            tokens,
            user: user.into(),
            school: school.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserView,
    pub school: SchoolView,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions()?;
    let input = json_body(payload)?;
    input.validate()?;

    let (user, school) = identity::register_school(&state.db, input.into()).await?;
    let tokens = sessions.issue(&identity::session_user(&user)?).await?;

    tracing::info!(user_id = %user.id, school_id = %school.id, "school registered");
    audit::record(
        &state.db,
        &meta,
        Some(user.id),
        AuditAction::Register,
        Some(serde_json::json!({ "schoolId": school.id, "schoolName": school.school_name })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new("Registration successful", tokens, &user, &school)),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let sessions = state.sessions()?;
    let input = json_body(payload)?;
    FieldErrors::new()
        .email("email", &input.email)
        .required("password", &input.password)
        .finish()?;

    let user = identity::authenticate(&state.db, &input.email, &input.password).await?;
    let school = identity::load_school(&state.db, user.school_id).await?;
    let tokens = sessions.issue(&identity::session_user(&user)?).await?;

    audit::record(&state.db, &meta, Some(user.id), AuditAction::Login, None).await;
    Ok(Json(SessionResponse::new("Login successful", tokens, &user, &school)))
}

pub async fn google_login(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let verifier = state.google()?;
    let sessions = state.sessions()?;
    let input = json_body(payload)?;
    FieldErrors::new().required("idToken", &input.id_token).finish()?;

    let school_id = match input.school_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("invalid schoolId".into()))?,
        ),
        None => None,
    };

    let profile = verifier.verify(&input.id_token).await?;
    let user = identity::find_or_create_google_user(&state.db, &profile, school_id).await?;
    let school = identity::load_school(&state.db, user.school_id).await?;
    let tokens = sessions.issue(&identity::session_user(&user)?).await?;

    audit::record(&state.db, &meta, Some(user.id), AuditAction::LoginGoogle, None).await;
    Ok(Json(SessionResponse::new("Login successful", tokens, &user, &school)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let sessions = state.sessions()?;
    let token = json_body(payload)?
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Refresh token missing".into()))?;

    match sessions.rotate(token.trim()).await {
        Ok(tokens) => Ok(Json(RefreshResponse {
            success: true,
            tokens,
        })),
        Err(SessionError::TokenReuse { user_id }) => {
            audit::record(&state.db, &meta, Some(user_id), AuditAction::RefreshReuse, None).await;
            Err(ApiError::Unauthorized)
        }
        Err(err) => Err(err.into()),
    }
}

/// Always succeeds: callers never learn whether the token was live.
pub async fn logout(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    body: Bytes,
) -> Json<MessageResponse> {
    let token = serde_json::from_slice::<RefreshRequest>(&body)
        .ok()
        .and_then(|r| r.refresh_token)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    if let (Some(token), Some(sessions)) = (token, state.sessions.as_ref()) {
        sessions.revoke(&token).await;
        let user_id = sessions
            .codec()
            .verify_refresh(&token)
            .ok()
            .map(|c| c.payload.user_id);
        audit::record(&state.db, &meta, user_id, AuditAction::Logout, None).await;
    }

    Json(MessageResponse {
        success: true,
        message: "Logged out",
    })
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<MeResponse>, ApiError> {
    let user = identity::load_user(&state.db, auth.user_id).await?;
    let school = identity::load_school(&state.db, user.school_id).await?;
    Ok(Json(MeResponse {
        success: true,
        user: (&user).into(),
        school: (&school).into(),
    }))
}
