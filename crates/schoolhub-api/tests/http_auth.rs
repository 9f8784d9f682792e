mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use std::sync::Arc;

use schoolhub_api::app;
use schoolhub_api::clock::SystemClock;
use schoolhub_api::config::ConfigError;
use schoolhub_api::state::{AppState, StateError};
use schoolhub_db::entities::audit_events;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    assert!(resp.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn registration() -> Value {
    json!({
        "schoolName": "Demo School",
        "instituteType": "school",
        "schoolAddress": "123 Education Street",
        "principalName": "Dr. Rao",
        "principalEmail": "principal@demoschool.test",
        "principalPhone": "+911234567890",
        "email": "Admin@DemoSchool.test",
        "password": "Admin@123456",
        "fullName": "Admin User"
    })
}

async fn configured_app() -> Router {
    configured_app_with_db().await.0
}

async fn configured_app_with_db() -> (Router, Arc<DatabaseConnection>) {
    let state = common::app_state(&[("JWT_SECRET", common::SECRET)]).await;
    let db = state.db.clone();
    (app::router(state), db)
}

async fn audit_trail(db: &DatabaseConnection, user_id: Uuid) -> Vec<audit_events::Model> {
    audit_events::Entity::find()
        .filter(audit_events::Column::UserId.eq(user_id))
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn full_session_flow() {
    let app = configured_app().await;

    let (status, body) = send(&app, post("/api/auth/register", registration())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["role"], "ADMIN");
    assert_eq!(body["user"]["email"], "admin@demoschool.test");
    assert_eq!(body["school"]["subscriptionStatus"], "TRIAL");
    assert_eq!(body["school"]["instituteType"], "SCHOOL");

    let (status, body) = send(
        &app,
        post(
            "/api/auth/login",
            json!({ "email": "admin@demoschool.test", "password": "Admin@123456" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let me = Request::get("/api/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, me).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["fullName"], "Admin User");
    assert_eq!(body["school"]["schoolName"], "Demo School");

    let (status, body) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);

    // Replaying the consumed token looks like any other bad token.
    let (status, body) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");

    let (status, body) = send(
        &app,
        post("/api/auth/logout", json!({ "refreshToken": rotated })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");

    let (status, _) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": rotated })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_failures_share_one_response() {
    let app = configured_app().await;

    let (forged_status, forged) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": "a.b.c" })),
    )
    .await;
    let (garbage_status, garbage) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": "garbage" })),
    )
    .await;

    assert_eq!(forged_status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage_status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged, garbage);
}

#[tokio::test]
async fn logout_always_succeeds() {
    let app = configured_app().await;

    for body in [json!({}), json!({ "refreshToken": "never-issued" })] {
        let (status, body) = send(&app, post("/api/auth/logout", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    let req = Request::post("/api/auth/logout")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = configured_app().await;
    send(&app, post("/api/auth/register", registration())).await;

    let (s1, b1) = send(
        &app,
        post(
            "/api/auth/login",
            json!({ "email": "admin@demoschool.test", "password": "wrong-password" }),
        ),
    )
    .await;
    let (s2, b2) = send(
        &app,
        post(
            "/api/auth/login",
            json!({ "email": "nobody@demoschool.test", "password": "Admin@123456" }),
        ),
    )
    .await;
    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!((s1, b1), (s2, b2));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let app = configured_app().await;
    let (status, _) = send(&app, post("/api/auth/register", registration())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, post("/api/auth/register", registration())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email already registered");
}

#[tokio::test]
async fn invalid_registration_lists_fields() {
    let app = configured_app().await;
    let mut input = registration();
    input["password"] = json!("short");
    input["email"] = json!("not-an-email");

    let (status, body) = send(&app, post("/api/auth/register", input)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fieldErrors"]["password"].is_string());
    assert!(body["fieldErrors"]["email"].is_string());
}

#[tokio::test]
async fn me_requires_a_bearer_access_token() {
    let app = configured_app().await;

    let (status, _) = send(&app, Request::get("/api/auth/me").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send(&app, post("/api/auth/register", registration())).await;
    let refresh = body["refreshToken"].as_str().unwrap();
    let req = Request::get("/api/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {refresh}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_secret_disables_auth_routes() {
    let app = app::router(common::app_state(&[]).await);

    let (status, _) = send(&app, post("/api/auth/register", registration())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn google_login_is_disabled_without_client_id() {
    let app = configured_app().await;
    let (status, body) = send(
        &app,
        post("/api/auth/google", json!({ "idToken": "whatever" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Google OAuth is disabled");
}

#[tokio::test]
async fn foreign_origin_cannot_post() {
    let app = configured_app().await;
    let req = Request::post("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, "https://evil.example.net")
        .body(Body::from(json!({ "email": "a@b.test", "password": "x" }).to_string()))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let app = configured_app().await;

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");

    let (status, body) = send(&app, Request::get("/api/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Route not found");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = configured_app().await;
    let req = Request::get("/health")
        .header("x-request-id", "trace-123")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-123");
}

#[tokio::test]
async fn session_events_reach_the_audit_trail() {
    let (app, db) = configured_app_with_db().await;

    let (_, body) = send(&app, post("/api/auth/register", registration())).await;
    let user_id = Uuid::parse_str(body["user"]["id"].as_str().unwrap()).unwrap();

    let (status, body) = send(
        &app,
        post(
            "/api/auth/login",
            json!({ "email": "admin@demoschool.test", "password": "Admin@123456" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["refreshToken"].as_str().unwrap().to_string();

    let mut replay = post("/api/auth/refresh", json!({ "refreshToken": refresh }));
    replay
        .headers_mut()
        .insert("x-request-id", "replay-7".parse().unwrap());
    let (status, _) = send(&app, replay).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    send(&app, post("/api/auth/logout", json!({ "refreshToken": rotated }))).await;

    let trail = audit_trail(&db, user_id).await;
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    for expected in ["auth.register", "auth.login", "auth.refresh_reuse", "auth.logout"] {
        assert_eq!(
            actions.iter().filter(|a| **a == expected).count(),
            1,
            "{expected} in {actions:?}"
        );
    }

    let reuse = trail
        .iter()
        .find(|e| e.action == "auth.refresh_reuse")
        .unwrap();
    assert_eq!(reuse.user_id, Some(user_id));
    assert_eq!(reuse.request_id, "replay-7");

    let register = trail.iter().find(|e| e.action == "auth.register").unwrap();
    assert_eq!(
        register.detail.as_ref().unwrap()["schoolName"],
        "Demo School"
    );
}

#[tokio::test]
async fn successful_rotation_is_not_audited_as_reuse() {
    let (app, db) = configured_app_with_db().await;

    let (_, body) = send(&app, post("/api/auth/register", registration())).await;
    let user_id = Uuid::parse_str(body["user"]["id"].as_str().unwrap()).unwrap();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        post("/api/auth/refresh", json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let trail = audit_trail(&db, user_id).await;
    assert!(trail.iter().all(|e| e.action != "auth.refresh_reuse"));
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = configured_app().await;

    for uri in ["/health", "/api/nope"] {
        let resp = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = resp.headers();
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
    }
}

#[tokio::test]
async fn unusable_configured_secret_fails_startup() {
    let db = common::database().await;
    let mut config = common::config(&[("JWT_SECRET", common::SECRET)]);
    config.jwt_secret = Some("   ".into());

    let err = AppState::new(db, config, Arc::new(SystemClock))
        .err()
        .unwrap();
    assert!(matches!(err, StateError::Config(ConfigError::MissingSecret)));
}
